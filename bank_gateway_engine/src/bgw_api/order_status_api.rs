use std::fmt::Debug;

use log::*;

use crate::{
    bgw_api::{errors::OrderStatusError, objects::OrderStatusView},
    connection::ConnectionManager,
    db_types::{OrderCode, OrderSnapshot},
    fallback::{CacheLookup, FallbackCacheStore},
    traits::{KeyValueStore, OrderStore},
};

/// Answers "what state is this order in", from the last known snapshot if the primary store is down.
pub struct OrderStatusApi<B, K> {
    conn: ConnectionManager<B>,
    cache: FallbackCacheStore<K>,
}

impl<B, K> Debug for OrderStatusApi<B, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderStatusApi")
    }
}

impl<B, K> OrderStatusApi<B, K> {
    pub fn new(conn: ConnectionManager<B>, cache: FallbackCacheStore<K>) -> Self {
        Self { conn, cache }
    }
}

impl<B, K> OrderStatusApi<B, K>
where
    B: OrderStore,
    K: KeyValueStore,
{
    /// Every successful read refreshes the snapshot. A missing snapshot during an outage is reported as
    /// [`OrderStatusError::Unknown`], never as "not found".
    pub async fn order_status(&self, code: &OrderCode) -> Result<OrderStatusView, OrderStatusError> {
        match self.conn.fetch_order(code).await {
            Ok(Some(order)) => {
                self.cache.put_order_snapshot(&OrderSnapshot::from(&order)).await;
                Ok(OrderStatusView::from(&order))
            },
            Ok(None) => Err(OrderStatusError::NotFound(code.clone())),
            Err(e) if e.is_transient() => match self.cache.get_order_snapshot(code).await {
                CacheLookup::Hit(snapshot) => {
                    debug!("🧊️ Serving status of {code} from a snapshot taken at {}", snapshot.cached_at);
                    Ok(OrderStatusView::from(snapshot))
                },
                CacheLookup::Unknown => {
                    warn!("🧊️ Status of {code} requested during an outage ({e}), and no snapshot exists");
                    Err(OrderStatusError::Unknown(code.clone()))
                },
            },
            Err(e) => Err(e.into()),
        }
    }
}
