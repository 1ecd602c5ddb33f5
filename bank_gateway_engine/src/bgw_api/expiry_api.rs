use std::{fmt::Debug, time::Duration};

use chrono::Utc;
use log::*;

use crate::{
    bgw_api::objects::ExpiryResult,
    connection::ConnectionManager,
    db_types::{audit_note, OrderStatusType, OrderUpdate},
    events::{EventProducers, OrderFinalizedEvent},
    traits::{OrderQueryFilter, OrderStore, StoreError},
};

pub const EXPIRY_SWEEP_DEDUP_KEY: &str = "order-expiry-sweep";

/// `ExpiryApi` fails orders whose payment window has passed.
///
/// There are no per-order timers. A periodic sweep scans for open orders older than the window instead, so a restart
/// never loses an expiry; it only delays it until the next sweep.
pub struct ExpiryApi<B> {
    conn: ConnectionManager<B>,
    producers: EventProducers,
}

impl<B> Debug for ExpiryApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExpiryApi")
    }
}

impl<B> ExpiryApi<B> {
    pub fn new(conn: ConnectionManager<B>, producers: EventProducers) -> Self {
        Self { conn, producers }
    }
}

impl<B> ExpiryApi<B>
where B: OrderStore
{
    /// Moves every `pending` or `processing` order created more than `max_age` ago to `failed`.
    ///
    /// Orders that change between the scan and the update are left for the next sweep. Running the sweep twice is
    /// harmless since failed orders no longer match the scan.
    pub async fn expire_orders(&self, max_age: Duration) -> Result<ExpiryResult, StoreError> {
        if self.conn.is_primary_circuit_open() {
            info!("🕰️ Store circuit is open. Skipping the expiry sweep.");
            return Ok(ExpiryResult { skipped: true, ..Default::default() });
        }
        let window = chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now() - window;
        let filter = OrderQueryFilter::default()
            .with_status(OrderStatusType::Pending)
            .with_status(OrderStatusType::Processing)
            .created_before(cutoff);
        let candidates = self.conn.list_orders_for_update(filter, Some(EXPIRY_SWEEP_DEDUP_KEY)).await?;
        trace!("🕰️ {} orders are past their payment window", candidates.len());
        let mut result = ExpiryResult::default();
        let minutes = max_age.as_secs() / 60;
        for order in candidates {
            let note = audit_note(
                "expiry",
                &format!("Payment window of {minutes} minutes elapsed. {} -> failed", order.status),
            );
            let update = OrderUpdate::default().with_status(OrderStatusType::Failed).with_note(note);
            match self.conn.update_order(&order.order_code, order.version, update).await {
                Ok(order) => {
                    debug!("🕰️ Order {} expired", order.order_code);
                    result.expired.push(order.order_code.clone());
                    self.producers.publish_order_finalized(OrderFinalizedEvent::new(order)).await;
                },
                Err(StoreError::Conflict(_)) => {
                    debug!("🕰️ Order {} changed during the sweep. Leaving it for now.", order.order_code);
                    result.conflicts.push(order.order_code);
                },
                Err(e) => {
                    warn!("🕰️ Expiry sweep aborted after {} orders: {e}", result.expired.len());
                    return Err(e);
                },
            }
        }
        if !result.expired.is_empty() {
            info!("🕰️ Expired {} orders", result.expired.len());
        }
        Ok(result)
    }
}
