use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    connection::{
        circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
        coalescer::RequestCoalescer,
    },
    db_types::{
        BankAccount,
        BankEntryUpdate,
        BankTransactionEntry,
        Merchant,
        NewBankEntry,
        NewOrder,
        Order,
        OrderCode,
        OrderUpdate,
    },
    traits::{
        BankAccountQueryFilter,
        DocumentQuery,
        Documents,
        InsertBankEntryResult,
        MerchantQueryFilter,
        OrderQueryFilter,
        OrderStore,
        PendingNotificationCounts,
        StoreError,
    },
};

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound on any single store call. A call that takes longer counts as a failure.
    pub call_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { call_timeout: Duration::from_secs(5), breaker: CircuitBreakerConfig::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeHealth {
    pub url: String,
    pub state: CircuitState,
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub primary: NodeHealth,
    pub replica: Option<NodeHealth>,
    pub in_flight_reads: usize,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.primary.state == CircuitState::Closed
    }
}

struct Node<B> {
    store: B,
    breaker: CircuitBreaker,
}

impl<B: OrderStore> Node<B> {
    fn new(name: &str, store: B, config: &CircuitBreakerConfig) -> Self {
        Self { breaker: CircuitBreaker::new(name, config.clone()), store }
    }

    fn health(&self) -> NodeHealth {
        NodeHealth {
            url: self.store.url().to_string(),
            state: self.breaker.state(),
            error_rate: self.breaker.error_rate(),
            consecutive_failures: self.breaker.consecutive_failures(),
            last_success: self.breaker.last_success(),
        }
    }
}

struct Inner<B> {
    primary: Node<B>,
    replica: Option<Node<B>>,
    call_timeout: Duration,
    reads: RequestCoalescer<Result<Documents, StoreError>>,
}

/// The single gateway to the primary store (and its optional read replica).
///
/// Every call is bounded by a timeout and guarded by a per-node circuit breaker. Read-only queries prefer the replica
/// and fall back to the primary when the replica's breaker is open or the replica call fails. Writes, and the reads
/// that decide what to write, always go to the primary. Reads may be given a de-duplication key; concurrent reads with
/// the same key share a single backend call.
pub struct ConnectionManager<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for ConnectionManager<B> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<B: OrderStore> ConnectionManager<B> {
    pub fn new(primary: B, replica: Option<B>, config: ConnectionConfig) -> Self {
        let primary = Node::new("primary", primary, &config.breaker);
        let replica = replica.map(|r| Node::new("replica", r, &config.breaker));
        info!(
            "🔌️ Connection manager ready. Primary: {}. Replica: {}",
            primary.store.url(),
            replica.as_ref().map(|r| r.store.url()).unwrap_or("none")
        );
        let inner = Inner { primary, replica, call_timeout: config.call_timeout, reads: RequestCoalescer::default() };
        Self { inner: Arc::new(inner) }
    }

    /// Direct access to the primary store. Bypasses the breaker, so only use it for setup and tests.
    pub fn primary(&self) -> &B {
        &self.inner.primary.store
    }

    pub fn is_primary_circuit_open(&self) -> bool {
        self.inner.primary.breaker.is_open()
    }

    pub fn get_health_status(&self) -> HealthStatus {
        HealthStatus {
            primary: self.inner.primary.health(),
            replica: self.inner.replica.as_ref().map(Node::health),
            in_flight_reads: self.inner.reads.in_flight(),
        }
    }

    /// Pings the primary through the breaker. Used by the store health endpoint.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let node = &self.inner.primary;
        self.guarded(node, node.store.ping()).await
    }

    async fn guarded<T, F>(&self, node: &Node<B>, call: F) -> Result<T, StoreError>
    where F: Future<Output = Result<T, StoreError>> {
        let permit = node.breaker.try_acquire().map_err(|_| {
            StoreError::Unavailable(format!("Circuit for the {} store is open", node.breaker.name()))
        })?;
        let timeout = self.inner.call_timeout;
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(r) => r,
            Err(_) => Err(StoreError::Timeout(timeout)),
        };
        match &result {
            Err(e) if e.is_infrastructure() => {
                debug!("🔌️ [{}] Store call failed: {e}", node.breaker.name());
                node.breaker.record_failure(permit);
            },
            _ => node.breaker.record_success(permit),
        }
        result
    }

    async fn read(&self, query: &DocumentQuery) -> Result<Documents, StoreError> {
        if let Some(replica) = &self.inner.replica {
            match self.guarded(replica, replica.store.list_documents(query)).await {
                Ok(docs) => return Ok(docs),
                Err(e) if e.is_infrastructure() => {
                    debug!("🔌️ Replica read of {} failed ({e}). Falling back to the primary", query.collection());
                },
                Err(e) => return Err(e),
            }
        }
        self.read_primary(query).await
    }

    async fn read_primary(&self, query: &DocumentQuery) -> Result<Documents, StoreError> {
        let primary = &self.inner.primary;
        self.guarded(primary, primary.store.list_documents(query)).await
    }

    /// Runs a read query. If `dedup_key` is given, concurrent calls with the same key share one backend call and
    /// all receive the same result, errors included.
    pub async fn list_documents(&self, query: DocumentQuery, dedup_key: Option<&str>) -> Result<Documents, StoreError> {
        match dedup_key {
            Some(key) => self.inner.reads.run(key, || async { self.read(&query).await }).await,
            None => self.read(&query).await,
        }
    }

    //-----------------------------------------   Typed reads   -------------------------------------------------------

    pub async fn list_orders(
        &self,
        filter: OrderQueryFilter,
        dedup_key: Option<&str>,
    ) -> Result<Vec<Order>, StoreError> {
        self.list_documents(DocumentQuery::Orders(filter), dedup_key).await?.into_orders()
    }

    /// Fetches an order by code for display. Concurrent lookups of the same order share one call, and the answer may
    /// come from the replica.
    pub async fn fetch_order(&self, code: &OrderCode) -> Result<Option<Order>, StoreError> {
        let key = format!("order:{code}");
        let filter = OrderQueryFilter::default().with_order_code(code.clone()).with_limit(1);
        Ok(self.list_orders(filter, Some(&key)).await?.into_iter().next())
    }

    /// Fetches the latest version of an order from the primary, without coalescing. Use this for every read that feeds
    /// a write: a lagging replica would hide new orders and hand out stale versions.
    pub async fn fetch_order_for_update(&self, code: &OrderCode) -> Result<Option<Order>, StoreError> {
        let filter = OrderQueryFilter::default().with_order_code(code.clone()).with_limit(1);
        Ok(self.read_primary(&DocumentQuery::Orders(filter)).await?.into_orders()?.into_iter().next())
    }

    /// Lists orders from the primary for callers that go on to modify them. Sweeps pass a de-duplication key so that
    /// overlapping runs share one scan.
    pub async fn list_orders_for_update(
        &self,
        filter: OrderQueryFilter,
        dedup_key: Option<&str>,
    ) -> Result<Vec<Order>, StoreError> {
        let query = DocumentQuery::Orders(filter);
        let docs = match dedup_key {
            Some(key) => self.inner.reads.run(key, || async { self.read_primary(&query).await }).await?,
            None => self.read_primary(&query).await?,
        };
        docs.into_orders()
    }

    /// Resolves the receiving account of a bank transaction. Only reconciliation asks, and it credits the account
    /// straight after, so this reads the primary. Lookups of the same number are coalesced.
    pub async fn fetch_bank_account_by_number(&self, number: &str) -> Result<Option<BankAccount>, StoreError> {
        let filter = BankAccountQueryFilter::default().with_account_number(number).active_only();
        let query = DocumentQuery::BankAccounts(filter);
        let key = format!("bank_account:{number}");
        let accounts = self.inner.reads.run(&key, || async { self.read_primary(&query).await }).await?;
        Ok(accounts.into_bank_accounts()?.into_iter().next())
    }

    pub async fn fetch_merchant(&self, id: i64) -> Result<Option<Merchant>, StoreError> {
        let filter = MerchantQueryFilter::default().with_id(id);
        let key = format!("merchant:{id}");
        let merchants = self.list_documents(DocumentQuery::Merchants(filter), Some(&key)).await?;
        Ok(merchants.into_merchants()?.into_iter().next())
    }

    pub async fn count_pending_notifications(&self) -> Result<PendingNotificationCounts, StoreError> {
        let node = &self.inner.primary;
        self.guarded(node, node.store.count_pending_notifications()).await
    }

    //-----------------------------------------     Writes      -------------------------------------------------------

    pub async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let node = &self.inner.primary;
        self.guarded(node, node.store.insert_order(order)).await
    }

    pub async fn update_order(
        &self,
        code: &OrderCode,
        expected_version: i64,
        update: OrderUpdate,
    ) -> Result<Order, StoreError> {
        let node = &self.inner.primary;
        self.guarded(node, node.store.update_order(code, expected_version, update)).await
    }

    /// The delivery confirmation write. Never coalesced and never served from cache.
    pub async fn set_notification_sent(&self, code: &OrderCode, sent: bool) -> Result<(), StoreError> {
        let node = &self.inner.primary;
        self.guarded(node, node.store.set_notification_sent(code, sent)).await
    }

    pub async fn insert_bank_entry(&self, entry: NewBankEntry) -> Result<InsertBankEntryResult, StoreError> {
        let node = &self.inner.primary;
        self.guarded(node, node.store.insert_bank_entry(entry)).await
    }

    pub async fn update_bank_entry(
        &self,
        id: i64,
        update: BankEntryUpdate,
    ) -> Result<BankTransactionEntry, StoreError> {
        let node = &self.inner.primary;
        self.guarded(node, node.store.update_bank_entry(id, update)).await
    }

    pub async fn credit_bank_account(
        &self,
        entry: &BankTransactionEntry,
        account_id: i64,
    ) -> Result<BankAccount, StoreError> {
        let node = &self.inner.primary;
        let call = node.store.credit_bank_account(entry.id, account_id, entry.amount, entry.balance_after);
        self.guarded(node, call).await
    }
}
