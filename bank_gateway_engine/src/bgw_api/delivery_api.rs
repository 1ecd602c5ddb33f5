use std::{fmt::Debug, sync::Arc, time::Duration};

use bgw_common::{Amount, Secret};
use log::*;
use merchant_tools::{WebhookPayload, WebhookRequest};

use crate::{
    bgw_api::{
        errors::DeliveryError,
        objects::{DeliveryMode, DeliveryOutcome, DeliveryReport, SkipReason, StatusOverride, SweepReport},
    },
    connection::ConnectionManager,
    db_types::{audit_note, CachedWebhookContext, Order, OrderCode, OrderStatusType, OrderType, OrderUpdate},
    fallback::{CacheLookup, FallbackCacheStore},
    traits::{KeyValueStore, OrderQueryFilter, OrderStore, PendingNotificationCounts, StoreError, WebhookTransport},
};

pub const RETRY_SWEEP_DEDUP_KEY: &str = "webhook-retry-sweep";
/// The most orders a single resend-by-pattern call will touch.
pub const MAX_BULK_RESEND: u32 = 500;
const MIN_CALLBACK_PATTERN_LEN: usize = 3;
const OVERRIDE_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub deposit_mode: DeliveryMode,
    pub withdraw_mode: DeliveryMode,
    /// Upper bound on the orders a single retry sweep will attempt.
    pub retry_batch_size: u32,
    /// Pause between consecutive requests of a bulk send, to go easy on merchant endpoints.
    pub inter_request_delay: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            deposit_mode: DeliveryMode::Batch,
            withdraw_mode: DeliveryMode::Legacy,
            retry_batch_size: 50,
            inter_request_delay: Duration::from_millis(200),
        }
    }
}

impl DeliveryConfig {
    pub fn mode_for(&self, order_type: OrderType) -> DeliveryMode {
        match order_type {
            OrderType::Deposit => self.deposit_mode,
            OrderType::Withdraw => self.withdraw_mode,
        }
    }
}

/// Why this order must not be sent right now, if anything.
pub fn skip_reason(order: &Order) -> Option<SkipReason> {
    if !order.status.is_notifiable() {
        Some(SkipReason::NotNotifiable)
    } else if !order.has_callback() {
        Some(SkipReason::NoCallbackUrl)
    } else if order.is_sent_callback_notification {
        Some(SkipReason::AlreadySent)
    } else {
        None
    }
}

pub fn payload_for_order(order: &Order) -> WebhookPayload {
    WebhookPayload {
        odr_id: order.order_code.to_string(),
        merchant_ord_id: order.merchant_order_id.clone(),
        order_type: order.order_type.to_string(),
        odr_status: order.status.to_string(),
        bank_receive_number: order.bank_receive_number.clone().unwrap_or_default(),
        bank_receive_owner_name: order.bank_receive_owner_name.clone().unwrap_or_default(),
        amount: order.amount_paid,
    }
}

/// Builds a payload from whatever the cache holds. Missing fields go out empty.
pub fn payload_for_context(context: &CachedWebhookContext, status: OrderStatusType) -> WebhookPayload {
    WebhookPayload {
        odr_id: context.order_code.to_string(),
        merchant_ord_id: context.merchant_order_id.clone().unwrap_or_default(),
        order_type: context.order_type.to_string(),
        odr_status: status.to_string(),
        bank_receive_number: context.bank_receive_number.clone().unwrap_or_default(),
        bank_receive_owner_name: context.bank_receive_owner_name.clone().unwrap_or_default(),
        amount: context.amount.unwrap_or(Amount::ZERO),
    }
}

/// A group of orders that goes out in a single request.
struct DeliveryUnit<'a> {
    callback_url: &'a str,
    merchant_id: i64,
    orders: Vec<&'a Order>,
}

/// Splits orders into requests. Batch-mode orders that share a callback URL and merchant are combined; everything
/// else is sent on its own. The order of first appearance is preserved.
fn plan_units<'a>(orders: &[&'a Order], config: &DeliveryConfig) -> Vec<DeliveryUnit<'a>> {
    let mut units: Vec<DeliveryUnit<'a>> = Vec::new();
    for &order in orders {
        let callback_url = order.callback_url.as_deref().unwrap_or_default();
        if config.mode_for(order.order_type) == DeliveryMode::Batch {
            let existing = units.iter_mut().find(|u| {
                u.callback_url == callback_url &&
                    u.merchant_id == order.merchant_id &&
                    u.orders.first().map(|o| config.mode_for(o.order_type)) == Some(DeliveryMode::Batch)
            });
            if let Some(unit) = existing {
                unit.orders.push(order);
                continue;
            }
        }
        units.push(DeliveryUnit { callback_url, merchant_id: order.merchant_id, orders: vec![order] });
    }
    units
}

/// `DeliveryApi` notifies merchants about orders that reached a final state.
///
/// Each call makes exactly one attempt per request. Failed deliveries are left unconfirmed and get picked up by
/// [`DeliveryApi::retry_sweep`]. Delivery confirmation is written straight to the primary store; if that write fails,
/// a flag in the fallback cache records it instead so the order is not sent twice.
pub struct DeliveryApi<B, K, T> {
    conn: ConnectionManager<B>,
    cache: FallbackCacheStore<K>,
    transport: Arc<T>,
    config: DeliveryConfig,
}

impl<B, K: Clone, T> Clone for DeliveryApi<B, K, T> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            cache: self.cache.clone(),
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
        }
    }
}

impl<B, K, T> Debug for DeliveryApi<B, K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeliveryApi ({:?})", self.config)
    }
}

impl<B, K, T> DeliveryApi<B, K, T> {
    pub fn new(conn: ConnectionManager<B>, cache: FallbackCacheStore<K>, transport: T, config: DeliveryConfig) -> Self {
        Self { conn, cache, transport: Arc::new(transport), config }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }
}

impl<B, K, T> DeliveryApi<B, K, T>
where
    B: OrderStore,
    K: KeyValueStore,
    T: WebhookTransport,
{
    pub async fn send_notification(&self, order: &Order) -> DeliveryReport {
        self.send_notifications(std::slice::from_ref(order)).await
    }

    /// Sends notifications for the given orders, one request at a time.
    ///
    /// Orders that are not in a notifiable state, have no callback URL or were already confirmed are skipped and
    /// reported as such. Whether orders are batched depends on the configured mode for their order type.
    pub async fn send_notifications(&self, orders: &[Order]) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut eligible = Vec::with_capacity(orders.len());
        for order in orders {
            if let Some(reason) = skip_reason(order) {
                trace!("📮️ Skipping {}: {reason}", order.order_code);
                report.push(order.order_code.clone(), DeliveryOutcome::Skipped(reason));
                continue;
            }
            if self.cache.is_callback_sent(&order.order_code).await {
                debug!("📮️ {} was confirmed while the store was down. Recording it now.", order.order_code);
                self.confirm_delivery(&order.order_code).await;
                report.push(order.order_code.clone(), DeliveryOutcome::Skipped(SkipReason::AlreadySent));
                continue;
            }
            eligible.push(order);
        }
        let units = plan_units(&eligible, &self.config);
        for (i, unit) in units.iter().enumerate() {
            if i > 0 && !self.config.inter_request_delay.is_zero() {
                tokio::time::sleep(self.config.inter_request_delay).await;
            }
            report.extend(self.deliver_unit(unit).await);
        }
        if !orders.is_empty() {
            debug!(
                "📮️ Notification run complete. {} sent, {} failed, {} skipped",
                report.sent(),
                report.failed(),
                report.skipped()
            );
        }
        report
    }

    async fn deliver_unit(&self, unit: &DeliveryUnit<'_>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let Some(first) = unit.orders.first() else { return report };
        let api_key = match self.merchant_key(unit.merchant_id, &first.order_code).await {
            Ok(key) => key,
            Err(reason) => {
                warn!("📮️ Cannot notify merchant #{}: {reason}", unit.merchant_id);
                for order in &unit.orders {
                    report.push(order.order_code.clone(), DeliveryOutcome::Failed(reason.clone()));
                }
                return report;
            },
        };
        let payloads = unit.orders.iter().map(|o| payload_for_order(o)).collect::<Vec<_>>();
        let request = match self.config.mode_for(first.order_type) {
            DeliveryMode::Batch => WebhookRequest::batch(unit.callback_url, api_key, payloads),
            DeliveryMode::Legacy => match payloads.into_iter().next() {
                Some(payload) => WebhookRequest::single(unit.callback_url, api_key, payload),
                None => return report,
            },
        };
        match self.transport.deliver(&request).await {
            Ok(()) => {
                for order in &unit.orders {
                    self.confirm_delivery(&order.order_code).await;
                    report.push(order.order_code.clone(), DeliveryOutcome::Sent);
                }
            },
            Err(e) => {
                let reason = e.to_string();
                warn!("📮️ Delivery to {} failed: {reason}", unit.callback_url);
                for order in &unit.orders {
                    self.record_failure(order, &reason).await;
                    report.push(order.order_code.clone(), DeliveryOutcome::Failed(reason.clone()));
                }
            },
        }
        report
    }

    /// The signing key for a merchant. Falls back to the cached webhook context when the store cannot be reached.
    async fn merchant_key(&self, merchant_id: i64, code: &OrderCode) -> Result<Secret<String>, String> {
        match self.conn.fetch_merchant(merchant_id).await {
            Ok(Some(merchant)) => Ok(merchant.api_key),
            Ok(None) => Err(format!("Merchant #{merchant_id} does not exist")),
            Err(e) if e.is_infrastructure() => match self.cache.get(code).await {
                CacheLookup::Hit(context) if context.merchant_id == merchant_id => {
                    debug!("📮️ Using the cached key for merchant #{merchant_id}");
                    Ok(Secret::new(context.merchant_api_key))
                },
                _ => Err(format!("Merchant #{merchant_id} could not be loaded ({e}) and no cached key is available")),
            },
            Err(e) => Err(e.to_string()),
        }
    }

    /// Records a confirmed delivery. The store write is direct and never served from a cache.
    async fn confirm_delivery(&self, code: &OrderCode) {
        match self.conn.set_notification_sent(code, true).await {
            Ok(()) => trace!("📮️ Delivery of {code} confirmed"),
            Err(e) if e.is_transient() => {
                warn!("📮️ Could not confirm delivery of {code} ({e}). Recording it in the fallback cache.");
                self.cache.mark_callback_sent(code).await;
            },
            Err(e) => error!("📮️ Could not confirm delivery of {code}: {e}"),
        }
        self.cache.delete(code).await;
    }

    async fn record_failure(&self, order: &Order, reason: &str) {
        let update = OrderUpdate::default().with_note(audit_note("webhook", &format!("Delivery failed: {reason}")));
        if let Err(e) = self.conn.update_order(&order.order_code, order.version, update).await {
            debug!("📮️ Could not note the failed delivery on {}: {e}", order.order_code);
        }
    }

    //-----------------------------------------   Fallback mode   -----------------------------------------------------

    /// Notifies the merchant using only the cached webhook context. Used when the primary store is unreachable.
    pub async fn send_from_cache(
        &self,
        code: &OrderCode,
        status: OrderStatusType,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        if !status.is_notifiable() {
            return Ok(DeliveryOutcome::Skipped(SkipReason::NotNotifiable));
        }
        if self.cache.is_callback_sent(code).await {
            return Ok(DeliveryOutcome::Skipped(SkipReason::AlreadySent));
        }
        let context = self.cache.get(code).await.hit().ok_or_else(|| DeliveryError::ContextUnavailable(code.clone()))?;
        if context.callback_url.trim().is_empty() {
            return Ok(DeliveryOutcome::Skipped(SkipReason::NoCallbackUrl));
        }
        let payload = payload_for_context(&context, status);
        let api_key = Secret::new(context.merchant_api_key.clone());
        let request = match self.config.mode_for(context.order_type) {
            DeliveryMode::Batch => WebhookRequest::batch(&context.callback_url, api_key, vec![payload]),
            DeliveryMode::Legacy => WebhookRequest::single(&context.callback_url, api_key, payload),
        };
        match self.transport.deliver(&request).await {
            Ok(()) => {
                info!("📮️ {code} delivered from the fallback cache as {status}");
                self.confirm_delivery(code).await;
                Ok(DeliveryOutcome::Sent)
            },
            Err(e) => {
                warn!("📮️ Fallback delivery of {code} failed: {e}");
                Ok(DeliveryOutcome::Failed(e.to_string()))
            },
        }
    }

    /// Settles a payment against the cached context while the store is down. If the payment covers the cached order
    /// amount, the merchant is told the order is complete; reconciliation catches up once the store is back, and the
    /// fallback sent-flag stops the merchant from hearing about it twice.
    pub async fn settle_from_cache(&self, code: &OrderCode, paid: Amount) -> Result<DeliveryOutcome, DeliveryError> {
        // The context is dropped after a confirmed send, so the flag has to be checked first
        if self.cache.is_callback_sent(code).await {
            return Ok(DeliveryOutcome::Skipped(SkipReason::AlreadySent));
        }
        let context = self.cache.get(code).await.hit().ok_or_else(|| DeliveryError::ContextUnavailable(code.clone()))?;
        match context.amount {
            Some(amount) if paid >= amount => self.send_from_cache(code, OrderStatusType::Completed).await,
            _ => {
                debug!("📮️ Payment of {paid} does not settle {code} from the cache");
                Ok(DeliveryOutcome::Skipped(SkipReason::NotNotifiable))
            },
        }
    }

    /// Stores the webhook context for an order so it can be notified without the primary store.
    pub async fn cache_context(
        &self,
        context: CachedWebhookContext,
        ttl: Option<Duration>,
    ) -> Result<(), DeliveryError> {
        if context.callback_url.trim().is_empty() {
            return Err(DeliveryError::InvalidRequest("callback URL is required".into()));
        }
        if context.merchant_api_key.trim().is_empty() {
            return Err(DeliveryError::InvalidRequest("merchant API key is required".into()));
        }
        if self.cache.get(&context.order_code).await.is_hit() {
            return Err(DeliveryError::ContextAlreadyCached(context.order_code));
        }
        self.cache.put(&context, ttl).await;
        debug!("📮️ Webhook context for {} cached", context.order_code);
        Ok(())
    }

    //-----------------------------------------   Bulk / manual   -----------------------------------------------------

    /// Resends notifications for the given orders, optionally forcing their status first.
    ///
    /// Previously confirmed orders are resent: their sent flag is reset. An override to `pending` reopens the order
    /// and never sends anything.
    pub async fn resend_bulk(
        &self,
        codes: &[OrderCode],
        status_override: Option<StatusOverride>,
        actor: &str,
    ) -> Result<DeliveryReport, DeliveryError> {
        if codes.is_empty() {
            return Err(DeliveryError::InvalidRequest("at least one order code is required".into()));
        }
        let filter = codes.iter().fold(OrderQueryFilter::default(), |f, c| f.with_order_code(c.clone()));
        let orders = self.conn.list_orders_for_update(filter, None).await?;
        let mut report = DeliveryReport::default();
        for code in codes {
            if !orders.iter().any(|o| &o.order_code == code) {
                report.push(code.clone(), DeliveryOutcome::Failed(format!("Order {code} does not exist")));
            }
        }
        report.extend(self.resend_orders(orders, status_override, actor).await?);
        Ok(report)
    }

    /// Resends notifications for every order whose callback URL contains `pattern`.
    pub async fn resend_by_callback_pattern(
        &self,
        pattern: &str,
        status_override: Option<StatusOverride>,
        actor: &str,
    ) -> Result<DeliveryReport, DeliveryError> {
        let pattern = pattern.trim();
        if pattern.chars().count() < MIN_CALLBACK_PATTERN_LEN {
            return Err(DeliveryError::InvalidRequest(format!(
                "callback pattern must be at least {MIN_CALLBACK_PATTERN_LEN} characters"
            )));
        }
        let filter = OrderQueryFilter::default().with_callback_containing(pattern).with_limit(MAX_BULK_RESEND);
        let orders = self.conn.list_orders_for_update(filter, None).await?;
        info!("📮️ {} orders match callback pattern '{pattern}'", orders.len());
        self.resend_orders(orders, status_override, actor).await
    }

    async fn resend_orders(
        &self,
        orders: Vec<Order>,
        status_override: Option<StatusOverride>,
        actor: &str,
    ) -> Result<DeliveryReport, DeliveryError> {
        let mut report = DeliveryReport::default();
        let mut to_send = Vec::with_capacity(orders.len());
        for order in orders {
            let order = match status_override {
                Some(status) => self.apply_override(order, status, actor).await?,
                None if order.is_sent_callback_notification && order.status.is_notifiable() => {
                    self.conn.set_notification_sent(&order.order_code, false).await?;
                    self.cache.clear_callback_sent(&order.order_code).await;
                    Order { is_sent_callback_notification: false, ..order }
                },
                None => order,
            };
            if order.status == OrderStatusType::Pending && status_override == Some(StatusOverride::Pending) {
                report.push(order.order_code.clone(), DeliveryOutcome::Skipped(SkipReason::PendingOverride));
                continue;
            }
            to_send.push(order);
        }
        report.extend(self.send_notifications(&to_send).await);
        Ok(report)
    }

    async fn apply_override(
        &self,
        mut order: Order,
        status: StatusOverride,
        actor: &str,
    ) -> Result<Order, DeliveryError> {
        let new_status = OrderStatusType::from(status);
        for _ in 0..OVERRIDE_RETRIES {
            let note = audit_note(actor, &format!("Manual override: {} -> {new_status}", order.status));
            let update =
                OrderUpdate::default().with_status(new_status).with_notification_sent(false).with_note(note);
            match self.conn.update_order(&order.order_code, order.version, update).await {
                Ok(updated) => {
                    self.cache.clear_callback_sent(&updated.order_code).await;
                    info!("📮️ {} manually moved to {new_status} by {actor}", updated.order_code);
                    return Ok(updated);
                },
                Err(StoreError::Conflict(_)) => {
                    order = self
                        .conn
                        .fetch_order_for_update(&order.order_code)
                        .await?
                        .ok_or_else(|| StoreError::NotFound(format!("Order {}", order.order_code)))?;
                },
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Conflict(order.order_code.to_string()).into())
    }

    //-----------------------------------------    Retry sweep    -----------------------------------------------------

    /// Retries notifications that were never confirmed, one order at a time.
    ///
    /// Does nothing while the primary store circuit is open: the sweep would only add load to a struggling store.
    pub async fn retry_sweep(&self) -> Result<SweepReport, DeliveryError> {
        if self.conn.is_primary_circuit_open() {
            info!("📮️ Store circuit is open. Skipping the webhook retry sweep.");
            return Ok(SweepReport { skipped: true, ..Default::default() });
        }
        let filter = OrderStatusType::notifiable()
            .into_iter()
            .fold(OrderQueryFilter::default(), |f, s| f.with_status(s))
            .with_notification_sent(false)
            .with_callback(true)
            .with_limit(self.config.retry_batch_size);
        let orders = self.conn.list_orders_for_update(filter, Some(RETRY_SWEEP_DEDUP_KEY)).await?;
        let mut report = DeliveryReport::default();
        for (i, order) in orders.iter().enumerate() {
            if i > 0 && !self.config.inter_request_delay.is_zero() {
                tokio::time::sleep(self.config.inter_request_delay).await;
            }
            report.extend(self.send_notification(order).await);
        }
        if !orders.is_empty() {
            info!(
                "📮️ Retry sweep: {} candidates. {} sent, {} failed, {} skipped",
                orders.len(),
                report.sent(),
                report.failed(),
                report.skipped()
            );
        }
        Ok(SweepReport { skipped: false, candidates: orders.len(), report })
    }

    pub async fn pending_notification_counts(&self) -> Result<PendingNotificationCounts, DeliveryError> {
        Ok(self.conn.count_pending_notifications().await?)
    }
}
