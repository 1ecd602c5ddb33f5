use std::str::FromStr;

use bank_gateway_engine::{
    db_types::{CachedWebhookContext, OrderCode, OrderStatusType},
    fallback::webhook_context_key,
    helpers::extract_order_code,
    objects::DeliveryOutcome,
    test_utils::bank_tx,
    traits::{OrderQueryFilter, StoreError},
};
use bgw_common::Amount;
use cucumber::{then, when};

use crate::cucumber::GatewayWorld;

//----------------------------------------------   Reconciliation  ----------------------------------------------------

#[when(expr = "the bank reports transaction {word} of {int} with description {string}")]
async fn bank_reports(world: &mut GatewayWorld, tx_id: String, amount: i64, description: String) {
    #[allow(clippy::cast_precision_loss)]
    let tx = bank_tx(&tx_id, amount as f64, &description);
    let result = world.system().reconciliation.record_bank_transaction(tx).await.expect("Error recording transaction");
    world.last_result = Some(result);
}

#[then(expr = "the transaction is reported as {word}")]
async fn check_result(world: &mut GatewayWorld, outcome: String) {
    let result = world.last_result.as_ref().expect("No transaction was recorded");
    assert_eq!(result.status.to_string(), outcome, "Unexpected outcome: {}", result.message);
}

#[then(expr = "order {word} has status {word}")]
async fn check_status(world: &mut GatewayWorld, code: String, status: String) {
    let expected = OrderStatusType::from_str(&status).expect("Not a valid order status");
    assert_eq!(world.system().order(&code).status, expected);
}

#[then(expr = "order {word} is still open")]
async fn check_open(world: &mut GatewayWorld, code: String) {
    let order = world.system().order(&code);
    assert!(!order.status.is_terminal(), "Order is {}", order.status);
}

#[then(expr = "order {word} has {int} unpaid")]
async fn check_unpaid(world: &mut GatewayWorld, code: String, amount: i64) {
    assert_eq!(world.system().order(&code).amount_unpaid, Amount::from(amount));
}

#[then(expr = "order {word} has {int} overpaid")]
async fn check_overpaid(world: &mut GatewayWorld, code: String, amount: i64) {
    assert_eq!(world.system().order(&code).amount_overpaid, Amount::from(amount));
}

#[then(expr = "the payments on order {word} add up to the requested amount")]
async fn check_conservation(world: &mut GatewayWorld, code: String) {
    let order = world.system().order(&code);
    assert_eq!(order.amount_paid + order.amount_unpaid, order.requested_amount);
}

#[then(expr = "order {word} has a note mentioning {string}")]
async fn check_note(world: &mut GatewayWorld, code: String, text: String) {
    let notes = world.system().order(&code).notes;
    assert!(notes.contains(&text), "'{text}' not found in notes: {notes}");
}

#[then(expr = "order {word} is flagged as suspicious")]
async fn check_suspicious(world: &mut GatewayWorld, code: String) {
    assert!(world.system().order(&code).is_suspicious);
}

#[then(expr = "the bank account balance is {int}")]
async fn check_balance(world: &mut GatewayWorld, amount: i64) {
    let sys = world.system();
    let account = sys.store.account(sys.fixture.account.id).expect("Bank account does not exist");
    assert_eq!(account.balance, Amount::from(amount));
}

#[when(expr = "the description {string} is parsed")]
async fn parse_description(world: &mut GatewayWorld, description: String) {
    world.extracted_code = extract_order_code(&description);
}

#[then(expr = "the order code is {word}")]
async fn check_extracted(world: &mut GatewayWorld, code: String) {
    assert_eq!(world.extracted_code, Some(OrderCode::from(code.as_str())));
}

#[then("no order code is found")]
async fn check_not_extracted(world: &mut GatewayWorld) {
    assert!(world.extracted_code.is_none(), "Found {:?}", world.extracted_code);
}

//----------------------------------------------      Webhooks     ----------------------------------------------------

#[when("finalized orders are delivered")]
async fn deliver_finalized(world: &mut GatewayWorld) {
    let sys = world.system();
    let orders = sys.drain_finalized();
    let report = sys.delivery.send_notifications(&orders).await;
    world.last_report = Some(report);
}

#[when(expr = "notifications are sent for orders {string}")]
async fn send_for_orders(world: &mut GatewayWorld, codes: String) {
    let sys = world.system();
    let orders = codes.split(',').map(|c| sys.order(c.trim())).collect::<Vec<_>>();
    let report = sys.delivery.send_notifications(&orders).await;
    world.last_report = Some(report);
}

#[then(expr = "{int} webhook request(s) was/were sent")]
async fn check_request_count(world: &mut GatewayWorld, count: usize) {
    assert_eq!(world.system().transport.request_count(), count);
}

#[then(expr = "the last webhook request notified {string}")]
async fn check_last_request(world: &mut GatewayWorld, codes: String) {
    let requests = world.system().transport.requests();
    let last = requests.last().expect("No webhook was sent");
    let expected = codes.split(',').map(|c| c.trim().to_string()).collect::<Vec<_>>();
    assert_eq!(last.order_codes(), expected);
}

#[then(expr = "the notification for order {word} is skipped")]
async fn check_skipped(world: &mut GatewayWorld, code: String) {
    let report = world.last_report.as_ref().expect("Nothing was delivered");
    let outcome = report.outcome_for(&OrderCode::from(code.as_str()));
    assert!(matches!(outcome, Some(DeliveryOutcome::Skipped(_))), "Outcome was {outcome:?}");
}

#[then(expr = "order {word} is marked as notified")]
async fn check_notified(world: &mut GatewayWorld, code: String) {
    assert!(world.system().order(&code).is_sent_callback_notification);
}

//----------------------------------------------     Resilience    ----------------------------------------------------

#[when(expr = "the store is pinged {int} times")]
async fn ping_store(world: &mut GatewayWorld, times: usize) {
    let sys = world.system();
    for _ in 0..times {
        let _ = sys.conn.ping().await;
    }
}

#[then("the store circuit is open")]
async fn check_circuit_open(world: &mut GatewayWorld) {
    assert!(world.system().conn.is_primary_circuit_open());
}

#[then("the next store call fails fast without reaching the store")]
async fn check_fails_fast(world: &mut GatewayWorld) {
    let sys = world.system();
    sys.store.reset_call_count();
    let start = std::time::Instant::now();
    let result = sys.conn.list_orders(OrderQueryFilter::default(), None).await;
    assert!(matches!(result, Err(StoreError::Unavailable(_))), "Result was {result:?}");
    assert!(start.elapsed() < std::time::Duration::from_millis(100));
    assert_eq!(sys.store.call_count(), 0);
}

#[when(expr = "the webhook context for order {word} is cached")]
async fn cache_context(world: &mut GatewayWorld, code: String) {
    let sys = world.system();
    let order = sys.order(&code);
    let context = CachedWebhookContext::for_order(&order, &sys.fixture.merchant).expect("Order has no callback URL");
    sys.delivery.cache_context(context, None).await.expect("Error caching webhook context");
}

#[when("the in-process cache is cleared")]
async fn clear_memory(world: &mut GatewayWorld) {
    world.system().cache.clear_memory();
}

#[then(expr = "the webhook context for order {word} is found")]
async fn check_context_found(world: &mut GatewayWorld, code: String) {
    let lookup = world.system().cache.get(&OrderCode::from(code.as_str())).await;
    assert!(lookup.is_hit());
}

#[then(expr = "the in-process cache holds the webhook context for order {word}")]
async fn check_context_in_memory(world: &mut GatewayWorld, code: String) {
    let key = webhook_context_key(&OrderCode::from(code.as_str()));
    assert!(world.system().cache.in_memory(&key));
}

#[when(expr = "a payment of {int} for order {word} is settled from the cache")]
async fn settle_from_cache(world: &mut GatewayWorld, amount: i64, code: String) {
    let sys = world.system();
    let outcome = sys
        .delivery
        .settle_from_cache(&OrderCode::from(code.as_str()), Amount::from(amount))
        .await
        .expect("Error settling from the cache");
    let mut report = world.last_report.take().unwrap_or_default();
    report.push(OrderCode::from(code.as_str()), outcome);
    world.last_report = Some(report);
}
