use bank_gateway_engine::{
    connection::{ConnectionConfig, ConnectionManager},
    db_types::{BankEntryStatus, BankEntryUpdate, OrderCode, OrderStatusType, OrderType},
    events::{EventProducer, EventProducers, OrderFinalizedEvent},
    fallback::{FallbackCacheConfig, FallbackCacheStore},
    objects::{DeliveryOutcome, ReconcileOutcome},
    test_utils::{bank_tx, prepare_env::TestDatabase, seed_store, Fixture, MemoryKeyValueStore, RecordingTransport},
    traits::{BankAccountQueryFilter, BankEntryQueryFilter, DocumentQuery, OrderStore},
    DeliveryApi,
    DeliveryConfig,
    ExpiryApi,
    ReconciliationApi,
    SqliteDatabase,
};
use bgw_common::Amount;
use chrono::Utc;
use tokio::sync::mpsc;

struct System {
    test_db: TestDatabase,
    fixture: Fixture,
    reconciliation: ReconciliationApi<SqliteDatabase>,
    delivery: DeliveryApi<SqliteDatabase, MemoryKeyValueStore, RecordingTransport>,
    transport: RecordingTransport,
    finalized: mpsc::Receiver<OrderFinalizedEvent>,
}

impl System {
    async fn new() -> Self {
        let test_db = TestDatabase::new().await;
        let fixture = seed_store(&test_db.db).await.expect("Error seeding database");
        let conn = ConnectionManager::new(test_db.db.clone(), None, ConnectionConfig::default());
        let (tx, finalized) = mpsc::channel(32);
        let producers = EventProducers {
            order_finalized_producer: vec![EventProducer::new(tx)],
            ..Default::default()
        };
        let reconciliation = ReconciliationApi::new(conn.clone(), producers);
        let cache = FallbackCacheStore::new(Some(MemoryKeyValueStore::default()), FallbackCacheConfig::default());
        let transport = RecordingTransport::default();
        let delivery = DeliveryApi::new(conn, cache, transport.clone(), DeliveryConfig::default());
        Self { test_db, fixture, reconciliation, delivery, transport, finalized }
    }

    fn db(&self) -> &SqliteDatabase {
        &self.test_db.db
    }

    async fn balance(&self) -> Amount {
        let query = DocumentQuery::BankAccounts(BankAccountQueryFilter::default().with_id(self.fixture.account.id));
        let accounts = self.db().list_documents(&query).await.unwrap().into_bank_accounts().unwrap();
        accounts[0].balance
    }

    async fn order(&self, code: &str) -> bank_gateway_engine::db_types::Order {
        self.db().fetch_order(&OrderCode::from(code)).await.expect("Error fetching order").expect("Order does not exist")
    }

    /// Forwards every finalized order to the delivery engine, the way the server wires the hook.
    async fn deliver_finalized(&mut self) -> usize {
        let mut orders = Vec::new();
        while let Ok(event) = self.finalized.try_recv() {
            orders.push(event.order);
        }
        let report = self.delivery.send_notifications(&orders).await;
        report.sent()
    }
}

#[tokio::test]
async fn deposit_paid_in_full_is_completed_and_notified() {
    let mut sys = System::new().await;
    sys.fixture.create_order(sys.db(), "ABO20250101ABCDEFG", OrderType::Deposit, 100_000).await.unwrap();

    let tx = bank_tx("ft-1001", 100_000.0, "ABO20250101ABCDEFG other text");
    let result = sys.reconciliation.record_bank_transaction(tx).await.unwrap();
    assert_eq!(result.status, ReconcileOutcome::Completed);

    let order = sys.order("ABO20250101ABCDEFG").await;
    assert_eq!(order.status, OrderStatusType::Completed);
    assert_eq!(order.amount_unpaid, Amount::ZERO);
    assert!(!order.is_sent_callback_notification);

    assert_eq!(sys.deliver_finalized().await, 1);
    assert_eq!(sys.transport.request_count(), 1);
    assert_eq!(sys.transport.delivered_codes(), vec!["ABO20250101ABCDEFG".to_string()]);
    assert!(sys.order("ABO20250101ABCDEFG").await.is_sent_callback_notification);

    // A second round does not notify again
    let report = sys.delivery.send_notifications(&[sys.order("ABO20250101ABCDEFG").await]).await;
    assert_eq!(report.skipped(), 1);
    assert_eq!(sys.transport.request_count(), 1);
}

#[tokio::test]
async fn partial_payments_conserve_the_requested_amount() {
    let mut sys = System::new().await;
    sys.fixture.create_order(sys.db(), "ABO20250101PARTIAL", OrderType::Deposit, 100_000).await.unwrap();

    let first = sys.reconciliation.record_bank_transaction(bank_tx("ft-1", 60_000.0, "ABO20250101PARTIAL")).await;
    assert_eq!(first.unwrap().status, ReconcileOutcome::PartiallyPaid);
    let order = sys.order("ABO20250101PARTIAL").await;
    assert!(!order.status.is_terminal());
    assert_eq!(order.amount_unpaid, Amount::from(40_000));
    assert_eq!(order.amount_paid + order.amount_unpaid, order.requested_amount);
    assert_eq!(sys.deliver_finalized().await, 0);

    let second = sys.reconciliation.record_bank_transaction(bank_tx("ft-2", 50_000.0, "ABO20250101PARTIAL")).await;
    assert_eq!(second.unwrap().status, ReconcileOutcome::Completed);
    let order = sys.order("ABO20250101PARTIAL").await;
    assert_eq!(order.status, OrderStatusType::Completed);
    assert_eq!(order.amount_unpaid, Amount::ZERO);
    assert_eq!(order.amount_paid + order.amount_unpaid, order.requested_amount);
    assert_eq!(order.amount_overpaid, Amount::from(10_000));
    assert!(order.is_suspicious);
    assert!(order.notes.to_lowercase().contains("overpa"), "Notes were: {}", order.notes);
    assert_eq!(sys.deliver_finalized().await, 1);
}

#[tokio::test]
async fn paying_a_completed_order_again_routes_the_overpayment() {
    let sys = System::new().await;
    sys.fixture.create_order(sys.db(), "ABO20250101DEPOSIT", OrderType::Deposit, 50_000).await.unwrap();
    sys.fixture.create_order(sys.db(), "ABO20250101WITHDRW", OrderType::Withdraw, 50_000).await.unwrap();
    for (i, code) in ["ABO20250101DEPOSIT", "ABO20250101WITHDRW"].iter().enumerate() {
        let paid = sys.reconciliation.record_bank_transaction(bank_tx(&format!("a-{i}"), 50_000.0, code)).await;
        assert_eq!(paid.unwrap().status, ReconcileOutcome::Completed);
        let again = sys.reconciliation.record_bank_transaction(bank_tx(&format!("b-{i}"), 50_000.0, code)).await;
        assert_eq!(again.unwrap().status, ReconcileOutcome::Overpaid);
    }
    let deposit = sys.order("ABO20250101DEPOSIT").await;
    assert_eq!(deposit.status, OrderStatusType::Available);
    assert_eq!(deposit.amount_overpaid, Amount::from(50_000));
    let withdraw = sys.order("ABO20250101WITHDRW").await;
    assert_eq!(withdraw.status, OrderStatusType::Duplicated);
    assert!(withdraw.is_suspicious);
}

#[tokio::test]
async fn the_same_bank_transaction_is_applied_once() {
    let sys = System::new().await;
    sys.fixture.create_order(sys.db(), "ABO20250101IDEMPOT", OrderType::Deposit, 100_000).await.unwrap();
    let tx = bank_tx("ft-dup", 30_000.0, "Thanh toan ABO20250101IDEMPOT");
    let first = sys.reconciliation.record_bank_transaction(tx.clone()).await.unwrap();
    let second = sys.reconciliation.record_bank_transaction(tx).await.unwrap();
    assert_eq!(first.status, ReconcileOutcome::PartiallyPaid);
    assert_eq!(second.status, ReconcileOutcome::Duplicated);
    assert_eq!(second.entry_id, first.entry_id);

    let order = sys.order("ABO20250101IDEMPOT").await;
    assert_eq!(order.amount_paid, Amount::from(30_000));
    let query = DocumentQuery::BankEntries(BankEntryQueryFilter::default().with_portal_transaction("test-portal", "ft-dup"));
    let entries = sys.db().list_documents(&query).await.unwrap().into_bank_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, BankEntryStatus::Processed);
}

#[tokio::test]
async fn resuming_an_unfinished_entry_credits_the_account_once() {
    let sys = System::new().await;
    sys.fixture.create_order(sys.db(), "ABO20250101RESUME2", OrderType::Deposit, 100_000).await.unwrap();
    let tx = bank_tx("ft-resume", 100_000.0, "ABO20250101RESUME2");
    let first = sys.reconciliation.record_bank_transaction(tx.clone()).await.unwrap();
    assert_eq!(first.status, ReconcileOutcome::Completed);
    assert_eq!(sys.balance().await, Amount::from(100_000));

    let entry_id = first.entry_id.unwrap();
    sys.db().update_bank_entry(entry_id, BankEntryUpdate::new(BankEntryStatus::Pending)).await.unwrap();
    let resumed = sys.reconciliation.record_bank_transaction(tx).await.unwrap();
    assert_eq!(resumed.status, ReconcileOutcome::Completed);
    assert_eq!(sys.balance().await, Amount::from(100_000));
    assert_eq!(sys.order("ABO20250101RESUME2").await.amount_paid, Amount::from(100_000));
}

#[tokio::test]
async fn unattributed_credits_are_left_unlinked() {
    let sys = System::new().await;
    let result = sys.reconciliation.record_bank_transaction(bank_tx("ft-x", 10_000.0, "no code here")).await.unwrap();
    assert!(result.success);
    assert_eq!(result.status, ReconcileOutcome::Unlinked);
    assert!(result.order_code.is_none());

    let result =
        sys.reconciliation.record_bank_transaction(bank_tx("ft-y", 10_000.0, "ABO20250101NOORDER")).await.unwrap();
    assert_eq!(result.status, ReconcileOutcome::OrderNotFound);
    let query = DocumentQuery::BankEntries(BankEntryQueryFilter::default().with_status(BankEntryStatus::Unlinked));
    let entries = sys.db().list_documents(&query).await.unwrap().into_bank_entries().unwrap();
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn stale_orders_expire_and_are_notified_as_failed() {
    let mut sys = System::new().await;
    let stale = sys
        .fixture
        .new_order("ABO20250101EXPIRES", OrderType::Withdraw, 20_000)
        .with_created_at(Utc::now() - chrono::Duration::hours(2));
    sys.db().insert_order(stale).await.unwrap();
    sys.fixture.create_order(sys.db(), "ABO20250101FRESHOR", OrderType::Deposit, 20_000).await.unwrap();
    let conn = ConnectionManager::new(sys.db().clone(), None, ConnectionConfig::default());
    let (tx, mut finalized) = mpsc::channel(8);
    let producers = EventProducers { order_finalized_producer: vec![EventProducer::new(tx)], ..Default::default() };
    let expiry = ExpiryApi::new(conn, producers);

    let result = expiry.expire_orders(std::time::Duration::from_secs(3600)).await.unwrap();
    assert!(!result.skipped);
    assert_eq!(result.expired, vec![OrderCode::from("ABO20250101EXPIRES")]);
    let order = sys.order("ABO20250101EXPIRES").await;
    assert_eq!(order.status, OrderStatusType::Failed);
    assert_eq!(sys.order("ABO20250101FRESHOR").await.status, OrderStatusType::Pending);

    let event = finalized.try_recv().unwrap();
    let report = sys.delivery.send_notifications(&[event.order]).await;
    assert_eq!(report.outcome_for(&order.order_code), Some(&DeliveryOutcome::Sent));
    assert_eq!(sys.deliver_finalized().await, 0);
}
