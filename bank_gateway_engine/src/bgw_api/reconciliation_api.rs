use std::fmt::Debug;

use bgw_common::Amount;
use log::*;

use crate::{
    bgw_api::{
        errors::ReconciliationError,
        objects::{ReconcileOutcome, ReconcileResult},
    },
    connection::ConnectionManager,
    db_types::{
        audit_note,
        entry_marker,
        AssignedUser,
        BankAccount,
        BankEntryStatus,
        BankEntryUpdate,
        BankTransactionEntry,
        NewBankEntry,
        NewBankTransaction,
        Order,
        OrderCode,
        OrderStatusType,
        OrderType,
        OrderUpdate,
        TransactionDirection,
    },
    events::{EntryUnlinkedEvent, EventProducers, OrderFinalizedEvent},
    helpers::extract_order_code,
    traits::{InsertBankEntryResult, OrderStore, StoreError},
};

pub const DEFAULT_MAX_CAS_RETRIES: usize = 3;

/// What a bank entry does to the order it was matched with. Computed from a snapshot of the order, so it can be
/// recomputed after losing a race.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PaymentPlan {
    /// The order is closed. Nothing changes.
    Ignore,
    Apply { update: OrderUpdate, outcome: ReconcileOutcome, entry_status: BankEntryStatus, message: String },
}

/// Works out the effect of paying `amount` into `order`.
///
/// * Open orders accumulate payments. The order completes once the requested amount is reached; any excess is moved
///   to `amount_overpaid` so that paid + unpaid always equals the requested amount.
/// * Money for an order that is already fully paid is routed as an overpayment: deposits become `available`,
///   withdraws become `duplicated`.
/// * Failed, canceled and already-rerouted orders are left alone.
pub(crate) fn plan_payment(order: &Order, amount: Amount, entry_id: i64, actor: &str) -> PaymentPlan {
    use OrderStatusType::*;
    let marker = entry_marker(entry_id);
    let fully_paid = order.amount_paid >= order.requested_amount && order.amount_unpaid <= Amount::ZERO;
    match order.status {
        Failed | Canceled | Available | Duplicated => PaymentPlan::Ignore,
        Completed => overpayment_plan(order, amount, &marker, actor),
        Pending | Processing if fully_paid => overpayment_plan(order, amount, &marker, actor),
        Pending | Processing => {
            let total = order.amount_paid + amount;
            if total >= order.requested_amount {
                let excess = total - order.requested_amount;
                let mut message = format!("Payment of {amount} completes the order {marker}");
                if excess.is_positive() {
                    message.push_str(&format!(". Overpaid by {excess}"));
                }
                let update = OrderUpdate::default()
                    .with_status(Completed)
                    .with_amounts(order.requested_amount, Amount::ZERO)
                    .with_overpaid(order.amount_overpaid + excess)
                    .with_suspicious(order.is_suspicious || excess.is_positive())
                    .with_note(audit_note(actor, &message));
                PaymentPlan::Apply {
                    update,
                    outcome: ReconcileOutcome::Completed,
                    entry_status: BankEntryStatus::Processed,
                    message,
                }
            } else {
                let unpaid = order.requested_amount - total;
                let message = format!("Partial payment of {amount}. {unpaid} still unpaid {marker}");
                let update = OrderUpdate::default()
                    .with_status(Processing)
                    .with_amounts(total, unpaid)
                    .with_note(audit_note(actor, &message));
                PaymentPlan::Apply {
                    update,
                    outcome: ReconcileOutcome::PartiallyPaid,
                    entry_status: BankEntryStatus::Processed,
                    message,
                }
            }
        },
    }
}

fn overpayment_plan(order: &Order, amount: Amount, marker: &str, actor: &str) -> PaymentPlan {
    let new_status = match order.order_type {
        OrderType::Deposit => OrderStatusType::Available,
        OrderType::Withdraw => OrderStatusType::Duplicated,
    };
    let message = format!(
        "Overpayment of {amount} on an order that was already paid in full. {} -> {new_status} {marker}",
        order.status
    );
    let update = OrderUpdate::default()
        .with_status(new_status)
        .with_overpaid(order.amount_overpaid + amount)
        .with_suspicious(true)
        .with_note(audit_note(actor, &message));
    PaymentPlan::Apply { update, outcome: ReconcileOutcome::Overpaid, entry_status: BankEntryStatus::Overpaid, message }
}

/// The outcome implied by the current state of an order that an entry has already been applied to.
fn outcome_of_applied(order: &Order) -> (ReconcileOutcome, BankEntryStatus) {
    match order.status {
        OrderStatusType::Available | OrderStatusType::Duplicated => {
            (ReconcileOutcome::Overpaid, BankEntryStatus::Overpaid)
        },
        OrderStatusType::Completed => (ReconcileOutcome::Completed, BankEntryStatus::Processed),
        _ => (ReconcileOutcome::PartiallyPaid, BankEntryStatus::Processed),
    }
}

fn assignee(account: &BankAccount) -> String {
    match &account.assigned_user {
        Some(AssignedUser::Resolved(id)) => format!("user #{}", id.0),
        Some(AssignedUser::Unresolved(reference)) => format!("unresolved user '{reference}'"),
        None => "no assigned user".to_string(),
    }
}

fn validate(tx: NewBankTransaction) -> Result<NewBankEntry, ReconciliationError> {
    let invalid = |msg: String| ReconciliationError::InvalidTransaction(msg);
    if tx.portal_id.trim().is_empty() || tx.portal_transaction_id.trim().is_empty() {
        return Err(invalid("The portal id and portal transaction id are required".into()));
    }
    if tx.bank_account_number.trim().is_empty() {
        return Err(invalid("The bank account number is required".into()));
    }
    let amount = Amount::try_from(tx.amount).map_err(|e| invalid(e.to_string()))?;
    if !amount.is_positive() {
        return Err(invalid(format!("The amount must be at least one whole unit. Got {}", tx.amount)));
    }
    let balance_after = tx.balance_after.map(Amount::try_from).transpose().map_err(|e| invalid(e.to_string()))?;
    Ok(NewBankEntry {
        order_code: extract_order_code(&tx.description),
        portal_id: tx.portal_id.trim().to_string(),
        portal_transaction_id: tx.portal_transaction_id.trim().to_string(),
        amount,
        direction: tx.direction,
        description: tx.description,
        balance_after,
        transaction_date: tx.transaction_date,
        actor: tx.actor,
    })
}

enum OrderApplication {
    NotFound,
    Ignored(Order),
    Applied { order: Order, outcome: ReconcileOutcome, entry_status: BankEntryStatus, message: String, fresh: bool },
}

/// `ReconciliationApi` matches incoming bank transactions to orders and applies their effect.
///
/// Every bank transaction is recorded first, keyed on its portal identifiers, so that a portal delivering the same
/// notification twice causes exactly one state change. The order itself is updated with a compare-and-swap on its
/// version; losing a race re-reads the order and recomputes the payment.
pub struct ReconciliationApi<B> {
    conn: ConnectionManager<B>,
    producers: EventProducers,
    max_cas_retries: usize,
}

impl<B> Debug for ReconciliationApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconciliationApi")
    }
}

impl<B> ReconciliationApi<B> {
    pub fn new(conn: ConnectionManager<B>, producers: EventProducers) -> Self {
        Self { conn, producers, max_cas_retries: DEFAULT_MAX_CAS_RETRIES }
    }

    pub fn with_max_cas_retries(mut self, retries: usize) -> Self {
        self.max_cas_retries = retries.max(1);
        self
    }
}

impl<B> ReconciliationApi<B>
where B: OrderStore
{
    /// Records a bank transaction reported by a bank portal and reconciles it against its order.
    ///
    /// Expected business outcomes (duplicates, unlinked money, overpayments, closed orders, unknown accounts) are
    /// returned as a [`ReconcileResult`]. Errors are reserved for invalid input and store failures. After a store
    /// failure the entry is left `pending`, and submitting the same transaction again picks up where this call left off.
    pub async fn record_bank_transaction(
        &self,
        tx: NewBankTransaction,
    ) -> Result<ReconcileResult, ReconciliationError> {
        let account_number = tx.bank_account_number.trim().to_string();
        let new_entry = validate(tx)?;
        let portal_key = format!("{}/{}", new_entry.portal_id, new_entry.portal_transaction_id);
        let actor = new_entry.actor.clone();
        trace!("🧾️ Recording bank transaction {portal_key}. Amount: {}", new_entry.amount);
        let entry = match self.conn.insert_bank_entry(new_entry).await? {
            InsertBankEntryResult::Inserted(entry) => entry,
            InsertBankEntryResult::AlreadyExists(entry) if entry.status == BankEntryStatus::Pending => {
                info!("🧾️ Bank transaction {portal_key} was recorded earlier but never finished. Resuming.");
                entry
            },
            InsertBankEntryResult::AlreadyExists(entry) => {
                info!("🧾️ Bank transaction {portal_key} has already been processed ({}). Ignoring.", entry.status);
                let message = format!("Bank transaction {portal_key} was already recorded as {}", entry.status);
                return Ok(ReconcileResult::new(ReconcileOutcome::Duplicated, &entry, message));
            },
        };

        let Some(account) = self.conn.fetch_bank_account_by_number(&account_number).await? else {
            let message = "The receiving bank account is not registered or is inactive".to_string();
            warn!("🧾️ {portal_key}: {message}");
            let update = BankEntryUpdate::new(BankEntryStatus::Failed).with_note(audit_note(&actor, &message));
            let entry = self.conn.update_bank_entry(entry.id, update).await?;
            return Ok(ReconcileResult::new(ReconcileOutcome::BankAccountNotFound, &entry, message));
        };
        trace!("🧾️ {portal_key} received on account #{} ({})", account.id, assignee(&account));

        let Some(code) = entry.order_code.clone() else {
            let message = format!(
                "No order code in the description '{}'. Needs manual reconciliation ({}).",
                entry.description,
                assignee(&account)
            );
            info!("🧾️ {portal_key}: {message}");
            let entry = self.finish_entry(&entry, &account, BankEntryStatus::Unlinked, &actor, &message).await?;
            self.producers.publish_entry_unlinked(EntryUnlinkedEvent::new(entry.clone(), message.clone())).await;
            return Ok(ReconcileResult::new(ReconcileOutcome::Unlinked, &entry, message));
        };

        let result = match self.apply_to_order(&code, &entry, &actor).await? {
            OrderApplication::NotFound => {
                let message = format!("Order {code} does not exist. Needs manual reconciliation.");
                info!("🧾️ {portal_key}: {message}");
                let entry = self.finish_entry(&entry, &account, BankEntryStatus::Unlinked, &actor, &message).await?;
                self.producers.publish_entry_unlinked(EntryUnlinkedEvent::new(entry.clone(), message.clone())).await;
                ReconcileResult::new(ReconcileOutcome::OrderNotFound, &entry, message)
            },
            OrderApplication::Ignored(order) => {
                let message = format!("Order {code} is already {}. The payment was not applied.", order.status);
                warn!("🧾️ {portal_key}: {message}");
                let entry = self.finish_entry(&entry, &account, BankEntryStatus::Ignored, &actor, &message).await?;
                ReconcileResult::new(ReconcileOutcome::Ignored, &entry, message).with_order(&order)
            },
            OrderApplication::Applied { order, outcome, entry_status, message, fresh } => {
                if entry.direction == TransactionDirection::Credit {
                    let account = self.conn.credit_bank_account(&entry, account.id).await?;
                    debug!("🧾️ Account #{} balance is now {}", account.id, account.balance);
                }
                let entry = self.finish_entry(&entry, &account, entry_status, &actor, &message).await?;
                info!("🧾️ {portal_key} applied to order {code}. {outcome}. Order is now {}", order.status);
                if fresh && outcome == ReconcileOutcome::Completed && order.status.is_notifiable() {
                    self.producers.publish_order_finalized(OrderFinalizedEvent::new(order.clone())).await;
                }
                ReconcileResult::new(outcome, &entry, message).with_order(&order)
            },
        };
        Ok(result)
    }

    /// Records a transaction that an operator has verified by hand. The operator is recorded as the actor.
    pub async fn replay_bank_transaction(
        &self,
        tx: NewBankTransaction,
        verified_by: &str,
    ) -> Result<ReconcileResult, ReconciliationError> {
        let verified_by = verified_by.trim();
        if verified_by.is_empty() {
            return Err(ReconciliationError::InvalidTransaction("A manual replay must name the verifier".into()));
        }
        info!("🧾️ Manual replay of {}/{} by {verified_by}", tx.portal_id, tx.portal_transaction_id);
        self.record_bank_transaction(tx.with_actor(format!("manual:{verified_by}"))).await
    }

    async fn apply_to_order(
        &self,
        code: &OrderCode,
        entry: &BankTransactionEntry,
        actor: &str,
    ) -> Result<OrderApplication, ReconciliationError> {
        for attempt in 1..=self.max_cas_retries {
            let Some(order) = self.conn.fetch_order_for_update(code).await? else {
                return Ok(OrderApplication::NotFound);
            };
            if order.has_applied_entry(entry.id) {
                debug!("🧾️ Entry #{} was already applied to {code}", entry.id);
                let (outcome, entry_status) = outcome_of_applied(&order);
                let message = format!("Payment was already applied to order {code} {}", entry_marker(entry.id));
                return Ok(OrderApplication::Applied { order, outcome, entry_status, message, fresh: false });
            }
            let (update, outcome, entry_status, message) = match plan_payment(&order, entry.amount, entry.id, actor) {
                PaymentPlan::Ignore => return Ok(OrderApplication::Ignored(order)),
                PaymentPlan::Apply { update, outcome, entry_status, message } => (update, outcome, entry_status, message),
            };
            match self.conn.update_order(code, order.version, update).await {
                Ok(order) => {
                    return Ok(OrderApplication::Applied { order, outcome, entry_status, message, fresh: true });
                },
                Err(StoreError::Conflict(_)) => {
                    debug!("🧾️ Order {code} changed while applying entry #{}. Attempt {attempt}", entry.id);
                },
                Err(e) => return Err(e.into()),
            }
        }
        warn!("🧾️ Gave up applying entry #{} to {code} after {} attempts", entry.id, self.max_cas_retries);
        Err(ReconciliationError::ContendedOrder(code.clone(), self.max_cas_retries))
    }

    async fn finish_entry(
        &self,
        entry: &BankTransactionEntry,
        account: &BankAccount,
        status: BankEntryStatus,
        actor: &str,
        message: &str,
    ) -> Result<BankTransactionEntry, ReconciliationError> {
        let update = BankEntryUpdate::new(status).with_account(account).with_note(audit_note(actor, message));
        Ok(self.conn.update_bank_entry(entry.id, update).await?)
    }
}

#[cfg(test)]
mod test {
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        connection::ConnectionConfig,
        events::EventProducer,
        test_utils::{bank_tx, seed_store, Fixture, MemoryStore},
    };

    fn order(status: OrderStatusType, order_type: OrderType, requested: i64, paid: i64) -> Order {
        let now = chrono::Utc::now();
        Order {
            id: 1,
            order_code: OrderCode::from("ABO20250101ABCDEFG"),
            order_type,
            status,
            requested_amount: Amount::from(requested),
            amount_paid: Amount::from(paid),
            amount_unpaid: Amount::from(requested - paid),
            amount_overpaid: Amount::ZERO,
            merchant_id: 1,
            merchant_order_id: "M-1".into(),
            callback_url: None,
            success_url: None,
            failure_url: None,
            cancel_url: None,
            bank_account_id: None,
            bank_receive_number: None,
            bank_receive_owner_name: None,
            is_sent_callback_notification: false,
            is_suspicious: false,
            notes: String::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn partial_payment_keeps_the_order_open() {
        let o = order(OrderStatusType::Pending, OrderType::Deposit, 100_000, 0);
        let PaymentPlan::Apply { update, outcome, .. } = plan_payment(&o, Amount::from(60_000), 9, "portal") else {
            panic!("expected a payment to be applied");
        };
        assert_eq!(outcome, ReconcileOutcome::PartiallyPaid);
        assert_eq!(update.status, Some(OrderStatusType::Processing));
        assert_eq!(update.amount_paid, Some(Amount::from(60_000)));
        assert_eq!(update.amount_unpaid, Some(Amount::from(40_000)));
        assert!(update.note.unwrap().contains("(entry #9)"));
    }

    #[test]
    fn excess_payment_completes_and_is_recorded() {
        let o = order(OrderStatusType::Processing, OrderType::Deposit, 100_000, 60_000);
        let PaymentPlan::Apply { update, outcome, .. } = plan_payment(&o, Amount::from(50_000), 10, "portal") else {
            panic!("expected a payment to be applied");
        };
        assert_eq!(outcome, ReconcileOutcome::Completed);
        assert_eq!(update.amount_paid, Some(Amount::from(100_000)));
        assert_eq!(update.amount_unpaid, Some(Amount::ZERO));
        assert_eq!(update.amount_overpaid, Some(Amount::from(10_000)));
        assert_eq!(update.is_suspicious, Some(true));
        assert!(update.note.unwrap().contains("Overpaid by"));
    }

    #[test]
    fn payment_on_a_paid_order_is_rerouted() {
        let deposit = order(OrderStatusType::Completed, OrderType::Deposit, 100_000, 100_000);
        let withdraw = order(OrderStatusType::Completed, OrderType::Withdraw, 100_000, 100_000);
        for (o, expected) in [(deposit, OrderStatusType::Available), (withdraw, OrderStatusType::Duplicated)] {
            let PaymentPlan::Apply { update, outcome, entry_status, .. } =
                plan_payment(&o, Amount::from(1_000), 11, "portal")
            else {
                panic!("expected an overpayment");
            };
            assert_eq!(outcome, ReconcileOutcome::Overpaid);
            assert_eq!(entry_status, BankEntryStatus::Overpaid);
            assert_eq!(update.status, Some(expected));
            assert_eq!(update.amount_paid, None);
            assert_eq!(update.amount_overpaid, Some(Amount::from(1_000)));
        }
    }

    #[test]
    fn closed_orders_are_left_alone() {
        for status in [
            OrderStatusType::Failed,
            OrderStatusType::Canceled,
            OrderStatusType::Available,
            OrderStatusType::Duplicated,
        ] {
            let o = order(status, OrderType::Deposit, 100_000, 0);
            assert_eq!(plan_payment(&o, Amount::from(100_000), 1, "portal"), PaymentPlan::Ignore);
        }
    }

    struct Harness {
        store: MemoryStore,
        fixture: Fixture,
        api: ReconciliationApi<MemoryStore>,
        finalized: mpsc::Receiver<OrderFinalizedEvent>,
        unlinked: mpsc::Receiver<EntryUnlinkedEvent>,
    }

    async fn harness() -> Harness {
        let _ = env_logger::try_init();
        let store = MemoryStore::default();
        let fixture = seed_store(&store).await.unwrap();
        let conn = ConnectionManager::new(store.clone(), None, ConnectionConfig::default());
        let (finalized_tx, finalized) = mpsc::channel(16);
        let (unlinked_tx, unlinked) = mpsc::channel(16);
        let producers = EventProducers {
            order_finalized_producer: vec![EventProducer::new(finalized_tx)],
            entry_unlinked_producer: vec![EventProducer::new(unlinked_tx)],
        };
        let api = ReconciliationApi::new(conn, producers);
        Harness { store, fixture, api, finalized, unlinked }
    }

    #[tokio::test]
    async fn full_payment_completes_the_order_once() {
        let mut h = harness().await;
        h.fixture.create_order(&h.store, "ABO20250101FULLPAY", OrderType::Deposit, 100_000).await.unwrap();
        let tx = bank_tx("tx-1", 100_000.0, "CK ABO20250101FULLPAY");
        let result = h.api.record_bank_transaction(tx.clone()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, ReconcileOutcome::Completed);
        let order = h.store.order("ABO20250101FULLPAY").unwrap();
        assert_eq!(order.status, OrderStatusType::Completed);
        assert_eq!(order.amount_unpaid, Amount::ZERO);
        assert_eq!(h.store.account(h.fixture.account.id).unwrap().balance, Amount::from(100_000));
        assert_eq!(h.finalized.try_recv().unwrap().order.order_code, order.order_code);

        let again = h.api.record_bank_transaction(tx).await.unwrap();
        assert_eq!(again.status, ReconcileOutcome::Duplicated);
        assert_eq!(h.store.account(h.fixture.account.id).unwrap().balance, Amount::from(100_000));
        assert_eq!(h.store.order("ABO20250101FULLPAY").unwrap().version, order.version);
        assert!(h.finalized.try_recv().is_err());
    }

    #[tokio::test]
    async fn reported_balance_wins_over_arithmetic() {
        let h = harness().await;
        h.fixture.create_order(&h.store, "ABO20250101BALANCE", OrderType::Deposit, 10_000).await.unwrap();
        let tx = bank_tx("tx-2", 10_000.7, "ABO20250101BALANCE").with_balance_after(5_000_000.0);
        let result = h.api.record_bank_transaction(tx).await.unwrap();
        assert_eq!(result.status, ReconcileOutcome::Completed);
        assert_eq!(h.store.account(h.fixture.account.id).unwrap().balance, Amount::from(5_000_000));
    }

    #[tokio::test]
    async fn debits_do_not_touch_the_balance() {
        let h = harness().await;
        h.fixture.create_order(&h.store, "ABO20250101WITHDRW", OrderType::Withdraw, 10_000).await.unwrap();
        let tx = bank_tx("tx-3", 10_000.0, "ABO20250101WITHDRW").with_direction(TransactionDirection::Debit);
        h.api.record_bank_transaction(tx).await.unwrap();
        assert_eq!(h.store.account(h.fixture.account.id).unwrap().balance, Amount::ZERO);
        assert_eq!(h.store.order("ABO20250101WITHDRW").unwrap().status, OrderStatusType::Completed);
    }

    #[tokio::test]
    async fn unattributed_money_is_unlinked() {
        let mut h = harness().await;
        let result = h.api.record_bank_transaction(bank_tx("tx-4", 50_000.0, "tien nha")).await.unwrap();
        assert_eq!(result.status, ReconcileOutcome::Unlinked);
        assert!(result.success);
        assert_eq!(h.store.entries()[0].status, BankEntryStatus::Unlinked);
        assert!(h.unlinked.try_recv().is_ok());

        let result = h.api.record_bank_transaction(bank_tx("tx-5", 50_000.0, "ABO20250101NOORDER")).await.unwrap();
        assert_eq!(result.status, ReconcileOutcome::OrderNotFound);
        assert_eq!(h.store.entries()[1].status, BankEntryStatus::Unlinked);
    }

    #[tokio::test]
    async fn unknown_account_fails_the_entry() {
        let h = harness().await;
        let mut tx = bank_tx("tx-6", 50_000.0, "ABO20250101ABCDEFG");
        tx.bank_account_number = "999".into();
        let result = h.api.record_bank_transaction(tx).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.status, ReconcileOutcome::BankAccountNotFound);
        assert_eq!(h.store.entries()[0].status, BankEntryStatus::Failed);
    }

    #[tokio::test]
    async fn invalid_amounts_are_rejected() {
        let h = harness().await;
        for amount in [0.0, -5.0, 0.9, f64::NAN] {
            let err = h.api.record_bank_transaction(bank_tx("tx-7", amount, "x")).await.unwrap_err();
            assert!(matches!(err, ReconciliationError::InvalidTransaction(_)));
        }
        assert!(h.store.entries().is_empty());
    }

    #[tokio::test]
    async fn lost_races_are_retried() {
        let h = harness().await;
        h.fixture.create_order(&h.store, "ABO20250101RACING1", OrderType::Deposit, 10_000).await.unwrap();
        h.store.force_conflicts(2);
        let result = h.api.record_bank_transaction(bank_tx("tx-8", 4_000.0, "ABO20250101RACING1")).await.unwrap();
        assert_eq!(result.status, ReconcileOutcome::PartiallyPaid);
        let order = h.store.order("ABO20250101RACING1").unwrap();
        assert_eq!(order.amount_paid + order.amount_unpaid, order.requested_amount);

        h.store.force_conflicts(3);
        let err = h.api.record_bank_transaction(bank_tx("tx-9", 1_000.0, "ABO20250101RACING1")).await.unwrap_err();
        assert!(matches!(err, ReconciliationError::ContendedOrder(_, 3)));
        // The entry stays pending, so resubmitting it finishes the job
        let result = h.api.record_bank_transaction(bank_tx("tx-9", 1_000.0, "ABO20250101RACING1")).await.unwrap();
        assert_eq!(result.status, ReconcileOutcome::PartiallyPaid);
        assert_eq!(h.store.order("ABO20250101RACING1").unwrap().amount_paid, Amount::from(5_000));
    }

    #[tokio::test]
    async fn resuming_an_unfinished_entry_does_not_credit_twice() {
        let mut h = harness().await;
        h.fixture.create_order(&h.store, "ABO20250101RESUME1", OrderType::Deposit, 100_000).await.unwrap();
        let tx = bank_tx("tx-11", 100_000.0, "ABO20250101RESUME1");
        let first = h.api.record_bank_transaction(tx.clone()).await.unwrap();
        assert_eq!(first.status, ReconcileOutcome::Completed);
        assert!(h.finalized.try_recv().is_ok());

        // As if the final entry update had been lost to an outage
        let entry_id = first.entry_id.unwrap();
        h.store.update_bank_entry(entry_id, BankEntryUpdate::new(BankEntryStatus::Pending)).await.unwrap();
        let version = h.store.order("ABO20250101RESUME1").unwrap().version;

        let resumed = h.api.record_bank_transaction(tx).await.unwrap();
        assert_eq!(resumed.status, ReconcileOutcome::Completed);
        assert_eq!(h.store.account(h.fixture.account.id).unwrap().balance, Amount::from(100_000));
        assert_eq!(h.store.order("ABO20250101RESUME1").unwrap().version, version);
        assert_eq!(h.store.entries()[0].status, BankEntryStatus::Processed);
        assert!(h.finalized.try_recv().is_err());
    }

    #[tokio::test]
    async fn payments_are_matched_against_the_primary() {
        let _ = env_logger::try_init();
        let primary = MemoryStore::new("memory://primary");
        let replica = MemoryStore::new("memory://replica");
        let fixture = seed_store(&primary).await.unwrap();
        fixture.create_order(&primary, "ABO20250101REPLAG1", OrderType::Deposit, 100_000).await.unwrap();
        // The replica has not seen the order, or anything else
        let conn = ConnectionManager::new(primary.clone(), Some(replica.clone()), ConnectionConfig::default());
        let api = ReconciliationApi::new(conn, EventProducers::default());

        let result = api.record_bank_transaction(bank_tx("tx-12", 100_000.0, "ABO20250101REPLAG1")).await.unwrap();
        assert_eq!(result.status, ReconcileOutcome::Completed);
        assert_eq!(primary.order("ABO20250101REPLAG1").unwrap().status, OrderStatusType::Completed);
        assert_eq!(primary.account(fixture.account.id).unwrap().balance, Amount::from(100_000));
        assert_eq!(replica.call_count(), 0);
    }

    #[tokio::test]
    async fn manual_replay_records_the_verifier() {
        let h = harness().await;
        h.fixture.create_order(&h.store, "ABO20250101MANUAL1", OrderType::Deposit, 10_000).await.unwrap();
        let tx = bank_tx("tx-10", 10_000.0, "ABO20250101MANUAL1");
        assert!(h.api.replay_bank_transaction(tx.clone(), " ").await.is_err());
        h.api.replay_bank_transaction(tx, "alice").await.unwrap();
        assert_eq!(h.store.entries()[0].actor, "manual:alice");
        assert!(h.store.order("ABO20250101MANUAL1").unwrap().notes.contains("manual:alice"));
    }
}
