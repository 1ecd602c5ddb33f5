use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
        Mutex,
        MutexGuard,
    },
    time::Duration,
};

use bgw_common::Amount;
use chrono::Utc;

use crate::{
    db_types::{
        BankAccount,
        BankEntryStatus,
        BankEntryUpdate,
        BankTransactionEntry,
        Merchant,
        NewBankAccount,
        NewBankEntry,
        NewMerchant,
        NewOrder,
        Order,
        OrderCode,
        OrderStatusType,
        OrderUpdate,
    },
    traits::{DocumentQuery, Documents, InsertBankEntryResult, OrderStore, PendingNotificationCounts, StoreError},
};

#[derive(Default)]
struct State {
    orders: Vec<Order>,
    entries: Vec<BankTransactionEntry>,
    accounts: Vec<BankAccount>,
    merchants: Vec<Merchant>,
    credited_entries: HashSet<i64>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn order_mut(&mut self, code: &OrderCode) -> Result<&mut Order, StoreError> {
        self.orders
            .iter_mut()
            .find(|o| &o.order_code == code)
            .ok_or_else(|| StoreError::NotFound(format!("Order {code}")))
    }
}

fn append_note(notes: &mut String, note: String) {
    if !notes.is_empty() {
        notes.push('\n');
    }
    notes.push_str(&note);
}

struct Inner {
    name: String,
    state: Mutex<State>,
    offline: AtomicBool,
    latency_ms: AtomicU64,
    calls: AtomicUsize,
    forced_conflicts: AtomicUsize,
}

/// An [`OrderStore`] that keeps everything in memory.
///
/// Clones share state. Outages, latency and lost compare-and-swap races can be injected, and every call is counted so
/// that tests can assert on how many round trips reached the store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory://primary")
    }
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        let inner = Inner {
            name: name.to_string(),
            state: Mutex::new(State::default()),
            offline: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
            forced_conflicts: AtomicUsize::new(0),
        };
        Self { inner: Arc::new(inner) }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// While offline, every call fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.inner.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// The next `n` order updates behave as if another writer got there first: the stored version is bumped and the
    /// update fails with a conflict.
    pub fn force_conflicts(&self, n: usize) {
        self.inner.forced_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn reset_call_count(&self) {
        self.inner.calls.store(0, Ordering::SeqCst);
    }

    pub fn order(&self, code: &str) -> Option<Order> {
        let code = OrderCode::from(code);
        self.state().orders.iter().find(|o| o.order_code == code).cloned()
    }

    pub fn entries(&self) -> Vec<BankTransactionEntry> {
        self.state().entries.clone()
    }

    pub fn account(&self, id: i64) -> Option<BankAccount> {
        self.state().accounts.iter().find(|a| a.id == id).cloned()
    }

    /// Overwrites an order without any version check. For setting up scenarios only.
    pub fn put_order(&self, order: Order) {
        let mut state = self.state();
        match state.orders.iter_mut().find(|o| o.order_code == order.order_code) {
            Some(existing) => *existing = order,
            None => state.orders.push(order),
        }
    }

    async fn enter(&self) -> Result<(), StoreError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.inner.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{} is offline", self.inner.name)));
        }
        Ok(())
    }
}

impl OrderStore for MemoryStore {
    fn url(&self) -> &str {
        &self.inner.name
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.enter().await
    }

    async fn list_documents(&self, query: &DocumentQuery) -> Result<Documents, StoreError> {
        self.enter().await?;
        let state = self.state();
        let docs = match query {
            DocumentQuery::Orders(filter) => {
                let mut orders = state.orders.iter().filter(|o| filter.matches(o)).cloned().collect::<Vec<_>>();
                orders.sort_by_key(|o| o.created_at);
                if let Some(limit) = filter.limit {
                    orders.truncate(limit as usize);
                }
                Documents::Orders(orders)
            },
            DocumentQuery::BankEntries(filter) => {
                let mut entries = state.entries.iter().filter(|e| filter.matches(e)).cloned().collect::<Vec<_>>();
                if let Some(limit) = filter.limit {
                    entries.truncate(limit as usize);
                }
                Documents::BankEntries(entries)
            },
            DocumentQuery::BankAccounts(filter) => {
                Documents::BankAccounts(state.accounts.iter().filter(|a| filter.matches(a)).cloned().collect())
            },
            DocumentQuery::Merchants(filter) => {
                Documents::Merchants(state.merchants.iter().filter(|m| filter.matches(m)).cloned().collect())
            },
        };
        Ok(docs)
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        self.enter().await?;
        let mut state = self.state();
        if state.orders.iter().any(|o| o.order_code == order.order_code) {
            return Err(StoreError::Backend(format!("Order {} already exists", order.order_code)));
        }
        let now = Utc::now();
        let order = Order {
            id: state.next_id(),
            order_code: order.order_code,
            order_type: order.order_type,
            status: OrderStatusType::Pending,
            requested_amount: order.requested_amount,
            amount_paid: Amount::ZERO,
            amount_unpaid: order.requested_amount,
            amount_overpaid: Amount::ZERO,
            merchant_id: order.merchant_id,
            merchant_order_id: order.merchant_order_id,
            callback_url: order.callback_url,
            success_url: order.success_url,
            failure_url: order.failure_url,
            cancel_url: order.cancel_url,
            bank_account_id: order.bank_account_id,
            bank_receive_number: order.bank_receive_number,
            bank_receive_owner_name: order.bank_receive_owner_name,
            is_sent_callback_notification: false,
            is_suspicious: false,
            notes: String::new(),
            version: 1,
            created_at: order.created_at,
            updated_at: now,
        };
        state.orders.push(order.clone());
        Ok(order)
    }

    async fn update_order(
        &self,
        code: &OrderCode,
        expected_version: i64,
        update: OrderUpdate,
    ) -> Result<Order, StoreError> {
        self.enter().await?;
        let forced = self
            .inner
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let mut state = self.state();
        let order = state.order_mut(code)?;
        if forced {
            order.version += 1;
        }
        if order.version != expected_version {
            return Err(StoreError::Conflict(code.to_string()));
        }
        if let Some(status) = update.status {
            order.status = status;
        }
        if let Some(paid) = update.amount_paid {
            order.amount_paid = paid;
        }
        if let Some(unpaid) = update.amount_unpaid {
            order.amount_unpaid = unpaid;
        }
        if let Some(overpaid) = update.amount_overpaid {
            order.amount_overpaid = overpaid;
        }
        if let Some(sent) = update.is_sent_callback_notification {
            order.is_sent_callback_notification = sent;
        }
        if let Some(suspicious) = update.is_suspicious {
            order.is_suspicious = suspicious;
        }
        if let Some(note) = update.note {
            append_note(&mut order.notes, note);
        }
        order.version += 1;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn set_notification_sent(&self, code: &OrderCode, sent: bool) -> Result<(), StoreError> {
        self.enter().await?;
        let mut state = self.state();
        let order = state.order_mut(code)?;
        order.is_sent_callback_notification = sent;
        order.version += 1;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_bank_entry(&self, entry: NewBankEntry) -> Result<InsertBankEntryResult, StoreError> {
        self.enter().await?;
        let mut state = self.state();
        let existing = state
            .entries
            .iter()
            .find(|e| e.portal_id == entry.portal_id && e.portal_transaction_id == entry.portal_transaction_id);
        if let Some(existing) = existing {
            return Ok(InsertBankEntryResult::AlreadyExists(existing.clone()));
        }
        let now = Utc::now();
        let entry = BankTransactionEntry {
            id: state.next_id(),
            portal_id: entry.portal_id,
            portal_transaction_id: entry.portal_transaction_id,
            order_code: entry.order_code,
            bank_account_id: None,
            bank_code: None,
            amount: entry.amount,
            direction: entry.direction,
            description: entry.description,
            balance_after: entry.balance_after,
            transaction_date: entry.transaction_date,
            status: BankEntryStatus::Pending,
            actor: entry.actor,
            notes: String::new(),
            created_at: now,
            updated_at: now,
        };
        state.entries.push(entry.clone());
        Ok(InsertBankEntryResult::Inserted(entry))
    }

    async fn update_bank_entry(&self, id: i64, update: BankEntryUpdate) -> Result<BankTransactionEntry, StoreError> {
        self.enter().await?;
        let mut state = self.state();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("Bank entry #{id}")))?;
        if let Some(status) = update.status {
            entry.status = status;
        }
        if let Some(account_id) = update.bank_account_id {
            entry.bank_account_id = Some(account_id);
        }
        if let Some(bank_code) = update.bank_code {
            entry.bank_code = Some(bank_code);
        }
        if let Some(note) = update.note {
            append_note(&mut entry.notes, note);
        }
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn credit_bank_account(
        &self,
        entry_id: i64,
        account_id: i64,
        amount: Amount,
        balance_after: Option<Amount>,
    ) -> Result<BankAccount, StoreError> {
        self.enter().await?;
        let mut state = self.state();
        if !state.entries.iter().any(|e| e.id == entry_id) {
            return Err(StoreError::NotFound(format!("Bank entry #{entry_id}")));
        }
        let first_credit = state.credited_entries.insert(entry_id);
        let account = state
            .accounts
            .iter_mut()
            .find(|a| a.id == account_id)
            .ok_or_else(|| StoreError::NotFound(format!("Bank account #{account_id}")))?;
        if first_credit {
            account.balance = balance_after.unwrap_or(account.balance + amount);
            account.updated_at = Utc::now();
        }
        Ok(account.clone())
    }

    async fn insert_bank_account(&self, account: NewBankAccount) -> Result<BankAccount, StoreError> {
        self.enter().await?;
        let mut state = self.state();
        let now = Utc::now();
        let account = BankAccount {
            id: state.next_id(),
            bank_code: account.bank_code,
            account_number: account.account_number,
            owner_name: account.owner_name,
            balance: account.balance,
            assigned_user: account.assigned_user,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.accounts.push(account.clone());
        Ok(account)
    }

    async fn insert_merchant(&self, merchant: NewMerchant) -> Result<Merchant, StoreError> {
        self.enter().await?;
        let mut state = self.state();
        let merchant = Merchant {
            id: state.next_id(),
            name: merchant.name,
            display_name: merchant.display_name,
            api_key: merchant.api_key,
            created_at: Utc::now(),
        };
        state.merchants.push(merchant.clone());
        Ok(merchant)
    }

    async fn count_pending_notifications(&self) -> Result<PendingNotificationCounts, StoreError> {
        self.enter().await?;
        let state = self.state();
        let mut counts = PendingNotificationCounts::default();
        state
            .orders
            .iter()
            .filter(|o| o.status.is_notifiable() && !o.is_sent_callback_notification && o.has_callback())
            .for_each(|o| counts.add(o.order_type, 1));
        Ok(counts)
    }
}
