use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{BankAccount, BankEntryStatus, BankTransactionEntry, Merchant, Order, OrderCode, OrderStatusType, OrderType},
    traits::StoreError,
};

#[derive(Debug, Clone)]
pub enum InsertBankEntryResult {
    Inserted(BankTransactionEntry),
    AlreadyExists(BankTransactionEntry),
}

//--------------------------------------    Document queries  ---------------------------------------------------------

/// A read against one of the store's collections.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentQuery {
    Orders(OrderQueryFilter),
    BankEntries(BankEntryQueryFilter),
    BankAccounts(BankAccountQueryFilter),
    Merchants(MerchantQueryFilter),
}

impl DocumentQuery {
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Orders(_) => "orders",
            Self::BankEntries(_) => "bank_transactions",
            Self::BankAccounts(_) => "bank_accounts",
            Self::Merchants(_) => "merchants",
        }
    }
}

/// The result of a [`DocumentQuery`]. The variant always matches the query's collection.
#[derive(Debug, Clone)]
pub enum Documents {
    Orders(Vec<Order>),
    BankEntries(Vec<BankTransactionEntry>),
    BankAccounts(Vec<BankAccount>),
    Merchants(Vec<Merchant>),
}

impl Documents {
    pub fn len(&self) -> usize {
        match self {
            Self::Orders(v) => v.len(),
            Self::BankEntries(v) => v.len(),
            Self::BankAccounts(v) => v.len(),
            Self::Merchants(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_orders(self) -> Result<Vec<Order>, StoreError> {
        match self {
            Self::Orders(v) => Ok(v),
            other => Err(mismatch("orders", &other)),
        }
    }

    pub fn into_bank_entries(self) -> Result<Vec<BankTransactionEntry>, StoreError> {
        match self {
            Self::BankEntries(v) => Ok(v),
            other => Err(mismatch("bank_transactions", &other)),
        }
    }

    pub fn into_bank_accounts(self) -> Result<Vec<BankAccount>, StoreError> {
        match self {
            Self::BankAccounts(v) => Ok(v),
            other => Err(mismatch("bank_accounts", &other)),
        }
    }

    pub fn into_merchants(self) -> Result<Vec<Merchant>, StoreError> {
        match self {
            Self::Merchants(v) => Ok(v),
            other => Err(mismatch("merchants", &other)),
        }
    }
}

fn mismatch(expected: &str, got: &Documents) -> StoreError {
    let got = match got {
        Documents::Orders(_) => "orders",
        Documents::BankEntries(_) => "bank_transactions",
        Documents::BankAccounts(_) => "bank_accounts",
        Documents::Merchants(_) => "merchants",
    };
    StoreError::Backend(format!("Expected {expected} documents, but the store returned {got}"))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderQueryFilter {
    pub order_codes: Vec<OrderCode>,
    pub order_type: Option<OrderType>,
    pub statuses: Vec<OrderStatusType>,
    pub created_before: Option<DateTime<Utc>>,
    pub notification_sent: Option<bool>,
    pub has_callback: Option<bool>,
    pub callback_contains: Option<String>,
    pub limit: Option<u32>,
}

impl OrderQueryFilter {
    pub fn with_order_code(mut self, code: OrderCode) -> Self {
        self.order_codes.push(code);
        self
    }

    pub fn with_order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = Some(order_type);
        self
    }

    pub fn with_status(mut self, status: OrderStatusType) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn created_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.created_before = Some(cutoff);
        self
    }

    pub fn with_notification_sent(mut self, sent: bool) -> Self {
        self.notification_sent = Some(sent);
        self
    }

    pub fn with_callback(mut self, has_callback: bool) -> Self {
        self.has_callback = Some(has_callback);
        self
    }

    pub fn with_callback_containing<S: Into<String>>(mut self, pattern: S) -> Self {
        self.callback_contains = Some(pattern.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.order_codes.is_empty() &&
            self.order_type.is_none() &&
            self.statuses.is_empty() &&
            self.created_before.is_none() &&
            self.notification_sent.is_none() &&
            self.has_callback.is_none() &&
            self.callback_contains.is_none()
    }

    /// The same predicate the SQL backends apply, for in-memory stores and tests.
    pub fn matches(&self, order: &Order) -> bool {
        (self.order_codes.is_empty() || self.order_codes.contains(&order.order_code)) &&
            self.order_type.map(|t| t == order.order_type).unwrap_or(true) &&
            (self.statuses.is_empty() || self.statuses.contains(&order.status)) &&
            self.created_before.map(|c| order.created_at < c).unwrap_or(true) &&
            self.notification_sent.map(|s| s == order.is_sent_callback_notification).unwrap_or(true) &&
            self.has_callback.map(|h| h == order.has_callback()).unwrap_or(true) &&
            self.callback_contains
                .as_ref()
                .map(|p| order.callback_url.as_deref().unwrap_or_default().contains(p.as_str()))
                .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BankEntryQueryFilter {
    pub portal_key: Option<(String, String)>,
    pub order_code: Option<OrderCode>,
    pub statuses: Vec<BankEntryStatus>,
    pub limit: Option<u32>,
}

impl BankEntryQueryFilter {
    pub fn with_portal_transaction<S: Into<String>>(mut self, portal_id: S, portal_transaction_id: S) -> Self {
        self.portal_key = Some((portal_id.into(), portal_transaction_id.into()));
        self
    }

    pub fn with_order_code(mut self, code: OrderCode) -> Self {
        self.order_code = Some(code);
        self
    }

    pub fn with_status(mut self, status: BankEntryStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn matches(&self, entry: &BankTransactionEntry) -> bool {
        self.portal_key
            .as_ref()
            .map(|(p, t)| &entry.portal_id == p && &entry.portal_transaction_id == t)
            .unwrap_or(true) &&
            self.order_code.as_ref().map(|c| entry.order_code.as_ref() == Some(c)).unwrap_or(true) &&
            (self.statuses.is_empty() || self.statuses.contains(&entry.status))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BankAccountQueryFilter {
    pub id: Option<i64>,
    pub account_number: Option<String>,
    pub active_only: bool,
}

impl BankAccountQueryFilter {
    pub fn with_account_number<S: Into<String>>(mut self, number: S) -> Self {
        self.account_number = Some(number.into());
        self
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn active_only(mut self) -> Self {
        self.active_only = true;
        self
    }

    pub fn matches(&self, account: &BankAccount) -> bool {
        self.id.map(|id| id == account.id).unwrap_or(true) &&
            self.account_number.as_ref().map(|n| n == &account.account_number).unwrap_or(true) &&
            (!self.active_only || account.is_active)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MerchantQueryFilter {
    pub id: Option<i64>,
}

impl MerchantQueryFilter {
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn matches(&self, merchant: &Merchant) -> bool {
        self.id.map(|id| id == merchant.id).unwrap_or(true)
    }
}

//--------------------------------------  Notification counts  --------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingNotificationCounts {
    pub deposit: u64,
    pub withdraw: u64,
}

impl PendingNotificationCounts {
    pub fn total(&self) -> u64 {
        self.deposit + self.withdraw
    }

    pub fn add(&mut self, order_type: OrderType, count: u64) {
        match order_type {
            OrderType::Deposit => self.deposit += count,
            OrderType::Withdraw => self.withdraw += count,
        }
    }
}
