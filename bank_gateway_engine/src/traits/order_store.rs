use std::time::Duration;

use bgw_common::Amount;
use thiserror::Error;

use crate::{
    db_types::{
        BankAccount,
        BankEntryUpdate,
        BankTransactionEntry,
        Merchant,
        NewBankAccount,
        NewBankEntry,
        NewMerchant,
        NewOrder,
        Order,
        OrderCode,
        OrderUpdate,
    },
    traits::{DocumentQuery, Documents, InsertBankEntryResult, PendingNotificationCounts},
};

/// Errors surfaced by any [`OrderStore`] backend. The variants are deliberately coarse: callers only need to know
/// whether to back off ([`StoreError::is_infrastructure`]), re-read and retry ([`StoreError::Conflict`]), or give up.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("The store is unavailable: {0}")]
    Unavailable(String),
    #[error("The store did not respond within {0:?}")]
    Timeout(Duration),
    #[error("Write conflict on {0}. The record was modified concurrently.")]
    Conflict(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Errors that say something about the health of the store itself rather than about the request. These are the
    /// only errors the circuit breaker counts.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_) | Self::Backend(_))
    }

    /// The store might answer if asked again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// The primary document store of the gateway.
///
/// All reads go through [`OrderStore::list_documents`], which lets the connection manager coalesce identical reads
/// without knowing anything about their shape. Writes are individual methods since they are never shared.
#[allow(async_fn_in_trait)]
pub trait OrderStore: Clone {
    /// A human-readable locator for the store, used in logs.
    fn url(&self) -> &str;

    /// A cheap round trip that proves the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn list_documents(&self, query: &DocumentQuery) -> Result<Documents, StoreError>;

    /// Inserts a new order with `amount_unpaid == requested_amount` and version 1.
    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError>;

    /// Applies the update only if the stored version still equals `expected_version`, bumping the version.
    ///
    /// Returns [`StoreError::Conflict`] if the order was modified since it was read, and [`StoreError::NotFound`] if
    /// there is no such order.
    async fn update_order(
        &self,
        code: &OrderCode,
        expected_version: i64,
        update: OrderUpdate,
    ) -> Result<Order, StoreError>;

    /// Unconditionally sets the callback-sent flag. This is the only order write that skips the version check, since
    /// delivery confirmation must never be lost to a concurrent reconciliation.
    async fn set_notification_sent(&self, code: &OrderCode, sent: bool) -> Result<(), StoreError>;

    /// Records a bank transaction. The `(portal_id, portal_transaction_id)` pair is unique; recording the same pair
    /// twice returns the existing entry untouched.
    async fn insert_bank_entry(&self, entry: NewBankEntry) -> Result<InsertBankEntryResult, StoreError>;

    async fn update_bank_entry(&self, id: i64, update: BankEntryUpdate) -> Result<BankTransactionEntry, StoreError>;

    /// Credits the account with a bank entry's amount, at most once per entry.
    ///
    /// Sets the balance to `balance_after` if the portal reported one, otherwise adds `amount` to it. The entry is
    /// marked as credited in the same write, so crediting an entry a second time leaves the balance untouched and
    /// returns the account as it is.
    async fn credit_bank_account(
        &self,
        entry_id: i64,
        account_id: i64,
        amount: Amount,
        balance_after: Option<Amount>,
    ) -> Result<BankAccount, StoreError>;

    async fn insert_bank_account(&self, account: NewBankAccount) -> Result<BankAccount, StoreError>;

    async fn insert_merchant(&self, merchant: NewMerchant) -> Result<Merchant, StoreError>;

    /// Counts terminal orders with a callback URL whose notification has not been confirmed, grouped by order type.
    async fn count_pending_notifications(&self) -> Result<PendingNotificationCounts, StoreError>;
}
