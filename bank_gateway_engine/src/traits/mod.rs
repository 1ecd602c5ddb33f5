//! # Backend contracts
//!
//! The engine never talks to a database or key-value store directly. Instead it goes through the traits defined here,
//! which keeps the resilience layer ([`crate::connection`]) and the business APIs backend-agnostic.
//!
//! * [`OrderStore`] is the primary document store: orders, bank transaction entries, bank accounts and merchants.
//!   Writes are conditional on the order `version`, so concurrent reconcilers cannot overwrite each other silently.
//! * [`KeyValueStore`] is the persistent tier of the fallback cache. All it needs is get/set-with-ttl/delete.
//! * [`WebhookTransport`] performs a single signed delivery to a merchant callback URL.
mod data_objects;
mod key_value_store;
mod order_store;
mod webhook_transport;

pub use data_objects::{
    BankAccountQueryFilter,
    BankEntryQueryFilter,
    DocumentQuery,
    Documents,
    InsertBankEntryResult,
    MerchantQueryFilter,
    OrderQueryFilter,
    PendingNotificationCounts,
};
pub use key_value_store::{KeyValueError, KeyValueStore};
pub use order_store::{OrderStore, StoreError};
pub use webhook_transport::WebhookTransport;
