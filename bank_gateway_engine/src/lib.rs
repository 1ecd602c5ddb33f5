//! Bank Gateway Engine
//!
//! The engine turns bank transfer notifications into paid orders and tells merchants about it. It is the part of the
//! gateway that has to stay correct while its dependencies are failing, and is organised accordingly:
//!
//! 1. Storage contracts ([`mod@traits`]) and the SQLite backend ([`SqliteDatabase`]). You should never need to talk
//!    to the database directly; the data types it stores live in [`mod@db_types`].
//! 2. The resilience layer. [`connection::ConnectionManager`] wraps the primary store with timeouts, a circuit
//!    breaker, read-replica routing and request coalescing. [`fallback::FallbackCacheStore`] keeps enough state in a
//!    two-tier cache to answer status queries and send webhooks while the store is down.
//! 3. The public API ([`mod@bgw_api`]): reconciliation of bank transactions, webhook delivery, the expiry sweeper
//!    and the order status query.
//!
//! Reconciliation and expiry do not call the delivery engine directly. They publish events (see [`mod@events`]),
//! and the server wires the `OrderFinalized` hook to [`DeliveryApi::send_notifications`].
mod db;

pub mod bgw_api;
pub mod connection;
pub mod db_types;
pub mod events;
pub mod fallback;
pub mod helpers;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use bgw_api::{
    delivery_api::{DeliveryApi, DeliveryConfig},
    errors::{DeliveryError, OrderStatusError, ReconciliationError},
    expiry_api::ExpiryApi,
    objects,
    order_status_api::OrderStatusApi,
    reconciliation_api::ReconciliationApi,
};
#[cfg(feature = "sqlite")]
pub use db::sqlite::{SqliteDatabase, SqliteDatabaseError};
