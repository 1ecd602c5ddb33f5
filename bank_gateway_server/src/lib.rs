//! # Bank gateway server
//! This crate hosts the HTTP server for the bank gateway. It is responsible for:
//! * Accepting transaction notifications from bank portals and passing them to the reconciliation engine.
//! * Wiring finalized orders to the webhook delivery engine.
//! * Running the expiry and webhook retry workers, and exposing the same sweeps to an external scheduler.
//! * Operator endpoints for resending webhooks and seeding the fallback cache.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! See [routes](routes/index.html), or run the binary with any argument for a summary.
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod expiry_worker;
pub mod helpers;
pub mod middleware;
pub mod retry_worker;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
