//! Merchant notification tooling
//!
//! Everything needed to talk to a merchant's callback endpoint: the JSON payloads merchants receive, the request
//! signature they use to authenticate us, and a thin reqwest-based client that performs exactly one POST per call.
//! Retrying is deliberately not this crate's business; the gateway's retry sweep owns that.
mod api;
mod config;
mod error;

mod data_objects;
pub mod helpers;

pub use api::WebhookClient;
pub use config::WebhookClientConfig;
pub use data_objects::{BatchWebhookPayload, WebhookBody, WebhookPayload, WebhookRequest};
pub use error::MerchantApiError;
