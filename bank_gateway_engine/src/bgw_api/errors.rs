use merchant_tools::MerchantApiError;
use thiserror::Error;

use crate::{db_types::OrderCode, traits::StoreError};

#[derive(Debug, Clone, Error)]
pub enum ReconciliationError {
    #[error("Invalid bank transaction: {0}")]
    InvalidTransaction(String),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Order {0} is being updated concurrently. Gave up after {1} attempts.")]
    ContendedOrder(OrderCode, usize),
}

#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("Invalid delivery request: {0}")]
    InvalidRequest(String),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("No cached webhook context exists for order {0}")]
    ContextUnavailable(OrderCode),
    #[error("A webhook context for order {0} is already cached")]
    ContextAlreadyCached(OrderCode),
    #[error("Merchant endpoint error: {0}")]
    MerchantError(#[from] MerchantApiError),
}

#[derive(Debug, Clone, Error)]
pub enum OrderStatusError {
    #[error("Order {0} does not exist")]
    NotFound(OrderCode),
    #[error("The status of order {0} cannot be determined right now")]
    Unknown(OrderCode),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
}
