use std::{fmt::Display, str::FromStr, time::Duration};

use bank_gateway_engine::{
    db_types::{CachedWebhookContext, NewBankTransaction, OrderCode, OrderType, TransactionDirection},
    objects::StatusOverride,
};
use bgw_common::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ServerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

/// A transaction notification, as posted by a bank portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankTransactionRequest {
    pub portal_id: String,
    pub portal_transaction_id: String,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
    pub bank_account_number: String,
    /// `credit`/`in` or `debit`/`out`. Defaults to credit.
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub transaction_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub balance_after: Option<f64>,
}

impl TryFrom<BankTransactionRequest> for NewBankTransaction {
    type Error = ServerError;

    fn try_from(req: BankTransactionRequest) -> Result<Self, Self::Error> {
        let direction = match req.transaction_type.as_deref() {
            Some(s) => TransactionDirection::from_str(s).map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?,
            None => TransactionDirection::Credit,
        };
        let mut tx = NewBankTransaction::new(
            req.portal_id,
            req.portal_transaction_id,
            req.amount,
            req.description,
            req.bank_account_number,
        )
        .with_direction(direction);
        if let Some(balance) = req.balance_after {
            tx = tx.with_balance_after(balance);
        }
        if let Some(date) = req.transaction_date {
            tx.transaction_date = date;
        }
        Ok(tx)
    }
}

/// An operator-verified replay of a bank transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRequest {
    #[serde(flatten)]
    pub transaction: BankTransactionRequest,
    pub verified_by: String,
    pub admin_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendRequest {
    pub order_codes: Vec<OrderCode>,
    #[serde(default)]
    pub status_override: Option<StatusOverride>,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendByCallbackRequest {
    pub pattern: String,
    #[serde(default)]
    pub status_override: Option<StatusOverride>,
    #[serde(default)]
    pub actor: Option<String>,
}

/// Actor recorded in audit notes when an admin request does not name one.
pub const DEFAULT_ADMIN_ACTOR: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheContextRequest {
    pub order_code: OrderCode,
    pub order_type: OrderType,
    pub callback_url: String,
    pub merchant_id: i64,
    pub merchant_api_key: String,
    #[serde(default)]
    pub merchant_order_id: Option<String>,
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub bank_receive_number: Option<String>,
    #[serde(default)]
    pub bank_receive_owner_name: Option<String>,
    /// Overrides the configured cache TTL.
    #[serde(default)]
    pub ttl_hours: Option<u64>,
}

impl CacheContextRequest {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_hours.filter(|h| *h > 0).map(|h| Duration::from_secs(h * 3600))
    }
}

impl From<CacheContextRequest> for CachedWebhookContext {
    fn from(req: CacheContextRequest) -> Self {
        Self {
            order_code: req.order_code,
            order_type: req.order_type,
            callback_url: req.callback_url,
            merchant_id: req.merchant_id,
            merchant_api_key: req.merchant_api_key,
            merchant_order_id: req.merchant_order_id,
            merchant_name: req.merchant_name,
            amount: req.amount,
            bank_receive_number: req.bank_receive_number,
            bank_receive_owner_name: req.bank_receive_owner_name,
            cached_at: Utc::now(),
        }
    }
}
