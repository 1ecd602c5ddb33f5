use bgw_common::{Amount, Secret};
use serde::{Deserialize, Serialize};

/// The notification a merchant receives for one order. Field names are part of the merchant-facing contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub odr_id: String,
    pub merchant_ord_id: String,
    pub order_type: String,
    pub odr_status: String,
    pub bank_receive_number: String,
    pub bank_receive_owner_name: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWebhookPayload {
    pub orders: Vec<WebhookPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WebhookBody {
    Batch(BatchWebhookPayload),
    Single(WebhookPayload),
}

impl WebhookBody {
    pub fn order_codes(&self) -> Vec<&str> {
        match self {
            Self::Single(p) => vec![p.odr_id.as_str()],
            Self::Batch(b) => b.orders.iter().map(|p| p.odr_id.as_str()).collect(),
        }
    }
}

/// A fully-resolved delivery: where to send it, which key to sign it with, and what to send.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub api_key: Secret<String>,
    pub body: WebhookBody,
}

impl WebhookRequest {
    pub fn single(url: &str, api_key: Secret<String>, payload: WebhookPayload) -> Self {
        Self { url: url.to_string(), api_key, body: WebhookBody::Single(payload) }
    }

    pub fn batch(url: &str, api_key: Secret<String>, orders: Vec<WebhookPayload>) -> Self {
        Self { url: url.to_string(), api_key, body: WebhookBody::Batch(BatchWebhookPayload { orders }) }
    }

    pub fn order_codes(&self) -> Vec<&str> {
        self.body.order_codes()
    }
}
