use std::{fmt::Display, str::FromStr};

use bgw_common::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{
    BankTransactionEntry,
    ConversionError,
    Order,
    OrderCode,
    OrderSnapshot,
    OrderStatusType,
    OrderType,
};

//--------------------------------------    Reconciliation    ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Partial payment. The order is still open.
    PartiallyPaid,
    Completed,
    /// Money for an order that was already paid in full.
    Overpaid,
    /// The bank transaction had already been recorded.
    Duplicated,
    /// No order code in the description.
    Unlinked,
    /// An order code was found, but there is no such order.
    OrderNotFound,
    /// The order was already closed. The payment was recorded but not applied.
    Ignored,
    /// The receiving bank account is unknown.
    BankAccountNotFound,
}

impl Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PartiallyPaid => "partially_paid",
            Self::Completed => "completed",
            Self::Overpaid => "overpaid",
            Self::Duplicated => "duplicated",
            Self::Unlinked => "unlinked",
            Self::OrderNotFound => "order_not_found",
            Self::Ignored => "ignored",
            Self::BankAccountNotFound => "bank_account_not_found",
        };
        f.write_str(s)
    }
}

/// The structured answer to "what happened to this bank transaction". Expected business outcomes are all reported
/// here; only infrastructure problems and invalid input are errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    pub success: bool,
    pub status: ReconcileOutcome,
    pub message: String,
    pub entry_id: Option<i64>,
    pub order_code: Option<OrderCode>,
    pub order_status: Option<OrderStatusType>,
}

impl ReconcileResult {
    pub fn new<S: Into<String>>(status: ReconcileOutcome, entry: &BankTransactionEntry, message: S) -> Self {
        Self {
            success: status != ReconcileOutcome::BankAccountNotFound,
            status,
            message: message.into(),
            entry_id: Some(entry.id),
            order_code: entry.order_code.clone(),
            order_status: None,
        }
    }

    pub fn with_order(mut self, order: &Order) -> Self {
        self.order_code = Some(order.order_code.clone());
        self.order_status = Some(order.status);
        self
    }
}

//--------------------------------------       Delivery       ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// All orders for the same callback URL and merchant go out in one request.
    Batch,
    /// One request per order.
    Legacy,
}

impl Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Batch => write!(f, "batch"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(Self::Batch),
            "legacy" | "single" => Ok(Self::Legacy),
            _ => Err(ConversionError { field: "delivery mode", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The order is not completed, failed or canceled.
    NotNotifiable,
    NoCallbackUrl,
    AlreadySent,
    /// A manual override moved the order back to pending.
    PendingOverride,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotNotifiable => "order status is not notifiable",
            Self::NoCallbackUrl => "order has no callback URL",
            Self::AlreadySent => "notification was already sent",
            Self::PendingOverride => "order was moved back to pending",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Sent,
    Failed(String),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub order_code: OrderCode,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub records: Vec<DeliveryRecord>,
}

impl DeliveryReport {
    pub fn push(&mut self, order_code: OrderCode, outcome: DeliveryOutcome) {
        self.records.push(DeliveryRecord { order_code, outcome });
    }

    pub fn extend(&mut self, other: DeliveryReport) {
        self.records.extend(other.records);
    }

    fn count(&self, f: impl Fn(&DeliveryOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| f(&r.outcome)).count()
    }

    pub fn sent(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Sent))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Skipped(_)))
    }

    pub fn outcome_for(&self, code: &OrderCode) -> Option<&DeliveryOutcome> {
        self.records.iter().find(|r| &r.order_code == code).map(|r| &r.outcome)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// The sweep did not run because the store circuit was open.
    pub skipped: bool,
    pub candidates: usize,
    pub report: DeliveryReport,
}

/// The only statuses an operator may force an order into before resending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusOverride {
    Completed,
    Failed,
    Pending,
}

impl From<StatusOverride> for OrderStatusType {
    fn from(value: StatusOverride) -> Self {
        match value {
            StatusOverride::Completed => OrderStatusType::Completed,
            StatusOverride::Failed => OrderStatusType::Failed,
            StatusOverride::Pending => OrderStatusType::Pending,
        }
    }
}

impl FromStr for StatusOverride {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "pending" => Ok(Self::Pending),
            _ => Err(ConversionError { field: "status override", value: s.to_string() }),
        }
    }
}

//--------------------------------------        Expiry        ---------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryResult {
    /// The sweep did not run because the store circuit was open.
    pub skipped: bool,
    pub expired: Vec<OrderCode>,
    /// Orders that changed under us between the scan and the update. The next sweep will pick them up if needed.
    pub conflicts: Vec<OrderCode>,
}

//--------------------------------------     Order status     ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusSource {
    Store,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusView {
    pub order_code: OrderCode,
    pub order_type: OrderType,
    pub status: OrderStatusType,
    pub requested_amount: Amount,
    pub amount_paid: Amount,
    pub amount_unpaid: Amount,
    pub updated_at: DateTime<Utc>,
    pub source: StatusSource,
}

impl From<&Order> for OrderStatusView {
    fn from(order: &Order) -> Self {
        Self {
            order_code: order.order_code.clone(),
            order_type: order.order_type,
            status: order.status,
            requested_amount: order.requested_amount,
            amount_paid: order.amount_paid,
            amount_unpaid: order.amount_unpaid,
            updated_at: order.updated_at,
            source: StatusSource::Store,
        }
    }
}

impl From<OrderSnapshot> for OrderStatusView {
    fn from(snapshot: OrderSnapshot) -> Self {
        Self {
            order_code: snapshot.order_code,
            order_type: snapshot.order_type,
            status: snapshot.status,
            requested_amount: snapshot.requested_amount,
            amount_paid: snapshot.amount_paid,
            amount_unpaid: snapshot.amount_unpaid,
            updated_at: snapshot.updated_at,
            source: StatusSource::Fallback,
        }
    }
}
