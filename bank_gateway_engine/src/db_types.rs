use std::{fmt::Display, str::FromStr};

use bgw_common::{Amount, Secret};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid value for {field}: {value}")]
pub struct ConversionError {
    pub field: &'static str,
    pub value: String,
}

impl ConversionError {
    fn new(field: &'static str, value: &str) -> Self {
        Self { field, value: value.to_string() }
    }
}

//--------------------------------------     OrderCode       ---------------------------------------------------------
/// The public identifier of an order, e.g. `ABO20250101ABC1234`. Customers quote it in the transfer description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct OrderCode(pub String);

impl OrderCode {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for OrderCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for OrderCode {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

//--------------------------------------     OrderType       ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Deposit,
    Withdraw,
}

impl Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Deposit => write!(f, "deposit"),
            OrderType::Withdraw => write!(f, "withdraw"),
        }
    }
}

impl FromStr for OrderType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deposit" => Ok(Self::Deposit),
            "withdraw" => Ok(Self::Withdraw),
            _ => Err(ConversionError::new("order type", s)),
        }
    }
}

//--------------------------------------   OrderStatusType     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatusType {
    /// Created, no money seen yet.
    Pending,
    /// Partially paid.
    Processing,
    /// Paid in full.
    Completed,
    /// Expired or rejected.
    Failed,
    /// Cancelled by the merchant or an operator.
    Canceled,
    /// Money that arrived after a deposit was already completed and is available for reallocation.
    Available,
    /// A withdrawal that was paid out twice.
    Duplicated,
}

impl OrderStatusType {
    /// No further payments are applied to orders in a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Processing)
    }

    /// Only these states are ever reported to a merchant callback.
    pub fn is_notifiable(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    pub fn notifiable() -> [OrderStatusType; 3] {
        [Self::Completed, Self::Failed, Self::Canceled]
    }
}

impl Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Available => "available",
            Self::Duplicated => "duplicated",
        };
        f.write_str(s)
    }
}

impl FromStr for OrderStatusType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            "available" => Ok(Self::Available),
            "duplicated" => Ok(Self::Duplicated),
            _ => Err(ConversionError::new("order status", s)),
        }
    }
}

//--------------------------------------        Order        ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct Order {
    pub id: i64,
    pub order_code: OrderCode,
    pub order_type: OrderType,
    pub status: OrderStatusType,
    pub requested_amount: Amount,
    pub amount_paid: Amount,
    pub amount_unpaid: Amount,
    /// Money received beyond `requested_amount`. Kept apart so that `amount_paid + amount_unpaid` always equals the
    /// requested amount.
    pub amount_overpaid: Amount,
    pub merchant_id: i64,
    pub merchant_order_id: String,
    pub callback_url: Option<String>,
    pub success_url: Option<String>,
    pub failure_url: Option<String>,
    pub cancel_url: Option<String>,
    pub bank_account_id: Option<i64>,
    pub bank_receive_number: Option<String>,
    pub bank_receive_owner_name: Option<String>,
    pub is_sent_callback_notification: bool,
    pub is_suspicious: bool,
    pub notes: String,
    /// Incremented on every write. Updates are conditional on the version the writer read.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn has_callback(&self) -> bool {
        self.callback_url.as_ref().map(|u| !u.trim().is_empty()).unwrap_or(false)
    }

    /// True if the audit notes show that the given bank entry has already been applied to this order.
    pub fn has_applied_entry(&self, entry_id: i64) -> bool {
        self.notes.contains(&entry_marker(entry_id))
    }
}

/// The token written into an order's notes when a bank entry is applied to it.
pub fn entry_marker(entry_id: i64) -> String {
    format!("(entry #{entry_id})")
}

/// Formats a single audit line for an order or bank entry.
pub fn audit_note(actor: &str, message: &str) -> String {
    format!("[{}] {actor}: {message}", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"))
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_code: OrderCode,
    pub order_type: OrderType,
    pub requested_amount: Amount,
    pub merchant_id: i64,
    pub merchant_order_id: String,
    pub callback_url: Option<String>,
    pub success_url: Option<String>,
    pub failure_url: Option<String>,
    pub cancel_url: Option<String>,
    pub bank_account_id: Option<i64>,
    pub bank_receive_number: Option<String>,
    pub bank_receive_owner_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn new(order_code: OrderCode, order_type: OrderType, requested_amount: Amount, merchant_id: i64) -> Self {
        Self {
            order_code,
            order_type,
            requested_amount,
            merchant_id,
            merchant_order_id: String::new(),
            callback_url: None,
            success_url: None,
            failure_url: None,
            cancel_url: None,
            bank_account_id: None,
            bank_receive_number: None,
            bank_receive_owner_name: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_callback_url<S: Into<String>>(mut self, url: S) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn with_merchant_order_id<S: Into<String>>(mut self, id: S) -> Self {
        self.merchant_order_id = id.into();
        self
    }

    pub fn with_bank_account(mut self, account: &BankAccount) -> Self {
        self.bank_account_id = Some(account.id);
        self.bank_receive_number = Some(account.account_number.clone());
        self.bank_receive_owner_name = Some(account.owner_name.clone());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// A partial update to an order. Unset fields are left alone. A note, if present, is appended to the existing notes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderUpdate {
    pub status: Option<OrderStatusType>,
    pub amount_paid: Option<Amount>,
    pub amount_unpaid: Option<Amount>,
    pub amount_overpaid: Option<Amount>,
    pub is_sent_callback_notification: Option<bool>,
    pub is_suspicious: Option<bool>,
    pub note: Option<String>,
}

impl OrderUpdate {
    pub fn with_status(mut self, status: OrderStatusType) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_amounts(mut self, paid: Amount, unpaid: Amount) -> Self {
        self.amount_paid = Some(paid);
        self.amount_unpaid = Some(unpaid);
        self
    }

    pub fn with_overpaid(mut self, overpaid: Amount) -> Self {
        self.amount_overpaid = Some(overpaid);
        self
    }

    pub fn with_notification_sent(mut self, sent: bool) -> Self {
        self.is_sent_callback_notification = Some(sent);
        self
    }

    pub fn with_suspicious(mut self, suspicious: bool) -> Self {
        self.is_suspicious = Some(suspicious);
        self
    }

    pub fn with_note<S: Into<String>>(mut self, note: S) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() &&
            self.amount_paid.is_none() &&
            self.amount_unpaid.is_none() &&
            self.amount_overpaid.is_none() &&
            self.is_sent_callback_notification.is_none() &&
            self.is_suspicious.is_none() &&
            self.note.is_none()
    }
}

//--------------------------------------  TransactionDirection  -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionDirection {
    Credit,
    Debit,
}

impl Display for TransactionDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credit => write!(f, "credit"),
            Self::Debit => write!(f, "debit"),
        }
    }
}

impl FromStr for TransactionDirection {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "credit" | "in" => Ok(Self::Credit),
            "debit" | "out" => Ok(Self::Debit),
            _ => Err(ConversionError::new("transaction type", s)),
        }
    }
}

//--------------------------------------   BankEntryStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BankEntryStatus {
    /// Recorded, reconciliation not finished.
    Pending,
    /// Applied to an order.
    Processed,
    /// No order could be matched to the entry.
    Unlinked,
    /// The receiving bank account is unknown.
    Failed,
    /// Replay of an entry that was already recorded.
    Duplicated,
    /// Applied to an order that was already fully paid.
    Overpaid,
    /// The matched order was already closed and the entry was left alone.
    Ignored,
}

impl Display for BankEntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Unlinked => "unlinked",
            Self::Failed => "failed",
            Self::Duplicated => "duplicated",
            Self::Overpaid => "overpaid",
            Self::Ignored => "ignored",
        };
        f.write_str(s)
    }
}

//--------------------------------------  NewBankTransaction   ---------------------------------------------------------
/// A transaction as reported by a bank portal, before it has been validated or recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBankTransaction {
    pub portal_id: String,
    pub portal_transaction_id: String,
    pub amount: f64,
    pub description: String,
    pub bank_account_number: String,
    pub direction: TransactionDirection,
    pub transaction_date: DateTime<Utc>,
    pub balance_after: Option<f64>,
    /// Who submitted the transaction: `system` for portal webhooks, `manual:<operator>` for operator replays.
    pub actor: String,
}

impl NewBankTransaction {
    pub fn new<S: Into<String>>(portal_id: S, portal_transaction_id: S, amount: f64, description: S, account: S) -> Self {
        Self {
            portal_id: portal_id.into(),
            portal_transaction_id: portal_transaction_id.into(),
            amount,
            description: description.into(),
            bank_account_number: account.into(),
            direction: TransactionDirection::Credit,
            transaction_date: Utc::now(),
            balance_after: None,
            actor: "system".to_string(),
        }
    }

    pub fn with_direction(mut self, direction: TransactionDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_balance_after(mut self, balance: f64) -> Self {
        self.balance_after = Some(balance);
        self
    }

    pub fn with_actor<S: Into<String>>(mut self, actor: S) -> Self {
        self.actor = actor.into();
        self
    }
}

//--------------------------------------  BankTransactionEntry  --------------------------------------------------------
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct BankTransactionEntry {
    pub id: i64,
    pub portal_id: String,
    pub portal_transaction_id: String,
    pub order_code: Option<OrderCode>,
    pub bank_account_id: Option<i64>,
    pub bank_code: Option<String>,
    pub amount: Amount,
    pub direction: TransactionDirection,
    pub description: String,
    pub balance_after: Option<Amount>,
    pub transaction_date: DateTime<Utc>,
    pub status: BankEntryStatus,
    pub actor: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The first write of a bank transaction. Always recorded as `pending`.
#[derive(Debug, Clone)]
pub struct NewBankEntry {
    pub portal_id: String,
    pub portal_transaction_id: String,
    pub order_code: Option<OrderCode>,
    pub amount: Amount,
    pub direction: TransactionDirection,
    pub description: String,
    pub balance_after: Option<Amount>,
    pub transaction_date: DateTime<Utc>,
    pub actor: String,
}

#[derive(Debug, Clone, Default)]
pub struct BankEntryUpdate {
    pub status: Option<BankEntryStatus>,
    pub bank_account_id: Option<i64>,
    pub bank_code: Option<String>,
    pub note: Option<String>,
}

impl BankEntryUpdate {
    pub fn new(status: BankEntryStatus) -> Self {
        Self { status: Some(status), ..Default::default() }
    }

    pub fn with_account(mut self, account: &BankAccount) -> Self {
        self.bank_account_id = Some(account.id);
        self.bank_code = Some(account.bank_code.clone());
        self
    }

    pub fn with_note<S: Into<String>>(mut self, note: S) -> Self {
        self.note = Some(note.into());
        self
    }
}

//--------------------------------------     BankAccount      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Bank accounts are assigned to an operator. Older records only carry the raw reference that came from the portal;
/// once the operator has been looked up, the resolved id is stored instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignedUser {
    Unresolved(String),
    Resolved(UserId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BankAccount {
    pub id: i64,
    pub bank_code: String,
    pub account_number: String,
    pub owner_name: String,
    pub balance: Amount,
    pub assigned_user: Option<AssignedUser>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The raw row shape of the `bank_accounts` table.
#[derive(Debug, Clone, FromRow)]
pub struct BankAccountRow {
    pub id: i64,
    pub bank_code: String,
    pub account_number: String,
    pub owner_name: String,
    pub balance: Amount,
    pub assigned_user_id: Option<i64>,
    pub assigned_user_ref: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BankAccountRow> for BankAccount {
    fn from(row: BankAccountRow) -> Self {
        let assigned_user = match (row.assigned_user_id, row.assigned_user_ref) {
            (Some(id), _) => Some(AssignedUser::Resolved(UserId(id))),
            (None, Some(r)) if !r.is_empty() => Some(AssignedUser::Unresolved(r)),
            _ => None,
        };
        Self {
            id: row.id,
            bank_code: row.bank_code,
            account_number: row.account_number,
            owner_name: row.owner_name,
            balance: row.balance,
            assigned_user,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewBankAccount {
    pub bank_code: String,
    pub account_number: String,
    pub owner_name: String,
    pub balance: Amount,
    pub assigned_user: Option<AssignedUser>,
}

impl NewBankAccount {
    pub fn new<S: Into<String>>(bank_code: S, account_number: S, owner_name: S) -> Self {
        Self {
            bank_code: bank_code.into(),
            account_number: account_number.into(),
            owner_name: owner_name.into(),
            balance: Amount::ZERO,
            assigned_user: None,
        }
    }
}

//--------------------------------------       Merchant       ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct Merchant {
    pub id: i64,
    pub name: String,
    pub display_name: Option<String>,
    pub api_key: Secret<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MerchantRow {
    pub id: i64,
    pub name: String,
    pub display_name: Option<String>,
    pub api_key: String,
    pub created_at: DateTime<Utc>,
}

impl From<MerchantRow> for Merchant {
    fn from(row: MerchantRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            display_name: row.display_name,
            api_key: Secret::new(row.api_key),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewMerchant {
    pub name: String,
    pub display_name: Option<String>,
    pub api_key: Secret<String>,
}

//--------------------------------------  Fallback snapshots   ---------------------------------------------------------
/// Everything needed to build a merchant callback for an order without touching the primary store.
///
/// Written when an order is handed out for payment, read back when the store is unreachable. Any field may be missing
/// in entries written by older processes, so everything except the order code and callback URL is optional.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedWebhookContext {
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
    pub cached_at: DateTime<Utc>,
}

impl std::fmt::Debug for CachedWebhookContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedWebhookContext")
            .field("order_code", &self.order_code)
            .field("order_type", &self.order_type)
            .field("callback_url", &self.callback_url)
            .field("merchant_id", &self.merchant_id)
            .field("merchant_api_key", &"****")
            .field("amount", &self.amount)
            .field("cached_at", &self.cached_at)
            .finish()
    }
}

impl CachedWebhookContext {
    /// Returns `None` if the order has no callback URL, since there would be nothing to deliver.
    pub fn for_order(order: &Order, merchant: &Merchant) -> Option<Self> {
        let callback_url = order.callback_url.clone().filter(|u| !u.trim().is_empty())?;
        Some(Self {
            order_code: order.order_code.clone(),
            order_type: order.order_type,
            callback_url,
            merchant_id: merchant.id,
            merchant_api_key: merchant.api_key.reveal().clone(),
            merchant_order_id: Some(order.merchant_order_id.clone()),
            merchant_name: merchant.display_name.clone().or_else(|| Some(merchant.name.clone())),
            amount: Some(order.requested_amount),
            bank_receive_number: order.bank_receive_number.clone(),
            bank_receive_owner_name: order.bank_receive_owner_name.clone(),
            cached_at: Utc::now(),
        })
    }
}

/// The last known state of an order, served by the status endpoint when the primary store cannot be reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSnapshot {
    pub order_code: OrderCode,
    pub order_type: OrderType,
    pub status: OrderStatusType,
    pub requested_amount: Amount,
    pub amount_paid: Amount,
    pub amount_unpaid: Amount,
    pub updated_at: DateTime<Utc>,
    pub cached_at: DateTime<Utc>,
}

impl From<&Order> for OrderSnapshot {
    fn from(order: &Order) -> Self {
        Self {
            order_code: order.order_code.clone(),
            order_type: order.order_type,
            status: order.status,
            requested_amount: order.requested_amount,
            amount_paid: order.amount_paid,
            amount_unpaid: order.amount_unpaid,
            updated_at: order.updated_at,
            cached_at: Utc::now(),
        }
    }
}
