//! Transaction-related types for the banking ledger
//!
//! This module defines transaction requests as accepted from callers, the
//! journal record that tracks each request through its lifecycle, and the
//! validated movement the processor dispatches on.

use super::account::AccountId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Transaction identifier
pub type TransactionId = Uuid;

/// Transaction types supported by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Credit funds to `to_account_id`
    Deposit,

    /// Debit funds from `from_account_id`
    Withdrawal,

    /// Move funds from `from_account_id` to `to_account_id`
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Transfer => "transfer",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction type as supplied by a caller
///
/// Callers may send any string; unknown values are kept so the validator can
/// reject them with a precise error instead of failing at deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestedType {
    Known(TransactionType),
    Other(String),
}

impl From<TransactionType> for RequestedType {
    fn from(tx_type: TransactionType) -> Self {
        RequestedType::Known(tx_type)
    }
}

impl fmt::Display for RequestedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestedType::Known(tx_type) => tx_type.fmt(f),
            RequestedType::Other(raw) => f.write_str(raw),
        }
    }
}

/// Transaction lifecycle status
///
/// `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to move money, as accepted from a caller and as carried on the
/// dispatch queue
///
/// The `id` is optional on input; acceptance assigns one before the request
/// is journaled and published, so every queued payload carries it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TransactionId>,

    #[serde(rename = "type")]
    pub tx_type: RequestedType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_account_id: Option<AccountId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_account_id: Option<AccountId>,

    pub amount: Decimal,

    pub currency: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub reference: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl TransactionRequest {
    fn base(tx_type: TransactionType, amount: Decimal, currency: &str) -> Self {
        TransactionRequest {
            id: None,
            tx_type: tx_type.into(),
            from_account_id: None,
            to_account_id: None,
            amount,
            currency: currency.to_string(),
            description: String::new(),
            reference: String::new(),
            metadata: Value::Null,
        }
    }

    pub fn deposit(to: AccountId, amount: Decimal, currency: &str) -> Self {
        TransactionRequest {
            to_account_id: Some(to),
            ..Self::base(TransactionType::Deposit, amount, currency)
        }
    }

    pub fn withdrawal(from: AccountId, amount: Decimal, currency: &str) -> Self {
        TransactionRequest {
            from_account_id: Some(from),
            ..Self::base(TransactionType::Withdrawal, amount, currency)
        }
    }

    pub fn transfer(from: AccountId, to: AccountId, amount: Decimal, currency: &str) -> Self {
        TransactionRequest {
            from_account_id: Some(from),
            to_account_id: Some(to),
            ..Self::base(TransactionType::Transfer, amount, currency)
        }
    }

    pub fn with_id(mut self, id: TransactionId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Validated account movement
///
/// Produced by the validator from a `TransactionRequest`; the processor
/// dispatches exhaustively on this instead of on the raw request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Movement {
    Deposit { to: AccountId },
    Withdrawal { from: AccountId },
    Transfer { from: AccountId, to: AccountId },
}

impl Movement {
    pub fn tx_type(&self) -> TransactionType {
        match self {
            Movement::Deposit { .. } => TransactionType::Deposit,
            Movement::Withdrawal { .. } => TransactionType::Withdrawal,
            Movement::Transfer { .. } => TransactionType::Transfer,
        }
    }

    /// Account debited by this movement, if any
    pub fn source(&self) -> Option<AccountId> {
        match self {
            Movement::Deposit { .. } => None,
            Movement::Withdrawal { from } | Movement::Transfer { from, .. } => Some(*from),
        }
    }

    /// Account credited by this movement, if any
    pub fn destination(&self) -> Option<AccountId> {
        match self {
            Movement::Withdrawal { .. } => None,
            Movement::Deposit { to } | Movement::Transfer { to, .. } => Some(*to),
        }
    }
}

/// Journal record of a transaction
///
/// Mirrors the persisted shape of the journal. Created `Pending` at
/// acceptance time and finalized exactly once by the processor (or by a
/// cancellation while still unclaimed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,

    #[serde(rename = "type")]
    pub tx_type: TransactionType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_account_id: Option<AccountId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_account_id: Option<AccountId>,

    pub amount: Decimal,

    pub currency: String,

    pub status: TransactionStatus,

    pub description: String,

    pub reference: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Set when a processor has started working on this record; a claimed
    /// record can no longer be cancelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Build the pending journal record for an accepted request
    pub fn pending(id: TransactionId, tx_type: TransactionType, request: &TransactionRequest) -> Self {
        let now = Utc::now();
        Transaction {
            id,
            tx_type,
            from_account_id: request.from_account_id,
            to_account_id: request.to_account_id,
            amount: request.amount,
            currency: request.currency.clone(),
            status: TransactionStatus::Pending,
            description: request.description.clone(),
            reference: request.reference.clone(),
            metadata: request.metadata.clone(),
            created_at: now,
            updated_at: now,
            processed_at: None,
            error_message: None,
            claimed_at: None,
        }
    }

    pub fn involves(&self, account_id: AccountId) -> bool {
        self.from_account_id == Some(account_id) || self.to_account_id == Some(account_id)
    }
}

/// Journal query
///
/// All criteria are optional and combined with AND. The account criterion
/// matches either side of a movement. A `limit` of zero means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub account_id: Option<AccountId>,
    pub tx_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub limit: usize,
    pub offset: usize,
}

impl TransactionFilter {
    pub fn for_account(account_id: AccountId) -> Self {
        TransactionFilter {
            account_id: Some(account_id),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, tx_type: TransactionType) -> Self {
        self.tx_type = Some(tx_type);
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn created_between(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from_date = from;
        self.to_date = to;
        self
    }

    pub fn amount_between(mut self, min: Option<Decimal>, max: Option<Decimal>) -> Self {
        self.min_amount = min;
        self.max_amount = max;
        self
    }

    pub fn paginate(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Check the non-pagination criteria against a record
    pub fn matches(&self, transaction: &Transaction) -> bool {
        if let Some(account_id) = self.account_id {
            if !transaction.involves(account_id) {
                return false;
            }
        }
        if self.tx_type.is_some_and(|t| t != transaction.tx_type) {
            return false;
        }
        if self.status.is_some_and(|s| s != transaction.status) {
            return false;
        }
        if self.from_date.is_some_and(|d| transaction.created_at < d) {
            return false;
        }
        if self.to_date.is_some_and(|d| transaction.created_at > d) {
            return false;
        }
        if self.min_amount.is_some_and(|a| transaction.amount < a) {
            return false;
        }
        if self.max_amount.is_some_and(|a| transaction.amount > a) {
            return false;
        }
        true
    }
}
