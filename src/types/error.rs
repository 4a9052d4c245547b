//! Error types for the banking ledger
//!
//! This module defines every failure the ledger can report, from acceptance
//! time validation through to asynchronous processing and reconciliation.
//!
//! # Error Classes
//!
//! - **Validation**: structural request errors, returned synchronously, never retried
//! - **NotFound**: unknown account or transaction identity
//! - **Conflict**: uniqueness or lifecycle conflicts (duplicate account, already processed)
//! - **Transient**: optimistic concurrency conflicts, retried at the point of failure
//! - **BusinessRule**: permanent rule violations that fail the transaction
//! - **Infrastructure**: store/queue/codec faults, retried at message level
//! - **Reconciliation**: mutations in an unknown state needing out-of-band repair

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::account::AccountStatus;
use super::transaction::TransactionStatus;

/// Broad classification used for retry and propagation decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    Conflict,
    Transient,
    BusinessRule,
    Infrastructure,
    Reconciliation,
}

/// Main error type for the ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Amount is zero or negative (or a negative opening balance)
    #[error("Invalid amount {amount}")]
    InvalidAmount { amount: Decimal },

    #[error("Missing currency")]
    MissingCurrency,

    /// Currency is not a three-letter upper-case code
    #[error("Invalid currency '{currency}'")]
    InvalidCurrency { currency: String },

    #[error("Deposit requires a destination account")]
    MissingToAccount,

    #[error("Withdrawal requires a source account")]
    MissingFromAccount,

    #[error("Transfer requires both source and destination accounts")]
    MissingAccounts,

    #[error("Transfer source and destination are the same account {account}")]
    SameAccount { account: Uuid },

    #[error("Invalid transaction type '{tx_type}'")]
    InvalidTransactionType { tx_type: String },

    #[error("Account {id} not found")]
    AccountNotFound { id: Uuid },

    #[error("Transaction {id} not found")]
    TransactionNotFound { id: Uuid },

    /// The (user, currency) pair already owns an account
    #[error("Account already exists for user '{user_id}' in {currency}")]
    AccountExists { user_id: String, currency: String },

    #[error("Transaction {id} already exists")]
    TransactionExists { id: Uuid },

    /// The transaction has left `pending` (or has been claimed by a processor)
    #[error("Transaction {id} already processed (status {status})")]
    TransactionAlreadyProcessed { id: Uuid, status: TransactionStatus },

    /// Another worker holds the transaction right now
    #[error("Transaction {id} is being processed by another worker")]
    TransactionBusy { id: Uuid },

    #[error("Invalid status transition for transaction {id}: {from} -> {to}")]
    InvalidStatusTransition {
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Optimistic concurrency check failed; the caller must re-read and retry
    #[error("Concurrent update on account {id}: expected version {expected}, found {actual}")]
    ConcurrentUpdate { id: Uuid, expected: u64, actual: u64 },

    #[error("Insufficient funds in account {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: Uuid,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("Account {account} is {status}")]
    AccountInactive { account: Uuid, status: AccountStatus },

    #[error("Currency mismatch on account {account}: account holds {expected}, request uses {actual}")]
    CurrencyMismatch {
        account: Uuid,
        expected: String,
        actual: String,
    },

    /// The store refused a write that would make a balance negative
    #[error("Balance of account {account} cannot become negative ({balance})")]
    NegativeBalance { account: Uuid, balance: Decimal },

    #[error("Arithmetic overflow in {operation} for account {account}")]
    ArithmeticOverflow { operation: String, account: Uuid },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Queue error: {message}")]
    Queue { message: String },

    #[error("Codec error: {message}")]
    Codec { message: String },

    /// The credit leg of a transfer failed and the debit was credited back
    #[error("Transfer {transaction} reversed: {reason}")]
    TransferReversed { transaction: Uuid, reason: String },

    /// A balance mutation is in an unknown or partially applied state and
    /// needs out-of-band reconciliation
    #[error("Transaction {transaction} left unresolved on account {account} for {amount}: {reason}")]
    UnresolvedMutation {
        transaction: Uuid,
        account: Uuid,
        amount: Decimal,
        reason: String,
    },
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        use LedgerError::*;
        match self {
            InvalidAmount { .. }
            | MissingCurrency
            | InvalidCurrency { .. }
            | MissingToAccount
            | MissingFromAccount
            | MissingAccounts
            | SameAccount { .. }
            | InvalidTransactionType { .. } => ErrorClass::Validation,
            AccountNotFound { .. } | TransactionNotFound { .. } => ErrorClass::NotFound,
            AccountExists { .. }
            | TransactionExists { .. }
            | TransactionAlreadyProcessed { .. }
            | InvalidStatusTransition { .. } => ErrorClass::Conflict,
            ConcurrentUpdate { .. } | TransactionBusy { .. } => ErrorClass::Transient,
            InsufficientFunds { .. }
            | AccountInactive { .. }
            | CurrencyMismatch { .. }
            | NegativeBalance { .. }
            | ArithmeticOverflow { .. }
            | TransferReversed { .. } => ErrorClass::BusinessRule,
            Storage { .. } | Queue { .. } | Codec { .. } => ErrorClass::Infrastructure,
            UnresolvedMutation { .. } => ErrorClass::Reconciliation,
        }
    }

    /// Whether retrying the same operation may succeed
    ///
    /// Codec errors are infrastructure faults but retrying cannot fix a
    /// payload, so they are excluded.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Codec { .. } => false,
            _ => matches!(
                self.class(),
                ErrorClass::Transient | ErrorClass::Infrastructure
            ),
        }
    }

    pub fn is_concurrent_update(&self) -> bool {
        matches!(self, LedgerError::ConcurrentUpdate { .. })
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(error: serde_json::Error) -> Self {
        LedgerError::Codec {
            message: error.to_string(),
        }
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(error: std::io::Error) -> Self {
        LedgerError::Storage {
            message: error.to_string(),
        }
    }
}

impl From<csv::Error> for LedgerError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());
        LedgerError::Codec {
            message: match line {
                Some(line) => format!("CSV error at line {}: {}", line, error),
                None => format!("CSV error: {}", error),
            },
        }
    }
}

// Helper functions for creating common errors

impl LedgerError {
    pub fn account_not_found(id: Uuid) -> Self {
        LedgerError::AccountNotFound { id }
    }

    pub fn transaction_not_found(id: Uuid) -> Self {
        LedgerError::TransactionNotFound { id }
    }

    pub fn account_exists(user_id: &str, currency: &str) -> Self {
        LedgerError::AccountExists {
            user_id: user_id.to_string(),
            currency: currency.to_string(),
        }
    }

    pub fn already_processed(id: Uuid, status: TransactionStatus) -> Self {
        LedgerError::TransactionAlreadyProcessed { id, status }
    }

    pub fn concurrent_update(id: Uuid, expected: u64, actual: u64) -> Self {
        LedgerError::ConcurrentUpdate {
            id,
            expected,
            actual,
        }
    }

    pub fn insufficient_funds(account: Uuid, balance: Decimal, requested: Decimal) -> Self {
        LedgerError::InsufficientFunds {
            account,
            balance,
            requested,
        }
    }

    pub fn account_inactive(account: Uuid, status: AccountStatus) -> Self {
        LedgerError::AccountInactive { account, status }
    }

    pub fn currency_mismatch(account: Uuid, expected: &str, actual: &str) -> Self {
        LedgerError::CurrencyMismatch {
            account,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn arithmetic_overflow(operation: &str, account: Uuid) -> Self {
        LedgerError::ArithmeticOverflow {
            operation: operation.to_string(),
            account,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        LedgerError::Storage {
            message: message.into(),
        }
    }

    pub fn queue(message: impl Into<String>) -> Self {
        LedgerError::Queue {
            message: message.into(),
        }
    }
}
