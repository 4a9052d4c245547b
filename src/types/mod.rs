//! Types module
//!
//! Contains core data structures used throughout the ledger.
//! - `account`: Account records and status
//! - `transaction`: Requests, journal records, filters and validated movements
//! - `intent`: Durable records of in-flight balance mutations
//! - `error`: Error taxonomy

pub mod account;
pub mod error;
pub mod intent;
pub mod transaction;

pub use account::{Account, AccountId, AccountStatus, AccountSummary, UserId};
pub use error::{ErrorClass, LedgerError};
pub use intent::{IntentStage, MutationIntent};
pub use transaction::{
    Movement, RequestedType, Transaction, TransactionFilter, TransactionId, TransactionRequest,
    TransactionStatus, TransactionType,
};
