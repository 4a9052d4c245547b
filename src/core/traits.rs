//! Core traits for the account store, transaction journal, intent log and
//! dispatch queue
//!
//! These are the seams between the processing engine and its storage and
//! transport. The engine only ever holds `Arc<dyn Trait>` handles passed in at
//! construction, so tests and alternative backends can be swapped in freely.
//! The in-memory implementations live in [`crate::core::memory`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::types::{
    Account, AccountId, AccountStatus, LedgerError, MutationIntent, Transaction,
    TransactionFilter, TransactionId, TransactionStatus,
};

/// Account balances under optimistic concurrency control
///
/// Every mutation is version-checked: the writer supplies the version it
/// read and the store applies the change and bumps the version only if the
/// stored version still matches. A mismatch mutates nothing and fails with
/// `ConcurrentUpdate`. There are no locks the caller can hold.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Check that the store is reachable
    async fn ping(&self) -> Result<(), LedgerError>;

    /// Insert a new account at version 1, whatever version the caller set
    ///
    /// Fails with `AccountExists` if the (user, currency) pair or the id is
    /// taken, and with `InvalidAmount` for a negative opening balance.
    async fn create(&self, account: Account) -> Result<Account, LedgerError>;

    async fn get_by_id(&self, id: AccountId) -> Result<Account, LedgerError>;

    /// All accounts owned by a user, newest first
    async fn get_by_user(&self, user_id: &str) -> Result<Vec<Account>, LedgerError>;

    /// Page through accounts, newest first
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Account>, LedgerError>;

    /// Compare-and-swap the balance
    ///
    /// Sets `balance = new_balance` and increments `version` only if the
    /// stored version equals `expected_version`. Returns the updated account.
    async fn update_balance(
        &self,
        id: AccountId,
        new_balance: Decimal,
        expected_version: u64,
    ) -> Result<Account, LedgerError>;

    /// Compare-and-swap the status, with the same version rules as
    /// [`AccountStore::update_balance`]
    async fn update_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        expected_version: u64,
    ) -> Result<Account, LedgerError>;

    /// Remove an account permanently
    async fn delete(&self, id: AccountId) -> Result<(), LedgerError>;
}

/// Durable record of transactions and their status
///
/// Independent consistency domain from the account store; nothing spans
/// both atomically.
#[async_trait]
pub trait TransactionJournal: Send + Sync {
    async fn ping(&self) -> Result<(), LedgerError>;

    /// Insert a new record, failing with `TransactionExists` on a duplicate id
    async fn create(&self, transaction: Transaction) -> Result<Transaction, LedgerError>;

    async fn get_by_id(&self, id: TransactionId) -> Result<Transaction, LedgerError>;

    /// Matching records ordered by creation time, newest first, paginated
    async fn get_by_filter(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, LedgerError>;

    /// Number of matching records, ignoring pagination
    async fn count(&self, filter: &TransactionFilter) -> Result<u64, LedgerError>;

    /// Mark a pending record as taken by a processor
    ///
    /// Re-entrant: claiming an already claimed pending record succeeds.
    /// Fails with `TransactionAlreadyProcessed` once the record is terminal.
    async fn claim(&self, id: TransactionId) -> Result<Transaction, LedgerError>;

    /// Move a pending record to a terminal status
    ///
    /// Transitions are atomic and monotonic: only `pending` records move, and
    /// only to a terminal status. A claimed record cannot be cancelled.
    /// Sets `processed_at` when completing.
    async fn update_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        error_message: Option<String>,
    ) -> Result<Transaction, LedgerError>;
}

/// Durable log of in-flight balance mutations, keyed by transaction
#[async_trait]
pub trait IntentLog: Send + Sync {
    async fn get(&self, transaction_id: TransactionId)
        -> Result<Option<MutationIntent>, LedgerError>;

    /// Insert or replace the intent for its transaction
    async fn record(&self, intent: MutationIntent) -> Result<(), LedgerError>;

    /// Forget an intent; removing a missing intent is not an error
    async fn remove(&self, transaction_id: TransactionId) -> Result<(), LedgerError>;

    async fn list(&self) -> Result<Vec<MutationIntent>, LedgerError>;

    /// Intents retained for out-of-band reconciliation
    async fn unresolved(&self) -> Result<Vec<MutationIntent>, LedgerError>;
}

/// A message handed to a consumer, to be settled with `ack` or `nack`
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: Uuid,
    pub topic: String,
    pub payload: Vec<u8>,
    /// How many times this message has been handed out, starting at 1
    pub delivery_count: u32,
}

/// Durable, at-least-once message transport keyed by topic
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), LedgerError>;

    /// Wait for the next message on a topic; `None` once the queue is closed
    async fn receive(&self, topic: &str) -> Result<Option<Delivery>, LedgerError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), LedgerError>;

    /// Reject a delivery, either putting it back on the topic or routing it
    /// to the topic's dead-letter path
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), LedgerError>;

    /// Resolve once the topic has nothing ready and nothing in flight
    async fn wait_idle(&self, topic: &str) -> Result<(), LedgerError>;

    /// Stop accepting publishes and release waiting consumers
    async fn close(&self) -> Result<(), LedgerError>;
}
