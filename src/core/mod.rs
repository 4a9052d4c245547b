//! Core business logic module
//!
//! - `traits` - Storage and transport abstractions
//! - `memory` - In-memory implementations of those abstractions
//! - `validator` - Acceptance-time request validation
//! - `retry` - Bounded retry policies with backoff
//! - `accounts` - Account lifecycle service
//! - `transactions` - Transaction acceptance, queries and cancellation
//! - `processor` - Asynchronous settlement of accepted transactions
//! - `consumer` - Queue consumer loop driving the processor
//! - `recovery` - Sweep over abandoned balance mutations

pub mod accounts;
pub mod consumer;
pub mod memory;
pub mod processor;
pub mod recovery;
pub mod retry;
pub mod traits;
pub mod transactions;
pub mod validator;

pub use accounts::AccountService;
pub use consumer::{ConsumerStats, MessageHandler, QueueConsumer};
pub use memory::{InMemoryAccountStore, InMemoryIntentLog, InMemoryJournal, InMemoryQueue};
pub use processor::{ProcessOutcome, ProcessorPolicies, TransactionProcessor};
pub use recovery::{RecoverySweep, SweepReport};
pub use retry::{Backoff, RetryPolicy};
pub use transactions::TransactionService;
