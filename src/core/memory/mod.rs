//! In-memory implementations of the store and queue traits
//!
//! All of them use `DashMap` for fine-grained locking, so operations on
//! different keys proceed in parallel. They back the replay CLI and the test
//! suites, and serve as the reference behavior for durable backends.

pub mod account_store;
pub mod intent_log;
pub mod journal;
pub mod queue;

pub use account_store::InMemoryAccountStore;
pub use intent_log::InMemoryIntentLog;
pub use journal::InMemoryJournal;
pub use queue::InMemoryQueue;
