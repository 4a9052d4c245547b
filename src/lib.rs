//! Banking Ledger Library
//! # Overview
//!
//! A monetary ledger: accounts holding a single-currency balance, and
//! deposits, withdrawals and transfers that are accepted synchronously and
//! settled asynchronously by a pool of queue consumers.
//!
//! # Architecture
//!
//! - [`types`] - Core data types (Account, Transaction, MutationIntent, errors)
//! - [`core`] - Business logic:
//!   - [`core::accounts`] - Account lifecycle
//!   - [`core::transactions`] - Acceptance (validate, journal, publish), queries, cancellation
//!   - [`core::processor`] - Settlement with optimistic concurrency and transfer compensation
//!   - [`core::consumer`] - Queue consumption with retry and dead-lettering
//!   - [`core::recovery`] - Sweep over abandoned balance mutations
//!   - [`core::memory`] - In-memory stores and dispatch queue
//! - [`runtime`] - Configuration, wiring and CSV replay
//! - [`io`] - CSV parsing and output
//! - [`cli`] - CLI arguments parsing
//! - [`telemetry`] - Tracing setup
//!
//! # Transaction Lifecycle
//!
//! ```text
//! submit ──► pending ──► completed
//!              │   └───► failed
//!              └───────► cancelled   (only before a processor claims it)
//! ```
//!
//! Every balance change is a compare-and-swap on the account version. A
//! transfer debits the source first; if the credit cannot be applied, the
//! debit is credited back and the transfer fails. A mutation whose outcome
//! cannot be established is reported as unresolved instead of being guessed.

pub mod cli;
pub mod core;
pub mod io;
pub mod runtime;
pub mod telemetry;
pub mod types;

pub use core::{AccountService, TransactionProcessor, TransactionService};
pub use io::write_accounts_csv;
pub use runtime::{Ledger, LedgerConfig, LedgerStores};
pub use types::{
    Account, AccountId, AccountStatus, LedgerError, Transaction, TransactionId,
    TransactionRequest, TransactionStatus, TransactionType,
};
