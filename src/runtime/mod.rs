//! Ledger runtime
//!
//! Wires the stores, the dispatch queue, the services and the processor pool
//! into a running [`Ledger`].
//!
//! # Architecture
//!
//! ```text
//! Ledger
//!     ├── AccountService       (account lifecycle)
//!     ├── TransactionService   (validate → journal → publish)
//!     ├── QueueConsumer × N    (TransactionProcessor per message)
//!     └── RecoverySweep        (stale intents)
//! ```

pub mod config;
pub mod replay;

use std::sync::Arc;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::core::consumer::{ConsumerStats, QueueConsumer};
use crate::core::memory::{InMemoryAccountStore, InMemoryIntentLog, InMemoryJournal, InMemoryQueue};
use crate::core::processor::TransactionProcessor;
use crate::core::recovery::RecoverySweep;
use crate::core::traits::{AccountStore, DispatchQueue, IntentLog, TransactionJournal};
use crate::core::{AccountService, TransactionService};
use crate::types::LedgerError;

pub use config::LedgerConfig;

/// Storage and transport backends of a ledger
#[derive(Clone)]
pub struct LedgerStores {
    pub accounts: Arc<dyn AccountStore>,
    pub journal: Arc<dyn TransactionJournal>,
    pub intents: Arc<dyn IntentLog>,
    pub queue: Arc<dyn DispatchQueue>,
}

impl LedgerStores {
    pub fn in_memory() -> Self {
        Self {
            accounts: Arc::new(InMemoryAccountStore::new()),
            journal: Arc::new(InMemoryJournal::new()),
            intents: Arc::new(InMemoryIntentLog::new()),
            queue: Arc::new(InMemoryQueue::new()),
        }
    }
}

/// A connected ledger and, once started, its processor pool
pub struct Ledger {
    config: LedgerConfig,
    stores: LedgerStores,
    accounts: AccountService,
    transactions: TransactionService,
    processor: TransactionProcessor,
    shutdown: CancellationToken,
    workers: JoinSet<ConsumerStats>,
    recovery: Option<JoinHandle<()>>,
}

impl Ledger {
    /// Check the stores are reachable and build the services
    ///
    /// An unreachable account store or journal at startup is fatal.
    pub async fn connect(config: LedgerConfig, stores: LedgerStores) -> Result<Self, LedgerError> {
        stores.accounts.ping().await.map_err(|e| {
            tracing::error!(error = %e, "account store unreachable");
            e
        })?;
        stores.journal.ping().await.map_err(|e| {
            tracing::error!(error = %e, "transaction journal unreachable");
            e
        })?;

        let accounts = AccountService::new(
            stores.accounts.clone(),
            stores.journal.clone(),
            config.cas_retry,
        );
        let transactions =
            TransactionService::new(stores.journal.clone(), stores.queue.clone(), &config.topic);
        let processor = TransactionProcessor::new(
            stores.accounts.clone(),
            stores.journal.clone(),
            stores.intents.clone(),
            config.processor_policies(),
        );

        tracing::info!(topic = %config.topic, workers = config.workers, "ledger connected");
        Ok(Self {
            config,
            stores,
            accounts,
            transactions,
            processor,
            shutdown: CancellationToken::new(),
            workers: JoinSet::new(),
            recovery: None,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn stores(&self) -> &LedgerStores {
        &self.stores
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    pub fn transactions(&self) -> &TransactionService {
        &self.transactions
    }

    pub fn processor(&self) -> &TransactionProcessor {
        &self.processor
    }

    pub fn recovery(&self) -> RecoverySweep {
        RecoverySweep::new(
            self.processor.clone(),
            self.stores.journal.clone(),
            self.stores.intents.clone(),
            self.config.recovery_stale_after,
        )
    }

    /// Spawn the consumer pool and the recovery loop
    ///
    /// Must be called from within a tokio runtime. Calling it twice has no
    /// further effect.
    pub fn start(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        let handler = Arc::new(self.processor.clone());
        for worker in 0..self.config.workers {
            let consumer = QueueConsumer::new(
                self.stores.queue.clone(),
                self.config.topic.clone(),
                handler.clone(),
                self.config.message_retry,
                worker,
            );
            self.workers.spawn(consumer.run(self.shutdown.child_token()));
        }

        let sweep = self.recovery();
        self.recovery = Some(tokio::spawn(
            sweep.run(self.config.recovery_interval, self.shutdown.child_token()),
        ));
        tracing::info!(workers = self.config.workers, "processor pool started");
    }

    /// Wait until every published request has been settled
    pub async fn drain(&self) -> Result<(), LedgerError> {
        self.stores.queue.wait_idle(&self.config.topic).await
    }

    /// Stop the pool, close the queue and collect consumer statistics
    pub async fn shutdown(mut self) -> Result<ConsumerStats, LedgerError> {
        self.shutdown.cancel();
        self.stores.queue.close().await?;

        let mut total = ConsumerStats::default();
        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(stats) => {
                    total.acked += stats.acked;
                    total.dead_lettered += stats.dead_lettered;
                }
                Err(e) => tracing::error!(error = %e, "consumer task failed"),
            }
        }
        if let Some(recovery) = self.recovery.take() {
            if let Err(e) = recovery.await {
                tracing::error!(error = %e, "recovery task failed");
            }
        }

        tracing::info!(
            acked = total.acked,
            dead_lettered = total.dead_lettered,
            "ledger stopped"
        );
        Ok(total)
    }
}
