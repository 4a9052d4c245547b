//! Recovery sweep for interrupted mutations
//!
//! A mutation intent normally lives only while its message is being
//! processed. One that sits untouched past the staleness threshold belongs to
//! a message that was abandoned or lost, and the sweep settles it:
//!
//! - journal still `pending`: resume through the processor
//! - journal terminal, intent settled: remove the leftover intent
//! - journal terminal, intent still in flight: flag for reconciliation
//! - `Unresolved` intents are left alone for operators
//!
//! Transactions a consumer of the same processor is still working on are
//! skipped whatever their age.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::core::processor::{ProcessOutcome, TransactionProcessor};
use crate::core::traits::{IntentLog, TransactionJournal};
use crate::types::{IntentStage, LedgerError, MutationIntent};

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub resumed: usize,
    pub cleaned: usize,
    pub flagged: usize,
    pub errors: usize,
}

pub struct RecoverySweep {
    processor: TransactionProcessor,
    journal: Arc<dyn TransactionJournal>,
    intents: Arc<dyn IntentLog>,
    stale_after: Duration,
}

impl RecoverySweep {
    pub fn new(
        processor: TransactionProcessor,
        journal: Arc<dyn TransactionJournal>,
        intents: Arc<dyn IntentLog>,
        stale_after: Duration,
    ) -> Self {
        Self {
            processor,
            journal,
            intents,
            stale_after,
        }
    }

    /// Settle every intent older than the staleness threshold at `now`
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, LedgerError> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        let mut report = SweepReport::default();

        for intent in self.intents.list().await? {
            if matches!(intent.stage, IntentStage::Unresolved { .. }) {
                continue;
            }
            if now.signed_duration_since(intent.updated_at) < stale_after
                || self.processor.is_active(intent.transaction_id)
            {
                continue;
            }
            report.examined += 1;

            let id = intent.transaction_id;
            if let Err(e) = self.settle(intent, &mut report).await {
                report.errors += 1;
                tracing::warn!(transaction_id = %id, error = %e, "recovery of intent failed");
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                resumed = report.resumed,
                cleaned = report.cleaned,
                flagged = report.flagged,
                errors = report.errors,
                "recovery sweep finished"
            );
        }
        Ok(report)
    }

    async fn settle(
        &self,
        mut intent: MutationIntent,
        report: &mut SweepReport,
    ) -> Result<(), LedgerError> {
        let id = intent.transaction_id;
        let record = match self.journal.get_by_id(id).await {
            Ok(record) => record,
            Err(LedgerError::TransactionNotFound { .. }) if !intent.stage.is_in_flight() => {
                self.intents.remove(id).await?;
                report.cleaned += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if !record.status.is_terminal() {
            match self.processor.resume_pending(intent).await {
                Ok(ProcessOutcome::Skipped { .. }) => {}
                Ok(_) => report.resumed += 1,
                Err(LedgerError::TransactionBusy { .. }) => {
                    tracing::debug!(transaction_id = %id, "picked up by a consumer, skipping");
                }
                Err(e) => return Err(e),
            }
            return Ok(());
        }

        if intent.stage.is_in_flight() {
            let reason = format!(
                "transaction {} with a mutation in flight at {:?}",
                record.status, intent.stage
            );
            tracing::error!(
                transaction_id = %id,
                account = ?intent.exposed_account(),
                %reason,
                "mutation left unresolved, reconciliation required"
            );
            intent.stage = IntentStage::Unresolved { reason };
            intent.updated_at = Utc::now();
            self.intents.record(intent).await?;
            report.flagged += 1;
        } else {
            self.intents.remove(id).await?;
            report.cleaned += 1;
        }
        Ok(())
    }

    /// Sweep every `interval` until cancelled
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(Utc::now()).await {
                        tracing::warn!(error = %e, "recovery sweep failed");
                    }
                }
            }
        }
    }
}
