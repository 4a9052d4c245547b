//! Asynchronous transaction processor
//!
//! The processor takes a request off the dispatch queue and applies it to
//! the account store, then records the outcome on the journal.
//!
//! # Flow
//!
//! ```text
//! journal.get ── terminal? ──> skip (redelivery)
//!      │
//! journal.claim ── blocks cancellation from here on
//!      │
//! validate ─> intent? ── yes ─> resume from recorded stage
//!      │          └───── no ──> apply legs
//!      │
//! finish ── Ok ─────────────> completed, intent removed
//!        ── retryable err ──> propagated, message retried
//!        ── other err ──────> failed + error message
//! ```
//!
//! # Legs and intents
//!
//! Each balance change is a single CAS on one account. Before every CAS the
//! processor records a [`MutationIntent`] with the stage and the account
//! version it read. Because every successful store write bumps the version,
//! an unchanged version later proves the leg did not land, while a changed
//! one makes it ambiguous.
//!
//! A transfer debits the source first and then credits the destination. If
//! the credit definitely failed, the debit is compensated with a fresh read
//! of the source. If the compensation cannot be completed the mutation is
//! marked unresolved and kept in the intent log for reconciliation.
//!
//! # Leases
//!
//! Clones of a processor share a set of transactions being worked on. A
//! consumer and the recovery sweep never drive the same transaction at the
//! same time: whoever comes second backs off with `TransactionBusy`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashSet;
use rust_decimal::Decimal;
use tracing::Instrument;

use crate::core::consumer::MessageHandler;
use crate::core::retry::RetryPolicy;
use crate::core::traits::{AccountStore, Delivery, IntentLog, TransactionJournal};
use crate::core::validator::validate;
use crate::types::{
    Account, AccountId, ErrorClass, IntentStage, LedgerError, Movement, MutationIntent, TransactionId,
    TransactionRequest, TransactionStatus,
};

/// Retry limits used inside the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorPolicies {
    /// Read-compute-write cycles on `ConcurrentUpdate`
    pub cas: RetryPolicy,
    /// Attempts to credit a transfer source back
    pub compensation: RetryPolicy,
    /// Attempts to write the final journal status
    pub journal: RetryPolicy,
}

impl ProcessorPolicies {
    /// No delays between attempts, for tests and replays
    pub fn immediate() -> Self {
        Self {
            cas: RetryPolicy::immediate(5),
            compensation: RetryPolicy::immediate(10),
            journal: RetryPolicy::immediate(5),
        }
    }
}

/// Result of handling one request
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed,
    /// Recorded on the journal as `failed`
    Failed(LedgerError),
    /// The journal record was already terminal; nothing was touched
    Skipped { status: TransactionStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Debit,
    Credit,
}

impl Leg {
    fn stage(self, version: u64) -> IntentStage {
        match self {
            Leg::Debit => IntentStage::Debiting { version },
            Leg::Credit => IntentStage::Crediting { version },
        }
    }

    fn apply(self, account: &Account, amount: Decimal) -> Result<Decimal, LedgerError> {
        match self {
            Leg::Debit => {
                if account.balance < amount {
                    return Err(LedgerError::insufficient_funds(
                        account.id,
                        account.balance,
                        amount,
                    ));
                }
                account
                    .balance
                    .checked_sub(amount)
                    .ok_or_else(|| LedgerError::arithmetic_overflow("debit", account.id))
            }
            Leg::Credit => account
                .balance
                .checked_add(amount)
                .ok_or_else(|| LedgerError::arithmetic_overflow("credit", account.id)),
        }
    }
}

/// Why a leg failed
#[derive(Debug)]
enum LegError {
    /// The store definitely did not apply the leg
    NotApplied(LedgerError),
    /// The store write itself failed; the leg may or may not have landed
    Unknown(LedgerError),
}

/// Exclusive hold on one transaction, released on drop
pub(crate) struct Lease {
    active: Arc<DashSet<TransactionId>>,
    id: TransactionId,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}

/// Applies queued requests to account balances
#[derive(Clone)]
pub struct TransactionProcessor {
    accounts: Arc<dyn AccountStore>,
    journal: Arc<dyn TransactionJournal>,
    intents: Arc<dyn IntentLog>,
    policies: ProcessorPolicies,
    active: Arc<DashSet<TransactionId>>,
}

impl TransactionProcessor {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        journal: Arc<dyn TransactionJournal>,
        intents: Arc<dyn IntentLog>,
        policies: ProcessorPolicies,
    ) -> Self {
        Self {
            accounts,
            journal,
            intents,
            policies,
            active: Arc::new(DashSet::new()),
        }
    }

    /// Take the lease on `id`, or `None` if a clone already holds it
    pub(crate) fn lease(&self, id: TransactionId) -> Option<Lease> {
        self.active.insert(id).then(|| Lease {
            active: Arc::clone(&self.active),
            id,
        })
    }

    /// Whether some clone of this processor is working on `id`
    pub fn is_active(&self, id: TransactionId) -> bool {
        self.active.contains(&id)
    }

    /// Process a request taken off the queue
    ///
    /// Business failures are recorded on the journal and reported as
    /// [`ProcessOutcome::Failed`]. Only errors worth retrying at the message
    /// level are returned as `Err`.
    pub async fn process(&self, request: &TransactionRequest) -> Result<ProcessOutcome, LedgerError> {
        let id = request.id.ok_or_else(|| LedgerError::Codec {
            message: "request carries no transaction id".to_string(),
        })?;

        let Some(_lease) = self.lease(id) else {
            tracing::debug!(transaction_id = %id, "transaction held by another worker");
            return Err(LedgerError::TransactionBusy { id });
        };

        let span = tracing::info_span!(
            "process",
            transaction_id = %id,
            tx_type = %request.tx_type,
            amount = %request.amount
        );
        self.process_claimed(id, request).instrument(span).await
    }

    async fn process_claimed(
        &self,
        id: TransactionId,
        request: &TransactionRequest,
    ) -> Result<ProcessOutcome, LedgerError> {
        tracing::info!("processing transaction");

        let record = self.journal.get_by_id(id).await?;
        if record.status.is_terminal() {
            tracing::debug!(status = %record.status, "already finalized, skipping");
            return Ok(ProcessOutcome::Skipped {
                status: record.status,
            });
        }

        if let Some(status) = self.claim(id).await? {
            return Ok(ProcessOutcome::Skipped { status });
        }

        let outcome = match validate(request) {
            Err(e) => Err(e),
            Ok(movement) => match self.intents.get(id).await? {
                Some(intent) => {
                    tracing::info!(stage = ?intent.stage, "resuming recorded intent");
                    self.resume(intent).await
                }
                None => {
                    // Nothing is written until the first leg records its stage
                    let intent = MutationIntent::new(
                        id,
                        movement,
                        request.amount,
                        &request.currency,
                        IntentStage::Applied,
                    );
                    self.apply(intent).await
                }
            },
        };

        self.finish(id, outcome).await
    }

    /// Resume a pending transaction from its recorded intent
    ///
    /// Used by the recovery sweep for intents whose message is gone. Fails
    /// with `TransactionBusy` while a consumer is processing the transaction.
    pub async fn resume_pending(
        &self,
        intent: MutationIntent,
    ) -> Result<ProcessOutcome, LedgerError> {
        let id = intent.transaction_id;
        let Some(_lease) = self.lease(id) else {
            return Err(LedgerError::TransactionBusy { id });
        };

        let span = tracing::info_span!("recover", transaction_id = %id);
        async move {
            if let Some(status) = self.claim(id).await? {
                return Ok(ProcessOutcome::Skipped { status });
            }
            let outcome = self.resume(intent).await;
            self.finish(id, outcome).await
        }
        .instrument(span)
        .await
    }

    /// Claim the journal record, returning its status if it is already terminal
    async fn claim(&self, id: TransactionId) -> Result<Option<TransactionStatus>, LedgerError> {
        match self.journal.claim(id).await {
            Ok(_) => Ok(None),
            Err(LedgerError::TransactionAlreadyProcessed { status, .. }) => {
                tracing::debug!(%status, "finalized concurrently, skipping");
                Ok(Some(status))
            }
            Err(e) => Err(e),
        }
    }

    async fn apply(&self, mut intent: MutationIntent) -> Result<(), LedgerError> {
        match intent.movement {
            Movement::Deposit { to } => self.single_leg(&mut intent, Leg::Credit, to).await,
            Movement::Withdrawal { from } => self.single_leg(&mut intent, Leg::Debit, from).await,
            Movement::Transfer { from, to } => self.transfer(&mut intent, from, to).await,
        }
    }

    async fn single_leg(
        &self,
        intent: &mut MutationIntent,
        leg: Leg,
        account_id: AccountId,
    ) -> Result<(), LedgerError> {
        match self.apply_leg(intent, leg, account_id).await {
            Ok(account) => {
                tracing::debug!(account = %account_id, balance = %account.balance, "leg applied");
                self.record_stage(intent, IntentStage::Applied).await
            }
            Err(LegError::NotApplied(e)) => {
                self.intents.remove(intent.transaction_id).await?;
                Err(e)
            }
            // Keep the intent so the next attempt can tell whether it landed
            Err(LegError::Unknown(e)) => Err(e),
        }
    }

    async fn transfer(
        &self,
        intent: &mut MutationIntent,
        from: AccountId,
        to: AccountId,
    ) -> Result<(), LedgerError> {
        let source = self.accounts.get_by_id(from).await?;
        check_account(&source, &intent.currency)?;
        if source.balance < intent.amount {
            return Err(LedgerError::insufficient_funds(
                from,
                source.balance,
                intent.amount,
            ));
        }
        let destination = self.accounts.get_by_id(to).await?;
        check_account(&destination, &intent.currency)?;

        match self.apply_leg(intent, Leg::Debit, from).await {
            Ok(_) => {}
            Err(LegError::NotApplied(e)) => {
                self.intents.remove(intent.transaction_id).await?;
                return Err(e);
            }
            Err(LegError::Unknown(e)) => return Err(e),
        }

        self.credit_transfer(intent, from, to).await
    }

    /// Credit leg of a transfer whose debit has been applied
    async fn credit_transfer(
        &self,
        intent: &mut MutationIntent,
        from: AccountId,
        to: AccountId,
    ) -> Result<(), LedgerError> {
        match self.apply_leg(intent, Leg::Credit, to).await {
            Ok(_) => {
                // The money has moved; a failed stage write must not undo that
                if let Err(e) = self.record_stage(intent, IntentStage::Applied).await {
                    tracing::warn!(error = %e, "failed to record applied transfer");
                }
                Ok(())
            }
            Err(LegError::NotApplied(cause)) => self.compensate(intent, from, cause).await,
            Err(LegError::Unknown(e)) => Err(e),
        }
    }

    /// Read-compute-write one leg, retrying on `ConcurrentUpdate`
    async fn apply_leg(
        &self,
        intent: &mut MutationIntent,
        leg: Leg,
        account_id: AccountId,
    ) -> Result<Account, LegError> {
        let policy = self.policies.cas;
        let mut attempt = 1;
        loop {
            let account = self
                .accounts
                .get_by_id(account_id)
                .await
                .map_err(LegError::NotApplied)?;
            check_account(&account, &intent.currency).map_err(LegError::NotApplied)?;
            let new_balance = leg
                .apply(&account, intent.amount)
                .map_err(LegError::NotApplied)?;

            self.record_stage(intent, leg.stage(account.version))
                .await
                .map_err(LegError::NotApplied)?;

            match self
                .accounts
                .update_balance(account_id, new_balance, account.version)
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_concurrent_update() && policy.has_attempts_left(attempt) => {
                    tracing::debug!(
                        account = %account_id,
                        attempt,
                        ?leg,
                        "version conflict, re-reading account"
                    );
                    policy.pause(attempt).await;
                    attempt += 1;
                }
                Err(e) if e.class() == ErrorClass::Infrastructure => {
                    return Err(LegError::Unknown(e))
                }
                Err(e) => return Err(LegError::NotApplied(e)),
            }
        }
    }

    /// Credit the transfer source back after the credit leg failed
    ///
    /// Always works from a fresh read of the source. Returns
    /// `TransferReversed` on success and `UnresolvedMutation` when the source
    /// cannot be restored.
    async fn compensate(
        &self,
        intent: &mut MutationIntent,
        from: AccountId,
        cause: LedgerError,
    ) -> Result<(), LedgerError> {
        let reason = cause.to_string();
        tracing::warn!(account = %from, %reason, "credit failed, compensating debit");

        let policy = self.policies.compensation;
        // Version of a compensating write whose outcome is unknown
        let mut uncertain: Option<u64> = None;
        let mut attempt = 1;
        let mut last_error = cause;

        loop {
            if attempt > policy.max_attempts {
                let reason = format!(
                    "compensation failed after {} attempts: {}; original failure: {}",
                    policy.max_attempts, last_error, reason
                );
                return Err(self.mark_unresolved(intent, from, reason).await);
            }

            let source = match self.accounts.get_by_id(from).await {
                Ok(source) => source,
                Err(e @ LedgerError::AccountNotFound { .. }) => {
                    let reason = format!("{e}; original failure: {reason}");
                    return Err(self.mark_unresolved(intent, from, reason).await);
                }
                Err(e) => {
                    last_error = e;
                    policy.pause(attempt).await;
                    attempt += 1;
                    continue;
                }
            };

            if let Some(version) = uncertain {
                if source.version != version {
                    let reason = format!(
                        "compensating credit outcome unknown ({last_error}); original failure: {reason}"
                    );
                    return Err(self.mark_unresolved(intent, from, reason).await);
                }
                uncertain = None;
            }

            let Some(restored) = source.balance.checked_add(intent.amount) else {
                let error = LedgerError::arithmetic_overflow("compensation", from);
                let reason = format!("{error}; original failure: {reason}");
                return Err(self.mark_unresolved(intent, from, reason).await);
            };

            if let Err(e) = self
                .record_stage(
                    intent,
                    IntentStage::Compensating {
                        version: source.version,
                    },
                )
                .await
            {
                last_error = e;
                policy.pause(attempt).await;
                attempt += 1;
                continue;
            }

            match self
                .accounts
                .update_balance(from, restored, source.version)
                .await
            {
                Ok(_) => break,
                Err(e) if e.is_concurrent_update() => {
                    tracing::debug!(account = %from, attempt, "compensation conflict, retrying");
                    last_error = e;
                }
                Err(e) if e.is_retryable() => {
                    uncertain = Some(source.version);
                    last_error = e;
                }
                Err(e) => {
                    let reason = format!("compensation refused: {e}; original failure: {reason}");
                    return Err(self.mark_unresolved(intent, from, reason).await);
                }
            }
            policy.pause(attempt).await;
            attempt += 1;
        }

        tracing::warn!(account = %from, amount = %intent.amount, "transfer debit compensated");
        let stage = IntentStage::Compensated {
            reason: reason.clone(),
        };
        if let Err(e) = self.record_stage(intent, stage).await {
            tracing::warn!(error = %e, "failed to record compensation");
        }
        Err(LedgerError::TransferReversed {
            transaction: intent.transaction_id,
            reason,
        })
    }

    /// Continue a mutation from the stage recorded before an interruption
    async fn resume(&self, mut intent: MutationIntent) -> Result<(), LedgerError> {
        let movement = intent.movement;
        match intent.stage.clone() {
            IntentStage::Applied => Ok(()),
            IntentStage::Compensated { reason } => Err(LedgerError::TransferReversed {
                transaction: intent.transaction_id,
                reason,
            }),
            IntentStage::Unresolved { reason } => Err(unresolved_error(&intent, reason)),
            IntentStage::Debiting { version } => {
                let Some(from) = movement.source() else {
                    return Err(self
                        .mark_unresolved_any(&mut intent, "debit recorded for a deposit")
                        .await);
                };
                if !self.version_unchanged(&mut intent, from, version).await? {
                    return Err(self
                        .mark_unresolved(&mut intent, from, "debit outcome unknown".to_string())
                        .await);
                }
                self.apply(intent).await
            }
            IntentStage::Crediting { version } => {
                let Some(to) = movement.destination() else {
                    return Err(self
                        .mark_unresolved_any(&mut intent, "credit recorded for a withdrawal")
                        .await);
                };
                if !self.version_unchanged(&mut intent, to, version).await? {
                    return Err(self
                        .mark_unresolved(&mut intent, to, "credit outcome unknown".to_string())
                        .await);
                }
                match movement {
                    Movement::Transfer { from, to } => {
                        self.credit_transfer(&mut intent, from, to).await
                    }
                    _ => self.apply(intent).await,
                }
            }
            IntentStage::Compensating { version } => {
                let Some(from) = movement.source() else {
                    return Err(self
                        .mark_unresolved_any(&mut intent, "compensation recorded for a deposit")
                        .await);
                };
                if !self.version_unchanged(&mut intent, from, version).await? {
                    return Err(self
                        .mark_unresolved(
                            &mut intent,
                            from,
                            "compensating credit outcome unknown".to_string(),
                        )
                        .await);
                }
                let cause = LedgerError::storage("interrupted before compensation completed");
                self.compensate(&mut intent, from, cause).await
            }
        }
    }

    /// Whether the account is still at the version recorded in the intent
    ///
    /// A vanished account cannot be checked and makes the mutation unresolved.
    async fn version_unchanged(
        &self,
        intent: &mut MutationIntent,
        account_id: AccountId,
        version: u64,
    ) -> Result<bool, LedgerError> {
        match self.accounts.get_by_id(account_id).await {
            Ok(account) => Ok(account.version == version),
            Err(LedgerError::AccountNotFound { .. }) => {
                tracing::warn!(
                    transaction_id = %intent.transaction_id,
                    account = %account_id,
                    "account vanished while a mutation was in flight"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Record the final journal status and clean up the intent
    async fn finish(
        &self,
        id: TransactionId,
        outcome: Result<(), LedgerError>,
    ) -> Result<ProcessOutcome, LedgerError> {
        match outcome {
            Ok(()) => {
                if let Some(status) = self.finalize(id, TransactionStatus::Completed, None).await? {
                    return Ok(ProcessOutcome::Skipped { status });
                }
                self.forget_intent(id).await;
                tracing::info!("transaction completed");
                Ok(ProcessOutcome::Completed)
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "transaction processing interrupted");
                Err(e)
            }
            Err(e) => {
                let message = e.to_string();
                if let Some(status) = self
                    .finalize(id, TransactionStatus::Failed, Some(message))
                    .await?
                {
                    return Ok(ProcessOutcome::Skipped { status });
                }
                match e {
                    LedgerError::UnresolvedMutation { .. } => {
                        tracing::error!(error = %e, "transaction failed with unresolved state")
                    }
                    _ => {
                        self.forget_intent(id).await;
                        tracing::warn!(error = %e, "transaction failed");
                    }
                }
                Ok(ProcessOutcome::Failed(e))
            }
        }
    }

    /// Write a terminal status, returning the existing status if another
    /// writer got there first
    async fn finalize(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        error_message: Option<String>,
    ) -> Result<Option<TransactionStatus>, LedgerError> {
        let result = self
            .policies
            .journal
            .run(
                "finalize transaction",
                |_| self.journal.update_status(id, status, error_message.clone()),
                LedgerError::is_retryable,
            )
            .await;

        match result {
            Ok(_) => Ok(None),
            Err(LedgerError::TransactionAlreadyProcessed { status: existing, .. }) => {
                tracing::warn!(%existing, wanted = %status, "journal already finalized");
                Ok(Some(existing))
            }
            Err(e) => Err(e),
        }
    }

    async fn forget_intent(&self, id: TransactionId) {
        if let Err(e) = self.intents.remove(id).await {
            tracing::warn!(transaction_id = %id, error = %e, "failed to remove settled intent");
        }
    }

    async fn record_stage(
        &self,
        intent: &mut MutationIntent,
        stage: IntentStage,
    ) -> Result<(), LedgerError> {
        intent.stage = stage;
        intent.updated_at = Utc::now();
        self.intents.record(intent.clone()).await
    }

    /// Flag a mutation for out-of-band reconciliation
    async fn mark_unresolved(
        &self,
        intent: &mut MutationIntent,
        account: AccountId,
        reason: String,
    ) -> LedgerError {
        tracing::error!(
            transaction_id = %intent.transaction_id,
            %account,
            amount = %intent.amount,
            %reason,
            "mutation left unresolved, reconciliation required"
        );
        let error = LedgerError::UnresolvedMutation {
            transaction: intent.transaction_id,
            account,
            amount: intent.amount,
            reason: reason.clone(),
        };
        if let Err(e) = self
            .record_stage(intent, IntentStage::Unresolved { reason })
            .await
        {
            tracing::error!(error = %e, "failed to record unresolved intent");
        }
        error
    }

    async fn mark_unresolved_any(&self, intent: &mut MutationIntent, reason: &str) -> LedgerError {
        let account = intent.exposed_account().unwrap_or_default();
        self.mark_unresolved(intent, account, reason.to_string())
            .await
    }

    /// Give up on a message whose retries are exhausted
    ///
    /// Marks the journal record failed, unless a mutation may be half
    /// applied; such records are left pending for the recovery sweep.
    pub async fn abandon(&self, id: TransactionId, error: &LedgerError) -> Result<(), LedgerError> {
        match self.intents.get(id).await? {
            Some(intent) if !matches!(intent.stage, IntentStage::Unresolved { .. }) => {
                tracing::error!(
                    transaction_id = %id,
                    stage = ?intent.stage,
                    %error,
                    "retries exhausted with a mutation in flight, leaving it to recovery"
                );
                Ok(())
            }
            _ => {
                let message = format!("processing abandoned: {error}");
                match self
                    .finalize(id, TransactionStatus::Failed, Some(message))
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(LedgerError::TransactionNotFound { .. }) => {
                        tracing::warn!(transaction_id = %id, "abandoned message has no journal record");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}

#[async_trait]
impl MessageHandler for TransactionProcessor {
    async fn handle(&self, delivery: &Delivery) -> Result<(), LedgerError> {
        let request: TransactionRequest = serde_json::from_slice(&delivery.payload)?;
        self.process(&request).await.map(|_| ())
    }

    async fn on_exhausted(&self, delivery: &Delivery, error: &LedgerError) {
        let id = serde_json::from_slice::<TransactionRequest>(&delivery.payload)
            .ok()
            .and_then(|request| request.id);
        let Some(id) = id else {
            tracing::error!(delivery = %delivery.id, %error, "undecodable message dropped");
            return;
        };
        if let Err(e) = self.abandon(id, error).await {
            tracing::error!(transaction_id = %id, error = %e, "failed to record abandoned transaction");
        }
    }
}

fn check_account(account: &Account, currency: &str) -> Result<(), LedgerError> {
    if !account.is_active() {
        return Err(LedgerError::account_inactive(account.id, account.status));
    }
    if account.currency != currency {
        return Err(LedgerError::currency_mismatch(
            account.id,
            &account.currency,
            currency,
        ));
    }
    Ok(())
}

fn unresolved_error(intent: &MutationIntent, reason: String) -> LedgerError {
    LedgerError::UnresolvedMutation {
        transaction: intent.transaction_id,
        account: intent.exposed_account().unwrap_or_default(),
        amount: intent.amount,
        reason,
    }
}
