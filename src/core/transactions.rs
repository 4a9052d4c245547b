//! Transaction acceptance service
//!
//! Accepting a request means validating it, writing the `pending` journal
//! record and publishing the request to the dispatch topic. Balances are
//! applied later by the processor; callers poll the journal for the outcome.

use std::sync::Arc;

use uuid::Uuid;

use crate::core::traits::{DispatchQueue, TransactionJournal};
use crate::core::validator::validate;
use crate::types::{
    AccountId, LedgerError, Transaction, TransactionFilter, TransactionId, TransactionRequest,
    TransactionStatus,
};

#[derive(Clone)]
pub struct TransactionService {
    journal: Arc<dyn TransactionJournal>,
    queue: Arc<dyn DispatchQueue>,
    topic: String,
}

impl TransactionService {
    pub fn new(
        journal: Arc<dyn TransactionJournal>,
        queue: Arc<dyn DispatchQueue>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            journal,
            queue,
            topic: topic.into(),
        }
    }

    /// Accept a request for asynchronous processing
    ///
    /// Returns the `pending` journal record. If publishing fails the record
    /// is marked `failed` and the queue error is returned.
    pub async fn submit(&self, mut request: TransactionRequest) -> Result<Transaction, LedgerError> {
        let movement = validate(&request)?;
        let id = *request.id.get_or_insert_with(Uuid::new_v4);

        let transaction = self
            .journal
            .create(Transaction::pending(id, movement.tx_type(), &request))
            .await?;

        let payload = serde_json::to_vec(&request)?;
        if let Err(e) = self.queue.publish(&self.topic, payload).await {
            tracing::error!(transaction_id = %id, error = %e, "failed to publish transaction");
            if let Err(update) = self
                .journal
                .update_status(id, TransactionStatus::Failed, Some(e.to_string()))
                .await
            {
                tracing::error!(transaction_id = %id, error = %update, "failed to mark unpublished transaction");
            }
            return Err(e);
        }

        tracing::info!(
            transaction_id = %id,
            tx_type = %transaction.tx_type,
            amount = %transaction.amount,
            "transaction accepted"
        );
        Ok(transaction)
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.journal.get_by_id(id).await
    }

    pub async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.journal.get_by_filter(filter).await
    }

    /// Journal entries touching an account on either side
    pub async fn get_history(
        &self,
        account_id: AccountId,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let filter = TransactionFilter {
            account_id: Some(account_id),
            ..filter
        };
        self.journal.get_by_filter(&filter).await
    }

    /// Cancel a transaction the processor has not picked up yet
    pub async fn cancel(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        let transaction = self
            .journal
            .update_status(
                id,
                TransactionStatus::Cancelled,
                Some("Cancelled by user".to_string()),
            )
            .await?;
        tracing::info!(transaction_id = %id, "transaction cancelled");
        Ok(transaction)
    }
}
