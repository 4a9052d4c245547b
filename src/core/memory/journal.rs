//! Concurrent in-memory transaction journal
//!
//! Records are kept in a `DashMap` keyed by transaction id. Status changes run
//! under the entry lock, so the pending check and the transition are one
//! atomic step and two finalizers can never both succeed.
//!
//! Queries scan the whole map; this store is meant for tests, replays and
//! single-process deployments, not large histories.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::core::traits::TransactionJournal;
use crate::types::{
    LedgerError, Transaction, TransactionFilter, TransactionId, TransactionStatus,
};

#[derive(Debug, Clone)]
struct Slot {
    seq: u64,
    transaction: Transaction,
}

#[derive(Debug, Default)]
pub struct InMemoryJournal {
    transactions: DashMap<TransactionId, Slot>,
    next_seq: AtomicU64,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Every record in acceptance order
    pub fn snapshot(&self) -> Vec<Transaction> {
        let mut slots: Vec<Slot> = self
            .transactions
            .iter()
            .map(|e| e.value().clone())
            .collect();
        slots.sort_by_key(|s| s.seq);
        slots.into_iter().map(|s| s.transaction).collect()
    }

    fn matching(&self, filter: &TransactionFilter) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self
            .transactions
            .iter()
            .filter(|e| filter.matches(&e.value().transaction))
            .map(|e| e.value().clone())
            .collect();
        // Newest first; the sequence breaks ties between equal timestamps
        slots.sort_by(|a, b| {
            b.transaction
                .created_at
                .cmp(&a.transaction.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        slots
    }
}

#[async_trait]
impl TransactionJournal for InMemoryJournal {
    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn create(&self, transaction: Transaction) -> Result<Transaction, LedgerError> {
        let id = transaction.id;
        let mut inserted = false;
        self.transactions.entry(id).or_insert_with(|| {
            inserted = true;
            Slot {
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                transaction: transaction.clone(),
            }
        });

        if !inserted {
            return Err(LedgerError::TransactionExists { id });
        }
        Ok(transaction)
    }

    async fn get_by_id(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.transactions
            .get(&id)
            .map(|slot| slot.transaction.clone())
            .ok_or_else(|| LedgerError::transaction_not_found(id))
    }

    async fn get_by_filter(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let limit = if filter.limit == 0 {
            usize::MAX
        } else {
            filter.limit
        };
        Ok(self
            .matching(filter)
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .map(|s| s.transaction)
            .collect())
    }

    async fn count(&self, filter: &TransactionFilter) -> Result<u64, LedgerError> {
        let count = self
            .transactions
            .iter()
            .filter(|e| filter.matches(&e.value().transaction))
            .count();
        Ok(count as u64)
    }

    async fn claim(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        let mut entry = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| LedgerError::transaction_not_found(id))?;

        let transaction = &mut entry.transaction;
        if transaction.status.is_terminal() {
            return Err(LedgerError::already_processed(id, transaction.status));
        }
        if transaction.claimed_at.is_none() {
            let now = Utc::now();
            transaction.claimed_at = Some(now);
            transaction.updated_at = now;
        }
        Ok(transaction.clone())
    }

    async fn update_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        error_message: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        let mut entry = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| LedgerError::transaction_not_found(id))?;

        let transaction = &mut entry.transaction;
        if !status.is_terminal() {
            return Err(LedgerError::InvalidStatusTransition {
                id,
                from: transaction.status,
                to: status,
            });
        }
        if transaction.status.is_terminal() {
            return Err(LedgerError::already_processed(id, transaction.status));
        }
        if status == TransactionStatus::Cancelled && transaction.claimed_at.is_some() {
            return Err(LedgerError::already_processed(id, transaction.status));
        }

        let now = Utc::now();
        transaction.status = status;
        transaction.error_message = error_message;
        transaction.updated_at = now;
        if status == TransactionStatus::Completed {
            transaction.processed_at = Some(now);
        }
        Ok(transaction.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TransactionRequest, TransactionType};
    use rstest::rstest;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn deposit(amount: i64) -> Transaction {
        let request = TransactionRequest::deposit(Uuid::new_v4(), Decimal::new(amount, 0), "USD");
        Transaction::pending(Uuid::new_v4(), TransactionType::Deposit, &request)
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let journal = InMemoryJournal::new();
        let tx = deposit(10);
        journal.create(tx.clone()).await.unwrap();

        let result = journal.create(tx.clone()).await;
        assert_eq!(result, Err(LedgerError::TransactionExists { id: tx.id }));
        assert_eq!(journal.len(), 1);
    }

    #[rstest]
    #[case::completed(TransactionStatus::Completed)]
    #[case::failed(TransactionStatus::Failed)]
    #[case::cancelled(TransactionStatus::Cancelled)]
    #[tokio::test]
    async fn test_terminal_status_is_final(#[case] status: TransactionStatus) {
        let journal = InMemoryJournal::new();
        let tx = journal.create(deposit(10)).await.unwrap();

        journal.update_status(tx.id, status, None).await.unwrap();

        for next in [
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
        ] {
            let result = journal.update_status(tx.id, next, None).await;
            assert_eq!(result, Err(LedgerError::already_processed(tx.id, status)));
        }
        assert_eq!(journal.get_by_id(tx.id).await.unwrap().status, status);
    }

    #[tokio::test]
    async fn test_back_to_pending_is_invalid() {
        let journal = InMemoryJournal::new();
        let tx = journal.create(deposit(10)).await.unwrap();

        let result = journal
            .update_status(tx.id, TransactionStatus::Pending, None)
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::InvalidStatusTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_processed_at_only_on_completion() {
        let journal = InMemoryJournal::new();
        let completed = journal.create(deposit(10)).await.unwrap();
        let failed = journal.create(deposit(20)).await.unwrap();

        let completed = journal
            .update_status(completed.id, TransactionStatus::Completed, None)
            .await
            .unwrap();
        let failed = journal
            .update_status(
                failed.id,
                TransactionStatus::Failed,
                Some("insufficient funds".to_string()),
            )
            .await
            .unwrap();

        assert!(completed.processed_at.is_some());
        assert!(failed.processed_at.is_none());
        assert_eq!(failed.error_message.as_deref(), Some("insufficient funds"));
    }

    #[tokio::test]
    async fn test_claim_blocks_cancellation() {
        let journal = InMemoryJournal::new();
        let tx = journal.create(deposit(10)).await.unwrap();

        let claimed = journal.claim(tx.id).await.unwrap();
        assert!(claimed.claimed_at.is_some());

        // Re-entrant
        let again = journal.claim(tx.id).await.unwrap();
        assert_eq!(again.claimed_at, claimed.claimed_at);

        let result = journal
            .update_status(tx.id, TransactionStatus::Cancelled, None)
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::TransactionAlreadyProcessed { .. })
        ));

        journal
            .update_status(tx.id, TransactionStatus::Completed, None)
            .await
            .unwrap();
        assert!(matches!(
            journal.claim(tx.id).await,
            Err(LedgerError::TransactionAlreadyProcessed { .. })
        ));
    }

    #[tokio::test]
    async fn test_filter_newest_first_with_pagination() {
        let journal = InMemoryJournal::new();
        let mut ids = vec![];
        for amount in 1..=5 {
            ids.push(journal.create(deposit(amount)).await.unwrap().id);
        }

        let page = journal
            .get_by_filter(&TransactionFilter::default().paginate(2, 1))
            .await
            .unwrap();
        let got: Vec<_> = page.iter().map(|t| t.id).collect();
        assert_eq!(got, vec![ids[3], ids[2]]);

        let everything = journal
            .get_by_filter(&TransactionFilter::default())
            .await
            .unwrap();
        assert_eq!(everything.len(), 5);
        assert_eq!(
            journal.count(&TransactionFilter::default().paginate(1, 0)).await.unwrap(),
            5
        );
    }
}
