use async_trait::async_trait;
use dashmap::DashMap;

use crate::core::traits::IntentLog;
use crate::types::{IntentStage, LedgerError, MutationIntent, TransactionId};

/// In-memory intent log, one entry per transaction
#[derive(Debug, Default)]
pub struct InMemoryIntentLog {
    intents: DashMap<TransactionId, MutationIntent>,
}

impl InMemoryIntentLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}

#[async_trait]
impl IntentLog for InMemoryIntentLog {
    async fn get(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<MutationIntent>, LedgerError> {
        Ok(self.intents.get(&transaction_id).map(|e| e.value().clone()))
    }

    async fn record(&self, intent: MutationIntent) -> Result<(), LedgerError> {
        self.intents.insert(intent.transaction_id, intent);
        Ok(())
    }

    async fn remove(&self, transaction_id: TransactionId) -> Result<(), LedgerError> {
        self.intents.remove(&transaction_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<MutationIntent>, LedgerError> {
        let mut intents: Vec<MutationIntent> =
            self.intents.iter().map(|e| e.value().clone()).collect();
        intents.sort_by_key(|i| i.updated_at);
        Ok(intents)
    }

    async fn unresolved(&self) -> Result<Vec<MutationIntent>, LedgerError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|i| matches!(i.stage, IntentStage::Unresolved { .. }))
            .collect())
    }
}
