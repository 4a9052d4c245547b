//! Mutation intent records
//!
//! Before the processor touches a balance it records which leg it is about
//! to apply and the account version it read. After a crash or redelivery the
//! record tells whether that leg can have been applied: a store mutation
//! always bumps the version, so an unchanged version proves the leg did not
//! land.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::transaction::{Movement, TransactionId};

/// Progress of a mutation through its legs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum IntentStage {
    /// About to debit the source at `version`
    Debiting { version: u64 },

    /// About to credit the destination at `version`; for transfers the
    /// debit has already been applied
    Crediting { version: u64 },

    /// About to credit the transfer source back at `version`
    Compensating { version: u64 },

    /// Every leg applied
    Applied,

    /// Transfer debit reversed after a failed credit
    Compensated { reason: String },

    /// State cannot be determined or repaired automatically
    Unresolved { reason: String },
}

impl IntentStage {
    /// Whether a leg may be mid-flight in this stage
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            IntentStage::Debiting { .. }
                | IntentStage::Crediting { .. }
                | IntentStage::Compensating { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationIntent {
    pub transaction_id: TransactionId,
    pub movement: Movement,
    pub amount: Decimal,
    pub currency: String,
    pub stage: IntentStage,
    pub updated_at: DateTime<Utc>,
}

impl MutationIntent {
    pub fn new(
        transaction_id: TransactionId,
        movement: Movement,
        amount: Decimal,
        currency: &str,
        stage: IntentStage,
    ) -> Self {
        MutationIntent {
            transaction_id,
            movement,
            amount,
            currency: currency.to_string(),
            stage,
            updated_at: Utc::now(),
        }
    }

    /// Account a reconciliation operator needs to look at for this intent
    pub fn exposed_account(&self) -> Option<AccountId> {
        self.movement.source().or(self.movement.destination())
    }
}
