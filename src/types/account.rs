//! Account-related types for the banking ledger
//!
//! This module defines the Account structure, its lifecycle status and the
//! identifiers used to reference accounts from the journal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account identifier
pub type AccountId = Uuid;

/// Owner identifier, opaque to the ledger
pub type UserId = String;

/// Account lifecycle status
///
/// Only `Active` accounts accept balance mutations from the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Frozen,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Frozen => "frozen",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account balance record
///
/// Mirrors the persisted shape of the account store. The `version` field is
/// the optimistic concurrency token: every successful store mutation bumps it
/// by exactly one, and writers must present the version they read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,

    pub user_id: UserId,

    /// Exact fixed-point balance, never negative
    pub balance: Decimal,

    /// Three-letter currency code
    pub currency: String,

    pub status: AccountStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Concurrency token, starts at 1
    pub version: u64,
}

impl Account {
    /// Create a new active account at version 1
    pub fn new(user_id: impl Into<UserId>, balance: Decimal, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            balance,
            currency: currency.into(),
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// Account details with journal statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub account: Account,
    pub transaction_count: u64,
    pub last_transaction_at: Option<DateTime<Utc>>,
}
