//! Account service
//!
//! Account lifecycle operations on top of the account store. Balances are
//! never touched here after creation; only the processor moves money.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::core::retry::RetryPolicy;
use crate::core::traits::{AccountStore, TransactionJournal};
use crate::core::validator::validate_currency;
use crate::types::{
    Account, AccountId, AccountStatus, AccountSummary, LedgerError, TransactionFilter,
};

const DEFAULT_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
    journal: Arc<dyn TransactionJournal>,
    /// Retries for version-checked status changes
    cas_retry: RetryPolicy,
}

impl AccountService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        journal: Arc<dyn TransactionJournal>,
        cas_retry: RetryPolicy,
    ) -> Self {
        Self {
            accounts,
            journal,
            cas_retry,
        }
    }

    /// Open an active account at version 1
    pub async fn create_account(
        &self,
        user_id: &str,
        initial_balance: Decimal,
        currency: &str,
    ) -> Result<Account, LedgerError> {
        if initial_balance < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                amount: initial_balance,
            });
        }
        validate_currency(currency)?;

        let account = self
            .accounts
            .create(Account::new(user_id, initial_balance, currency))
            .await?;
        tracing::info!(
            account = %account.id,
            user = %account.user_id,
            currency = %account.currency,
            "account created"
        );
        Ok(account)
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.accounts.get_by_id(id).await
    }

    pub async fn get_accounts_by_user(&self, user_id: &str) -> Result<Vec<Account>, LedgerError> {
        self.accounts.get_by_user(user_id).await
    }

    pub async fn get_balance(&self, id: AccountId) -> Result<Decimal, LedgerError> {
        Ok(self.accounts.get_by_id(id).await?.balance)
    }

    /// Page through accounts
    ///
    /// A non-positive limit means the default page of 10; limits above 100
    /// are capped. Negative offsets start from the beginning.
    pub async fn list_accounts(&self, limit: i64, offset: i64) -> Result<Vec<Account>, LedgerError> {
        let limit = match usize::try_from(limit) {
            Ok(0) | Err(_) => DEFAULT_PAGE_SIZE,
            Ok(limit) => limit.min(MAX_PAGE_SIZE),
        };
        let offset = usize::try_from(offset).unwrap_or(0);
        self.accounts.list(limit, offset).await
    }

    /// Account with its journal statistics
    pub async fn get_account_summary(&self, id: AccountId) -> Result<AccountSummary, LedgerError> {
        let account = self.accounts.get_by_id(id).await?;
        let filter = TransactionFilter::for_account(id);
        let transaction_count = self.journal.count(&filter).await?;
        let last_transaction_at = self
            .journal
            .get_by_filter(&filter.paginate(1, 0))
            .await?
            .first()
            .map(|t| t.created_at);

        Ok(AccountSummary {
            account,
            transaction_count,
            last_transaction_at,
        })
    }

    pub async fn deactivate_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.set_status(id, AccountStatus::Inactive).await
    }

    pub async fn freeze_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.set_status(id, AccountStatus::Frozen).await
    }

    /// Version-checked status change, retried on concurrent balance updates
    async fn set_status(&self, id: AccountId, status: AccountStatus) -> Result<Account, LedgerError> {
        let account = self
            .cas_retry
            .run(
                "update account status",
                |_| async move {
                    let account = self.accounts.get_by_id(id).await?;
                    if account.status == status {
                        return Ok(account);
                    }
                    self.accounts
                        .update_status(id, status, account.version)
                        .await
                },
                LedgerError::is_concurrent_update,
            )
            .await?;

        tracing::info!(account = %id, %status, "account status changed");
        Ok(account)
    }
}
