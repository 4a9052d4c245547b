//! Concurrent in-memory account store
//!
//! Accounts live in a `DashMap` keyed by id, so reads and writes to
//! different accounts never contend. Every mutation runs under the entry's
//! shard lock, which makes the version check and the write a single atomic
//! step.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::core::traits::AccountStore;
use crate::types::{Account, AccountId, AccountStatus, LedgerError, UserId};

#[derive(Debug, Clone)]
struct Slot {
    /// Insertion order, used for newest-first listings
    seq: u64,
    account: Account,
}

/// Thread-safe account store with compare-and-swap updates
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: DashMap<AccountId, Slot>,
    /// At most one account per (user, currency)
    owners: DashMap<(UserId, String), AccountId>,
    next_seq: AtomicU64,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Snapshot of every account, newest first
    pub fn snapshot(&self) -> Vec<Account> {
        let mut slots: Vec<Slot> = self.accounts.iter().map(|e| e.value().clone()).collect();
        slots.sort_by(|a, b| b.seq.cmp(&a.seq));
        slots.into_iter().map(|s| s.account).collect()
    }

    /// Apply `change` to an account if its version matches, bumping the version
    fn compare_and_swap<F>(
        &self,
        id: AccountId,
        expected_version: u64,
        change: F,
    ) -> Result<Account, LedgerError>
    where
        F: FnOnce(&mut Account) -> Result<(), LedgerError>,
    {
        let mut entry = self
            .accounts
            .get_mut(&id)
            .ok_or_else(|| LedgerError::account_not_found(id))?;

        let account = &mut entry.account;
        if account.version != expected_version {
            return Err(LedgerError::concurrent_update(
                id,
                expected_version,
                account.version,
            ));
        }

        let mut updated = account.clone();
        change(&mut updated)?;
        updated.version += 1;
        updated.updated_at = Utc::now();
        *account = updated.clone();

        Ok(updated)
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn create(&self, mut account: Account) -> Result<Account, LedgerError> {
        if account.balance < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                amount: account.balance,
            });
        }
        account.version = 1;

        let key = (account.user_id.clone(), account.currency.clone());
        let exists = || LedgerError::account_exists(&account.user_id, &account.currency);
        match self.owners.entry(key) {
            Entry::Occupied(_) => return Err(exists()),
            Entry::Vacant(owner) => match self.accounts.entry(account.id) {
                Entry::Occupied(_) => return Err(exists()),
                Entry::Vacant(slot) => {
                    let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                    slot.insert(Slot {
                        seq,
                        account: account.clone(),
                    });
                    owner.insert(account.id);
                }
            },
        }
        Ok(account)
    }

    async fn get_by_id(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.accounts
            .get(&id)
            .map(|slot| slot.account.clone())
            .ok_or_else(|| LedgerError::account_not_found(id))
    }

    async fn get_by_user(&self, user_id: &str) -> Result<Vec<Account>, LedgerError> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|a| a.user_id == user_id)
            .collect())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Account>, LedgerError> {
        Ok(self.snapshot().into_iter().skip(offset).take(limit).collect())
    }

    async fn update_balance(
        &self,
        id: AccountId,
        new_balance: Decimal,
        expected_version: u64,
    ) -> Result<Account, LedgerError> {
        self.compare_and_swap(id, expected_version, |account| {
            if new_balance < Decimal::ZERO {
                return Err(LedgerError::NegativeBalance {
                    account: id,
                    balance: new_balance,
                });
            }
            account.balance = new_balance;
            Ok(())
        })
    }

    async fn update_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        expected_version: u64,
    ) -> Result<Account, LedgerError> {
        self.compare_and_swap(id, expected_version, |account| {
            account.status = status;
            Ok(())
        })
    }

    async fn delete(&self, id: AccountId) -> Result<(), LedgerError> {
        let (_, slot) = self
            .accounts
            .remove(&id)
            .ok_or_else(|| LedgerError::account_not_found(id))?;
        self.owners
            .remove_if(&(slot.account.user_id, slot.account.currency), |_, owner| {
                *owner == id
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryAccountStore::new();
        let account = store
            .create(Account::new("alice", dec(100), "USD"))
            .await
            .unwrap();

        let fetched = store.get_by_id(account.id).await.unwrap();
        assert_eq!(fetched, account);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_user_currency_rejected() {
        let store = InMemoryAccountStore::new();
        store
            .create(Account::new("alice", dec(0), "USD"))
            .await
            .unwrap();

        let result = store.create(Account::new("alice", dec(0), "USD")).await;
        assert!(matches!(result, Err(LedgerError::AccountExists { .. })));

        // Different currency is fine
        store
            .create(Account::new("alice", dec(0), "EUR"))
            .await
            .unwrap();
        assert_eq!(store.get_by_user("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_recreating_same_account_keeps_stored_state() {
        let store = InMemoryAccountStore::new();
        let account = store
            .create(Account::new("alice", dec(500), "USD"))
            .await
            .unwrap();
        store.update_balance(account.id, dec(600), 1).await.unwrap();

        let result = store.create(account.clone()).await;
        assert!(matches!(result, Err(LedgerError::AccountExists { .. })));

        let current = store.get_by_id(account.id).await.unwrap();
        assert_eq!(current.balance, dec(600));
        assert_eq!(current.version, 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_reused_id_under_new_owner_rejected() {
        let store = InMemoryAccountStore::new();
        let account = store
            .create(Account::new("alice", dec(10), "USD"))
            .await
            .unwrap();

        let mut other = Account::new("bob", dec(0), "USD");
        other.id = account.id;
        let result = store.create(other).await;
        assert!(matches!(result, Err(LedgerError::AccountExists { .. })));

        assert_eq!(store.get_by_id(account.id).await.unwrap().user_id, "alice");
        assert!(store.get_by_user("bob").await.unwrap().is_empty());
        // The failed attempt must not reserve bob's pair
        store
            .create(Account::new("bob", dec(0), "USD"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_starts_at_version_one() {
        let store = InMemoryAccountStore::new();
        let mut account = Account::new("alice", dec(5), "USD");
        account.version = 9;

        let created = store.create(account).await.unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(store.get_by_id(created.id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_negative_opening_balance_refused() {
        let store = InMemoryAccountStore::new();
        let result = store.create(Account::new("alice", dec(-50), "USD")).await;

        assert_eq!(result, Err(LedgerError::InvalidAmount { amount: dec(-50) }));
        assert!(store.is_empty());
        assert!(store.get_by_user("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_balance_bumps_version() {
        let store = InMemoryAccountStore::new();
        let account = store
            .create(Account::new("alice", dec(100), "USD"))
            .await
            .unwrap();

        let updated = store.update_balance(account.id, dec(40), 1).await.unwrap();
        assert_eq!(updated.balance, dec(40));
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn test_stale_version_mutates_nothing() {
        let store = InMemoryAccountStore::new();
        let account = store
            .create(Account::new("alice", dec(100), "USD"))
            .await
            .unwrap();
        store.update_balance(account.id, dec(90), 1).await.unwrap();

        let result = store.update_balance(account.id, dec(0), 1).await;
        assert_eq!(
            result,
            Err(LedgerError::concurrent_update(account.id, 1, 2))
        );

        let current = store.get_by_id(account.id).await.unwrap();
        assert_eq!(current.balance, dec(90));
        assert_eq!(current.version, 2);
    }

    #[tokio::test]
    async fn test_negative_balance_refused() {
        let store = InMemoryAccountStore::new();
        let account = store
            .create(Account::new("alice", dec(10), "USD"))
            .await
            .unwrap();

        let result = store.update_balance(account.id, dec(-1), 1).await;
        assert!(matches!(result, Err(LedgerError::NegativeBalance { .. })));
        assert_eq!(store.get_by_id(account.id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_list_newest_first_with_pagination() {
        let store = InMemoryAccountStore::new();
        for user in ["a", "b", "c"] {
            store
                .create(Account::new(user, dec(0), "USD"))
                .await
                .unwrap();
        }

        let page = store.list(2, 0).await.unwrap();
        let users: Vec<_> = page.iter().map(|a| a.user_id.as_str()).collect();
        assert_eq!(users, vec!["c", "b"]);

        let rest = store.list(2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].user_id, "a");
    }

    #[tokio::test]
    async fn test_delete_frees_user_currency_pair() {
        let store = InMemoryAccountStore::new();
        let account = store
            .create(Account::new("alice", dec(0), "USD"))
            .await
            .unwrap();
        store.delete(account.id).await.unwrap();

        assert!(matches!(
            store.get_by_id(account.id).await,
            Err(LedgerError::AccountNotFound { .. })
        ));
        store
            .create(Account::new("alice", dec(0), "USD"))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cas_has_one_winner() {
        let store = Arc::new(InMemoryAccountStore::new());
        let account = store
            .create(Account::new("alice", dec(100), "USD"))
            .await
            .unwrap();

        let mut handles = vec![];
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.update_balance(account.id, dec(i), 1).await.is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.get_by_id(account.id).await.unwrap().version, 2);
    }
}
