//! Ledger-wide properties exercised through the public API
//!
//! - money is conserved under concurrent transfers
//! - concurrent writers to one account never lose an update
//! - a transfer whose credit fails restores the source exactly
//! - a compensation that cannot complete is reported, never guessed
//! - cancelled requests are never applied
//! - abandoned intents are picked up by the recovery sweep

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use banking_ledger::core::memory::{InMemoryAccountStore, InMemoryIntentLog, InMemoryJournal};
use banking_ledger::core::traits::{AccountStore, IntentLog, TransactionJournal};
use banking_ledger::core::{
    ProcessOutcome, ProcessorPolicies, RecoverySweep, RetryPolicy, TransactionProcessor,
};
use banking_ledger::types::{
    Account, AccountId, AccountStatus, IntentStage, LedgerError, Movement, MutationIntent,
    Transaction, TransactionFilter, TransactionRequest, TransactionStatus, TransactionType,
};
use banking_ledger::{Ledger, LedgerConfig, LedgerStores};

fn dec(n: i64) -> Decimal {
    Decimal::new(n, 0)
}

/// Account store that refuses balance writes once an account's budget is spent
struct RefusingStore {
    inner: InMemoryAccountStore,
    budget: Mutex<HashMap<AccountId, u32>>,
}

impl RefusingStore {
    fn new() -> Self {
        Self {
            inner: InMemoryAccountStore::new(),
            budget: Mutex::new(HashMap::new()),
        }
    }

    fn allow_writes(&self, id: AccountId, writes: u32) {
        self.budget.lock().unwrap().insert(id, writes);
    }
}

#[async_trait]
impl AccountStore for RefusingStore {
    async fn ping(&self) -> Result<(), LedgerError> {
        self.inner.ping().await
    }

    async fn create(&self, account: Account) -> Result<Account, LedgerError> {
        self.inner.create(account).await
    }

    async fn get_by_id(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_user(&self, user_id: &str) -> Result<Vec<Account>, LedgerError> {
        self.inner.get_by_user(user_id).await
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Account>, LedgerError> {
        self.inner.list(limit, offset).await
    }

    async fn update_balance(
        &self,
        id: AccountId,
        new_balance: Decimal,
        expected_version: u64,
    ) -> Result<Account, LedgerError> {
        let refused = {
            let mut budget = self.budget.lock().unwrap();
            match budget.get_mut(&id) {
                Some(0) => true,
                Some(remaining) => {
                    *remaining -= 1;
                    false
                }
                None => false,
            }
        };
        if refused {
            return Err(LedgerError::account_inactive(id, AccountStatus::Frozen));
        }
        self.inner
            .update_balance(id, new_balance, expected_version)
            .await
    }

    async fn update_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        expected_version: u64,
    ) -> Result<Account, LedgerError> {
        self.inner.update_status(id, status, expected_version).await
    }

    async fn delete(&self, id: AccountId) -> Result<(), LedgerError> {
        self.inner.delete(id).await
    }
}

struct Harness<S> {
    accounts: Arc<S>,
    journal: Arc<InMemoryJournal>,
    intents: Arc<InMemoryIntentLog>,
    processor: TransactionProcessor,
}

impl<S: AccountStore + 'static> Harness<S> {
    fn new(accounts: S, policies: ProcessorPolicies) -> Self {
        let accounts = Arc::new(accounts);
        let journal = Arc::new(InMemoryJournal::new());
        let intents = Arc::new(InMemoryIntentLog::new());
        let processor = TransactionProcessor::new(
            accounts.clone(),
            journal.clone(),
            intents.clone(),
            policies,
        );
        Self {
            accounts,
            journal,
            intents,
            processor,
        }
    }

    async fn open(&self, user: &str, balance: i64) -> Account {
        self.accounts
            .create(Account::new(user, dec(balance), "USD"))
            .await
            .unwrap()
    }

    async fn accept(&self, tx_type: TransactionType, request: TransactionRequest) -> TransactionRequest {
        let request = request.with_id(Uuid::new_v4());
        let id = request.id.unwrap();
        self.journal
            .create(Transaction::pending(id, tx_type, &request))
            .await
            .unwrap();
        request
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_conserve_money() {
    let config = LedgerConfig::default()
        .with_workers(4)
        .with_cas_attempts(50)
        .immediate_retries();
    let mut ledger = Ledger::connect(config, LedgerStores::in_memory())
        .await
        .unwrap();

    let mut ids = Vec::new();
    for user in ["alice", "bob", "carol", "dave"] {
        let account = ledger
            .accounts()
            .create_account(user, dec(1000), "USD")
            .await
            .unwrap();
        ids.push(account.id);
    }
    ledger.start();

    for i in 0..200 {
        let from = ids[i % 4];
        let to = ids[(i * 3 + 1) % 4];
        if from == to {
            continue;
        }
        ledger
            .transactions()
            .submit(TransactionRequest::transfer(
                from,
                to,
                dec(((i % 7) as i64 + 1) * 45),
                "USD",
            ))
            .await
            .unwrap();
    }
    ledger.drain().await.unwrap();

    let mut total = Decimal::ZERO;
    for id in &ids {
        let balance = ledger.accounts().get_balance(*id).await.unwrap();
        assert!(balance >= Decimal::ZERO, "negative balance {}", balance);
        total += balance;
    }
    assert_eq!(total, dec(4000));

    let records = ledger
        .transactions()
        .list_transactions(&TransactionFilter::default())
        .await
        .unwrap();
    assert!(records.iter().all(|t| t.status.is_terminal()));
    assert!(ledger.stores().intents.list().await.unwrap().is_empty());

    ledger.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_never_lose_updates() {
    let policies = ProcessorPolicies {
        cas: RetryPolicy::immediate(64),
        ..ProcessorPolicies::immediate()
    };
    let harness = Harness::new(InMemoryAccountStore::new(), policies);
    let account = harness.open("alice", 0).await;

    let mut requests = Vec::new();
    for _ in 0..50 {
        requests.push(
            harness
                .accept(
                    TransactionType::Deposit,
                    TransactionRequest::deposit(account.id, Decimal::ONE, "USD"),
                )
                .await,
        );
    }

    let mut handles = Vec::new();
    for request in requests {
        let processor = harness.processor.clone();
        handles.push(tokio::spawn(async move { processor.process(&request).await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), ProcessOutcome::Completed);
    }

    let account = harness.accounts.get_by_id(account.id).await.unwrap();
    assert_eq!(account.balance, dec(50));
    assert_eq!(account.version, 51);
}

#[tokio::test]
async fn test_failed_credit_restores_source_exactly() {
    let harness = Harness::new(RefusingStore::new(), ProcessorPolicies::immediate());
    let a = harness.open("alice", 1000).await;
    let b = harness.open("bob", 500).await;
    harness.accounts.allow_writes(b.id, 0);

    let request = harness
        .accept(
            TransactionType::Transfer,
            TransactionRequest::transfer(a.id, b.id, dec(300), "USD"),
        )
        .await;
    let outcome = harness.processor.process(&request).await.unwrap();

    assert!(matches!(
        outcome,
        ProcessOutcome::Failed(LedgerError::TransferReversed { .. })
    ));
    let source = harness.accounts.get_by_id(a.id).await.unwrap();
    assert_eq!(source.balance, dec(1000));
    assert_eq!(source.version, 3);
    assert_eq!(harness.accounts.get_by_id(b.id).await.unwrap().balance, dec(500));

    let record = harness.journal.get_by_id(request.id.unwrap()).await.unwrap();
    assert_eq!(record.status, TransactionStatus::Failed);
    assert!(record.error_message.unwrap().contains("reversed"));
    assert!(record.processed_at.is_none());
    assert!(harness.intents.is_empty());
}

#[tokio::test]
async fn test_failed_compensation_is_left_unresolved() {
    let harness = Harness::new(RefusingStore::new(), ProcessorPolicies::immediate());
    let a = harness.open("alice", 1000).await;
    let b = harness.open("bob", 500).await;
    harness.accounts.allow_writes(a.id, 1);
    harness.accounts.allow_writes(b.id, 0);

    let request = harness
        .accept(
            TransactionType::Transfer,
            TransactionRequest::transfer(a.id, b.id, dec(300), "USD"),
        )
        .await;
    let outcome = harness.processor.process(&request).await.unwrap();

    match outcome {
        ProcessOutcome::Failed(LedgerError::UnresolvedMutation {
            account, amount, ..
        }) => {
            assert_eq!(account, a.id);
            assert_eq!(amount, dec(300));
        }
        other => panic!("expected unresolved mutation, got {:?}", other),
    }
    assert_eq!(harness.accounts.get_by_id(a.id).await.unwrap().balance, dec(700));

    let record = harness.journal.get_by_id(request.id.unwrap()).await.unwrap();
    assert_eq!(record.status, TransactionStatus::Failed);

    let unresolved = harness.intents.unresolved().await.unwrap();
    assert_eq!(unresolved.len(), 1);
    assert!(matches!(unresolved[0].stage, IntentStage::Unresolved { .. }));

    // A redelivery must not touch balances again
    let again = harness.processor.process(&request).await.unwrap();
    assert_eq!(
        again,
        ProcessOutcome::Skipped {
            status: TransactionStatus::Failed
        }
    );
    assert_eq!(harness.accounts.get_by_id(a.id).await.unwrap().balance, dec(700));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_request_is_never_applied() {
    let config = LedgerConfig::default().with_workers(2).immediate_retries();
    let mut ledger = Ledger::connect(config, LedgerStores::in_memory())
        .await
        .unwrap();
    let account = ledger
        .accounts()
        .create_account("alice", dec(100), "USD")
        .await
        .unwrap();

    let tx = ledger
        .transactions()
        .submit(TransactionRequest::withdrawal(account.id, dec(40), "USD"))
        .await
        .unwrap();
    ledger.transactions().cancel(tx.id).await.unwrap();

    ledger.start();
    ledger.drain().await.unwrap();

    let record = ledger.transactions().get_transaction(tx.id).await.unwrap();
    assert_eq!(record.status, TransactionStatus::Cancelled);
    assert_eq!(record.error_message.as_deref(), Some("Cancelled by user"));
    assert_eq!(ledger.accounts().get_balance(account.id).await.unwrap(), dec(100));

    let stats = ledger.shutdown().await.unwrap();
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.dead_lettered, 0);
}

#[tokio::test]
async fn test_recovery_resumes_abandoned_deposit() {
    let harness = Harness::new(InMemoryAccountStore::new(), ProcessorPolicies::immediate());
    let account = harness.open("alice", 1000).await;
    let request = harness
        .accept(
            TransactionType::Deposit,
            TransactionRequest::deposit(account.id, dec(100), "USD"),
        )
        .await;
    let id = request.id.unwrap();

    // A processor recorded the credit and stopped before writing it
    harness.journal.claim(id).await.unwrap();
    harness
        .intents
        .record(MutationIntent::new(
            id,
            Movement::Deposit { to: account.id },
            dec(100),
            "USD",
            IntentStage::Crediting {
                version: account.version,
            },
        ))
        .await
        .unwrap();

    let sweep = RecoverySweep::new(
        harness.processor.clone(),
        harness.journal.clone(),
        harness.intents.clone(),
        Duration::from_secs(30),
    );

    let fresh = sweep.run_once(Utc::now()).await.unwrap();
    assert_eq!(fresh.resumed, 0);

    let report = sweep
        .run_once(Utc::now() + chrono::Duration::minutes(2))
        .await
        .unwrap();
    assert_eq!(report.resumed, 1);

    let record = harness.journal.get_by_id(id).await.unwrap();
    assert_eq!(record.status, TransactionStatus::Completed);
    assert!(record.processed_at.is_some());
    assert_eq!(
        harness.accounts.get_by_id(account.id).await.unwrap().balance,
        dec(1100)
    );
    assert!(harness.intents.is_empty());
}
