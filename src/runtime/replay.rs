//! Batch replay of ledger operations from CSV
//!
//! Drives a full [`Ledger`] from a CSV script: accounts are opened and
//! managed through the account service, money movements are submitted
//! through the transaction service and settled by the processor pool.
//!
//! ```text
//! replay_file
//!     ├── OperationReader (batch CSV reading)
//!     ├── Ledger (services + consumer pool)
//!     │     └── drain after every batch
//!     └── write_accounts_csv / write_transactions_csv
//! ```
//!
//! Batches are applied one after another. Within a batch, submitted
//! transactions settle concurrently and in no particular order; a batch
//! size of 1 gives strictly sequential settlement.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use futures::io::AsyncRead;
use serde_json::Value;
use uuid::Uuid;

use crate::io::async_reader::OperationReader;
use crate::io::csv_format::{write_accounts_csv, write_transactions_csv, Operation};
use crate::runtime::{Ledger, LedgerConfig, LedgerStores};
use crate::types::{AccountId, LedgerError, TransactionId, TransactionRequest, TransactionType};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Operations read and applied before the ledger is drained
    pub batch_size: usize,
    /// Where to write the final journal, if anywhere
    pub transactions_output: Option<PathBuf>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            transactions_output: None,
        }
    }
}

impl ReplayConfig {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = if batch_size == 0 {
            tracing::warn!(
                "Invalid batch_size ({}), using default ({})",
                batch_size,
                DEFAULT_BATCH_SIZE
            );
            DEFAULT_BATCH_SIZE
        } else {
            batch_size
        };
        Self {
            batch_size,
            ..Self::default()
        }
    }

    pub fn with_transactions_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.transactions_output = Some(path.into());
        self
    }
}

/// Counts of a finished replay
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Operations the ledger accepted
    pub applied: usize,
    /// Operations the ledger refused synchronously
    pub rejected: usize,
    /// Rows dropped before reaching the ledger
    pub skipped: usize,
}

/// Replay a CSV file against a fresh in-memory ledger
///
/// Final account states are written to `output`. Fatal errors (unreadable
/// input, runtime construction, unreachable stores) are returned; failures
/// of individual operations are logged and counted.
pub fn replay_file(
    input_path: &Path,
    ledger_config: LedgerConfig,
    replay_config: &ReplayConfig,
    output: &mut dyn Write,
) -> Result<ReplayReport, LedgerError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(ledger_config.workers)
        .enable_time()
        .build()
        .map_err(|e| LedgerError::storage(format!("Failed to create tokio runtime: {}", e)))?;

    runtime.block_on(async {
        let file = tokio::fs::File::open(input_path).await.map_err(|e| {
            LedgerError::storage(format!(
                "Failed to open file '{}': {}",
                input_path.display(),
                e
            ))
        })?;
        let compat_file = tokio_util::compat::TokioAsyncReadCompatExt::compat(file);
        let reader = OperationReader::new(compat_file);

        let ledger = Ledger::connect(ledger_config, LedgerStores::in_memory()).await?;
        replay(ledger, reader, replay_config, output).await
    })
}

/// Replay operations from `reader` against `ledger`, then shut it down
pub async fn replay<R>(
    mut ledger: Ledger,
    mut reader: OperationReader<R>,
    config: &ReplayConfig,
    output: &mut dyn Write,
) -> Result<ReplayReport, LedgerError>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    ledger.start();
    let mut session = Session::default();

    loop {
        let batch = reader.read_batch(config.batch_size).await;
        if batch.is_empty() {
            break;
        }
        for operation in batch {
            session.apply(&ledger, operation).await;
        }
        ledger.drain().await?;
    }
    session.report.skipped = reader.skipped();

    let mut accounts = Vec::with_capacity(session.accounts.len());
    for (alias, id) in &session.accounts {
        accounts.push((alias.clone(), ledger.accounts().get_account(*id).await?));
    }
    write_accounts_csv(&accounts, output)?;

    if let Some(path) = &config.transactions_output {
        let mut transactions = Vec::with_capacity(session.transactions.len());
        for (alias, id) in &session.transactions {
            transactions.push((
                alias.clone(),
                ledger.transactions().get_transaction(*id).await?,
            ));
        }
        let mut file = std::fs::File::create(path)?;
        write_transactions_csv(&transactions, &session.labels, &mut file)?;
    }

    let stats = ledger.shutdown().await?;
    tracing::info!(
        applied = session.report.applied,
        rejected = session.report.rejected,
        skipped = session.report.skipped,
        settled = stats.acked,
        dead_lettered = stats.dead_lettered,
        "replay finished"
    );
    Ok(session.report)
}

/// Alias bookkeeping of a running replay
#[derive(Default)]
struct Session {
    accounts: Vec<(String, AccountId)>,
    account_ids: HashMap<String, AccountId>,
    transactions: Vec<(String, TransactionId)>,
    transaction_ids: HashMap<String, TransactionId>,
    /// Display label of every account id seen, including unknown aliases
    labels: HashMap<Uuid, String>,
    report: ReplayReport,
}

impl Session {
    async fn apply(&mut self, ledger: &Ledger, operation: Operation) {
        let key = operation.key().to_string();
        match self.execute(ledger, operation).await {
            Ok(()) => self.report.applied += 1,
            Err(e) => {
                self.report.rejected += 1;
                tracing::warn!(key = %key, error = %e, "replay operation rejected");
            }
        }
    }

    async fn execute(&mut self, ledger: &Ledger, operation: Operation) -> Result<(), LedgerError> {
        match operation {
            Operation::Open {
                key,
                user,
                currency,
                balance,
            } => {
                if self.account_ids.contains_key(&key) {
                    return Err(duplicate_alias(&key));
                }
                let account = ledger
                    .accounts()
                    .create_account(&user, balance, &currency)
                    .await?;
                self.account_ids.insert(key.clone(), account.id);
                self.labels.insert(account.id, key.clone());
                self.accounts.push((key, account.id));
            }
            Operation::Submit {
                key,
                tx_type,
                from,
                to,
                amount,
                currency,
            } => {
                if self.transaction_ids.contains_key(&key) {
                    return Err(duplicate_alias(&key));
                }
                let request = TransactionRequest {
                    id: None,
                    tx_type: tx_type.into(),
                    from_account_id: from.map(|alias| self.resolve_account(alias)),
                    to_account_id: to.map(|alias| self.resolve_account(alias)),
                    amount,
                    currency,
                    description: description(tx_type),
                    reference: key.clone(),
                    metadata: Value::Null,
                };
                let transaction = ledger.transactions().submit(request).await?;
                self.transaction_ids.insert(key.clone(), transaction.id);
                self.transactions.push((key, transaction.id));
            }
            Operation::Cancel { key } => {
                let id = *self
                    .transaction_ids
                    .get(&key)
                    .ok_or_else(|| unknown_alias(&key))?;
                ledger.transactions().cancel(id).await?;
            }
            Operation::Deactivate { key } => {
                let id = self.known_account(&key)?;
                ledger.accounts().deactivate_account(id).await?;
            }
            Operation::Freeze { key } => {
                let id = self.known_account(&key)?;
                ledger.accounts().freeze_account(id).await?;
            }
        }
        Ok(())
    }

    /// Id for an account alias
    ///
    /// Unknown aliases get a fresh, unregistered id so the request still
    /// reaches the processor and fails there with `AccountNotFound`.
    fn resolve_account(&mut self, alias: String) -> AccountId {
        if let Some(id) = self.account_ids.get(&alias) {
            return *id;
        }
        let id = Uuid::new_v4();
        self.labels.insert(id, alias);
        id
    }

    fn known_account(&self, alias: &str) -> Result<AccountId, LedgerError> {
        self.account_ids
            .get(alias)
            .copied()
            .ok_or_else(|| unknown_alias(alias))
    }
}

fn description(tx_type: TransactionType) -> String {
    format!("replayed {}", tx_type)
}

fn duplicate_alias(alias: &str) -> LedgerError {
    LedgerError::Codec {
        message: format!("Duplicate key '{}'", alias),
    }
}

fn unknown_alias(alias: &str) -> LedgerError {
    LedgerError::Codec {
        message: format!("Unknown key '{}'", alias),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const HEADER: &str = "op,key,user,from,to,amount,currency\n";

    fn create_temp_csv(rows: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(format!("{}{}", HEADER, rows).as_bytes())
            .expect("Failed to write to temp file");
        file.flush().expect("Failed to flush temp file");
        file
    }

    fn config() -> LedgerConfig {
        LedgerConfig::default().with_workers(2).immediate_retries()
    }

    fn run(rows: &str, replay_config: &ReplayConfig) -> (ReplayReport, String) {
        let file = create_temp_csv(rows);
        let mut output = Vec::new();
        let report = replay_file(file.path(), config(), replay_config, &mut output).unwrap();
        (report, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_transfer_between_accounts() {
        let (report, output) = run(
            "open,A,alice,,,1000,USD\n\
             open,B,bob,,,500,USD\n\
             transfer,t1,,A,B,300,USD\n",
            &ReplayConfig::new(1),
        );

        assert_eq!(report.applied, 3);
        assert_eq!(
            output,
            "account,user,currency,balance,status,version\n\
             A,alice,USD,700.00,active,2\n\
             B,bob,USD,800.00,active,2\n"
        );
    }

    #[test]
    fn test_failed_movements_leave_balances() {
        let (report, output) = run(
            "open,A,alice,,,100,USD\n\
             withdrawal,w1,,A,,150,USD\n\
             deposit,d1,,,A,0,USD\n\
             deposit,d2,,,A,25.5,USD\n",
            &ReplayConfig::new(1),
        );

        // d1 is refused at acceptance; w1 is accepted and fails in processing
        assert_eq!(report.applied, 3);
        assert_eq!(report.rejected, 1);
        assert!(output.contains("A,alice,USD,125.50,active,2"));
    }

    #[test]
    fn test_sequential_batches_keep_order() {
        let (_, output) = run(
            "open,A,alice,,,0,USD\n\
             deposit,d1,,,A,100,USD\n\
             withdrawal,w1,,A,,30,USD\n\
             deposit,d2,,,A,25,USD\n\
             withdrawal,w2,,A,,20,USD\n",
            &ReplayConfig::new(1),
        );

        assert!(output.contains("A,alice,USD,75.00,active,5"));
    }

    #[test]
    fn test_journal_output() {
        let journal = NamedTempFile::new().unwrap();
        let replay_config = ReplayConfig::new(1).with_transactions_output(journal.path());

        let (report, _) = run(
            "open,A,alice,,,100,USD\n\
             freeze,A\n\
             deposit,d1,,,A,10,USD\n\
             withdrawal,w1,,Z,,10,USD\n\
             cancel,d1\n",
            &replay_config,
        );
        assert_eq!(report.rejected, 1);

        let text = std::fs::read_to_string(journal.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "transaction,type,from,to,amount,currency,status,error");
        assert!(lines[1].starts_with("d1,deposit,,A,10.00,USD,failed,"));
        assert!(lines[1].contains("frozen"));
        assert!(lines[2].starts_with("w1,withdrawal,Z,,10.00,USD,failed,"));
        assert!(lines[2].contains("not found"));
    }

    #[test]
    fn test_unknown_and_duplicate_aliases_are_rejected() {
        let (report, output) = run(
            "open,A,alice,,,1,USD\n\
             open,A,alice,,,1,EUR\n\
             freeze,B\n\
             cancel,t9\n",
            &ReplayConfig::default(),
        );

        assert_eq!(report.applied, 1);
        assert_eq!(report.rejected, 3);
        assert_eq!(output.lines().count(), 2);
    }

    #[test]
    fn test_skipped_rows_are_counted() {
        let (report, _) = run("refund,r1,,,A,10,USD\nopen,,alice,,,1,USD\n", &ReplayConfig::default());
        assert_eq!(report.skipped, 2);
        assert_eq!(report.applied, 0);
    }

    #[test]
    fn test_missing_file() {
        let mut output = Vec::new();
        let result = replay_file(
            Path::new("nonexistent.csv"),
            config(),
            &ReplayConfig::default(),
            &mut output,
        );
        assert!(matches!(
            result,
            Err(LedgerError::Storage { message }) if message.contains("Failed to open file")
        ));
    }

    #[test]
    fn test_zero_batch_size_falls_back() {
        assert_eq!(ReplayConfig::new(0).batch_size, DEFAULT_BATCH_SIZE);
    }
}
