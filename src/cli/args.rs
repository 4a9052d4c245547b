use crate::runtime::replay::ReplayConfig;
use crate::runtime::LedgerConfig;
use crate::telemetry::LogFormat;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Replay ledger operations from a CSV file
#[derive(Parser, Debug)]
#[command(name = "banking-ledger")]
#[command(
    about = "Replay account and transaction operations through the ledger",
    long_about = None
)]
pub struct CliArgs {
    /// Input CSV file path containing ledger operations
    #[arg(value_name = "INPUT", help = "Path to the input CSV file")]
    pub input_file: PathBuf,

    #[arg(
        long = "workers",
        env = "LEDGER_WORKERS",
        value_name = "COUNT",
        help = "Number of concurrent transaction processors (default: CPU cores)"
    )]
    pub workers: Option<usize>,

    #[arg(
        long = "batch-size",
        env = "LEDGER_BATCH_SIZE",
        value_name = "SIZE",
        help = "Operations applied before waiting for settlement (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    #[arg(
        long = "topic",
        env = "LEDGER_TOPIC",
        value_name = "NAME",
        help = "Dispatch topic for transaction requests (default: transactions)"
    )]
    pub topic: Option<String>,

    #[arg(
        long = "message-attempts",
        env = "LEDGER_MESSAGE_ATTEMPTS",
        value_name = "COUNT",
        help = "Deliveries of a message before it is dead-lettered (default: 3)"
    )]
    pub message_attempts: Option<u32>,

    #[arg(
        long = "message-backoff-ms",
        env = "LEDGER_MESSAGE_BACKOFF_MS",
        value_name = "MILLIS",
        help = "Base delay between message redeliveries (default: 1000)"
    )]
    pub message_backoff_ms: Option<u64>,

    #[arg(
        long = "cas-attempts",
        env = "LEDGER_CAS_ATTEMPTS",
        value_name = "COUNT",
        help = "Balance update attempts on a version conflict (default: 5)"
    )]
    pub cas_attempts: Option<u32>,

    #[arg(
        long = "compensation-attempts",
        env = "LEDGER_COMPENSATION_ATTEMPTS",
        value_name = "COUNT",
        help = "Attempts to credit back a failed transfer (default: 10)"
    )]
    pub compensation_attempts: Option<u32>,

    #[arg(
        long = "log-format",
        env = "LEDGER_LOG_FORMAT",
        value_name = "FORMAT",
        default_value = "text"
    )]
    pub log_format: LogFormat,

    #[arg(
        long = "transactions-out",
        env = "LEDGER_TRANSACTIONS_OUT",
        value_name = "PATH",
        help = "Also write the final transaction journal to this CSV file"
    )]
    pub transactions_out: Option<PathBuf>,
}

impl CliArgs {
    /// Build the ledger configuration, starting from defaults
    ///
    /// Zero values are replaced by defaults with a warning.
    pub fn to_config(&self) -> LedgerConfig {
        let mut config = LedgerConfig::default().with_log_format(self.log_format);

        if let Some(topic) = &self.topic {
            config = config.with_topic(topic.clone());
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if self.message_attempts.is_some() || self.message_backoff_ms.is_some() {
            let attempts = self
                .message_attempts
                .unwrap_or(config.message_retry.max_attempts);
            let base_delay = self
                .message_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.message_retry.backoff.delay(1));
            config = config.with_message_retry(attempts, base_delay);
        }
        if let Some(attempts) = self.cas_attempts {
            config = config.with_cas_attempts(attempts);
        }
        if let Some(attempts) = self.compensation_attempts {
            config = config.with_compensation_attempts(attempts);
        }
        config
    }

    pub fn to_replay_config(&self) -> ReplayConfig {
        let config = match self.batch_size {
            Some(batch_size) => ReplayConfig::new(batch_size),
            None => ReplayConfig::default(),
        };
        match &self.transactions_out {
            Some(path) => config.with_transactions_output(path),
            None => config,
        }
    }
}
