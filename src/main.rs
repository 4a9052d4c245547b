//! Banking ledger CLI
//!
//! Replays account and transaction operations from a CSV file through the
//! ledger and prints the final account states.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- operations.csv > accounts.csv
//! cargo run -- --workers 4 --batch-size 1 operations.csv > accounts.csv
//! cargo run -- --transactions-out journal.csv --log-format json operations.csv
//! ```
//!
//! Logs go to stderr, filtered by `RUST_LOG`.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (file not found, file not readable, runtime failure, etc.)

use banking_ledger::cli;
use banking_ledger::runtime::replay;
use banking_ledger::telemetry;
use std::process;

fn main() {
    let args = cli::parse_args();
    telemetry::init(args.log_format);
    let config = args.to_config();

    let mut output = std::io::stdout();
    if let Err(e) = replay::replay_file(&args.input_file, config, &args.to_replay_config(), &mut output)
    {
        tracing::error!(error = %e, "replay failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
