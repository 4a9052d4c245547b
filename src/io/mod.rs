//! I/O module
//!
//! Handles replay CSV parsing and ledger output.
//!
//! # Components
//!
//! - `csv_format` - CSV format handling (record conversion, output serialization)
//! - `async_reader` - Asynchronous CSV reader with batch reading interface

pub mod async_reader;
pub mod csv_format;

pub use async_reader::OperationReader;
pub use csv_format::{
    convert_csv_record, write_accounts_csv, write_transactions_csv, CsvRecord, Operation,
};
