//! Asynchronous CSV reader with batch interface
//!
//! Streams replay operations from a CSV source in batches so a replay keeps
//! constant memory regardless of input size.
//!
//! ```text
//! CSV Reader → OperationReader → Batches of Operations
//!                  ↓
//!           csv_format module
//!           (CsvRecord, convert_csv_record)
//! ```

use crate::io::csv_format::{convert_csv_record, CsvRecord, Operation};
use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;

/// Asynchronous CSV reader over replay operations
pub struct OperationReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
    skipped: usize,
}

impl<R: AsyncRead + Unpin + Send + 'static> OperationReader<R> {
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self {
            csv_reader,
            skipped: 0,
        }
    }

    /// Read up to `batch_size` operations
    ///
    /// Rows that fail to parse or convert are logged and skipped. Returns an
    /// empty vector at end of input.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<Operation> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut records = self.csv_reader.deserialize::<CsvRecord>();

        while batch.len() < batch_size {
            match records.next().await {
                Some(Ok(csv_record)) => match convert_csv_record(csv_record) {
                    Ok(operation) => batch.push(operation),
                    Err(e) => {
                        self.skipped += 1;
                        tracing::warn!(error = %e, "skipping replay row");
                    }
                },
                Some(Err(e)) => {
                    self.skipped += 1;
                    tracing::warn!(error = %e, "CSV parse error");
                }
                None => break,
            }
        }

        batch
    }

    /// Rows dropped so far because they could not be parsed or converted
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
