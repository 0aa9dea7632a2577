//! Asynchronous CSV reader with batch interface
//!
//! Reads replay operations in batches using csv-async, for the concurrent
//! replay strategy.
//!
//! ```text
//! CSV Reader → AsyncReader → Batches of ReplayOperations
//!                  ↓
//!           csv_format module
//!           (CsvRecord, convert_csv_record)
//! ```

use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use tracing::warn;

use crate::io::csv_format::{convert_csv_record, CsvRecord};
use crate::types::ReplayOperation;

/// Batch reader over an async byte source
pub struct AsyncReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncReader<R> {
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self { csv_reader }
    }

    /// Read up to `batch_size` valid operations
    ///
    /// Malformed rows are logged and skipped; they do not count towards the
    /// batch. An empty batch means the input is exhausted.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<ReplayOperation> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut records = self.csv_reader.deserialize::<CsvRecord>();

        while batch.len() < batch_size {
            match records.next().await {
                Some(Ok(csv_record)) => match convert_csv_record(csv_record) {
                    Ok(operation) => batch.push(operation),
                    Err(e) => warn!(error = %e, "skipping replay row"),
                },
                Some(Err(e)) => warn!(error = %e, "skipping unreadable replay row"),
                None => break,
            }
        }

        batch
    }
}
