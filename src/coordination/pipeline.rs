//! Reader stage of the conversion pipeline.
//!
//! Decoding and value conversion run on a blocking thread and hand full
//! batches to the async writer through a bounded channel, so at most
//! `depth` batches wait in memory while the writer commits.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::progress::CancelFlag;
use crate::error::FormatError;
use crate::formats::RecordSource;
use crate::mapping::warnings::WarningLog;
use crate::mapping::{SqlValue, ValueConverter};

/// Whichever limit is reached first closes a batch
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    pub max_rows: usize,
    pub max_bytes: usize,
}

/// Converted rows ready to be committed as one transaction
#[derive(Debug, Default)]
pub struct ConvertedBatch {
    pub rows: Vec<Vec<SqlValue>>,
    /// Approximate in-memory size of `rows`
    pub bytes: usize,
    /// Source position after the last row of the batch
    pub position: u64,
    /// Records read from the source so far, this batch included
    pub records_read: u64,
    pub warnings: WarningLog,
}

pub type BatchResult = Result<ConvertedBatch, FormatError>;

pub struct BatchProducer {
    source: Box<dyn RecordSource>,
    converter: ValueConverter,
    limits: BatchLimits,
    cancel: CancelFlag,
    records_read: u64,
}

impl BatchProducer {
    pub fn new(
        source: Box<dyn RecordSource>,
        converter: ValueConverter,
        limits: BatchLimits,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            source,
            converter,
            limits: BatchLimits {
                max_rows: limits.max_rows.max(1),
                max_bytes: limits.max_bytes.max(1),
            },
            cancel,
            records_read: 0,
        }
    }

    /// Start producing on a blocking thread
    pub fn spawn(self, depth: usize) -> (mpsc::Receiver<BatchResult>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let handle = tokio::task::spawn_blocking(move || self.run(tx));
        (rx, handle)
    }

    /// Produce batches until the source ends, fails, the flag is raised or
    /// the receiver goes away. A read error is sent as the last message.
    pub fn run(mut self, tx: mpsc::Sender<BatchResult>) {
        loop {
            if self.cancel.is_cancelled() {
                debug!(records = self.records_read, "reader stopped by cancellation");
                return;
            }
            match self.next_batch() {
                Ok(Some(batch)) => {
                    if tx.blocking_send(Ok(batch)).is_err() {
                        debug!("writer went away, reader stopping");
                        return;
                    }
                }
                Ok(None) => {
                    debug!(records = self.records_read, "source exhausted");
                    return;
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            }
        }
    }

    /// Read and convert the next batch. Rows decoded before a read error
    /// are dropped with the batch.
    fn next_batch(&mut self) -> Result<Option<ConvertedBatch>, FormatError> {
        let mut batch = ConvertedBatch::default();

        while batch.rows.len() < self.limits.max_rows && batch.bytes < self.limits.max_bytes {
            let Some(row) = self.source.next_record()? else {
                break;
            };
            let values = self
                .converter
                .convert_row(row, self.records_read, &mut batch.warnings);
            batch.bytes += values.iter().map(SqlValue::approximate_size).sum::<usize>();
            batch.rows.push(values);
            self.records_read += 1;
        }

        batch.warnings.absorb(self.source.drain_warnings());
        if batch.rows.is_empty() {
            return Ok(None);
        }

        batch.position = self.source.position();
        batch.records_read = self.records_read;
        Ok(Some(batch))
    }
}
