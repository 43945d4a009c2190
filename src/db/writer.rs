//! Batched, transactional writes into the destination table.
//!
//! `ChunkedWriter` owns the write side of a conversion: it creates the table
//! from the column mappings, commits each batch as one transaction and adds
//! indexes once every batch is in.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::schema::index_candidates;
use super::store::{DestinationStore, TableMode};
use crate::config::{MAX_RETRIES, QUERY_TIMEOUT};
use crate::error::WriteError;
use crate::mapping::{ColumnMapping, SqlValue};

pub struct ChunkedWriter {
    store: Arc<dyn DestinationStore>,
    table_name: String,
    mode: TableMode,
    batch_timeout: Duration,
    mappings: Option<Vec<ColumnMapping>>,
    batches_committed: u64,
    rows_committed: u64,
}

impl ChunkedWriter {
    pub fn new(store: Arc<dyn DestinationStore>, table_name: impl Into<String>, mode: TableMode) -> Self {
        Self {
            store,
            table_name: table_name.into(),
            mode,
            batch_timeout: QUERY_TIMEOUT,
            mappings: None,
            batches_committed: 0,
            rows_committed: 0,
        }
    }

    pub fn with_timeout(mut self, batch_timeout: Duration) -> Self {
        self.batch_timeout = batch_timeout;
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn batches_committed(&self) -> u64 {
        self.batches_committed
    }

    pub fn rows_committed(&self) -> u64 {
        self.rows_committed
    }

    /// Create the destination table. Must run before any `write_batch`.
    pub async fn create_table(&mut self, mappings: &[ColumnMapping]) -> Result<(), WriteError> {
        let limit = self.store.max_columns();
        if mappings.len() > limit {
            return Err(WriteError::TooManyColumns {
                count: mappings.len(),
                limit,
            });
        }

        self.store
            .create_table(&self.table_name, mappings, self.mode)
            .await?;
        info!(
            table = %self.table_name,
            columns = mappings.len(),
            "created destination table"
        );
        self.mappings = Some(mappings.to_vec());
        Ok(())
    }

    /// Commit one batch atomically, returning the rows written
    pub async fn write_batch(&mut self, rows: &[Vec<SqlValue>]) -> Result<u64, WriteError> {
        let column_count = self
            .mappings
            .as_ref()
            .ok_or(WriteError::TableNotCreated)?
            .len();

        if let Some(bad) = rows.iter().find(|row| row.len() != column_count) {
            return Err(WriteError::ArityMismatch {
                expected: column_count,
                actual: bad.len(),
            });
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let written = self.execute_with_retry(column_count, rows).await?;
        self.batches_committed += 1;
        self.rows_committed += written;
        debug!(
            table = %self.table_name,
            batch = self.batches_committed,
            rows = written,
            "committed batch"
        );
        Ok(written)
    }

    /// Index the leading indexable columns, after all batches are written
    pub async fn finish(&self, index_columns: usize) -> Result<Vec<String>, WriteError> {
        let mappings = self.mappings.as_ref().ok_or(WriteError::TableNotCreated)?;

        let mut created = Vec::new();
        for mapping in index_candidates(mappings, index_columns) {
            let name = self
                .store
                .create_index(&self.table_name, &mapping.target_name)
                .await?;
            created.push(name);
        }
        if !created.is_empty() {
            info!(table = %self.table_name, indexes = created.len(), "created indexes");
        }
        Ok(created)
    }

    /// Execute a batch insert with retry logic for transient errors.
    ///
    /// A timed-out batch is not retried: its commit may already be in flight.
    async fn execute_with_retry(
        &self,
        column_count: usize,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, WriteError> {
        let mut attempt = 0;
        loop {
            let insert = self.store.insert_batch(&self.table_name, column_count, rows);
            match tokio::time::timeout(self.batch_timeout, insert).await {
                Ok(Ok(written)) => return Ok(written),
                Ok(Err(e)) if Self::is_retryable_error(&e) && attempt + 1 < MAX_RETRIES => {
                    let delay_ms = 100 * 2u64.pow(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms, "transient write failure, retrying: {}", e
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(WriteError::Timeout {
                        secs: self.batch_timeout.as_secs(),
                    });
                }
            }
        }
    }

    /// Check if error is retriable (lock contention that resolves on its own)
    fn is_retryable_error(error: &WriteError) -> bool {
        let WriteError::Database { source, .. } = error else {
            return false;
        };
        let error_msg = source.to_string().to_lowercase();

        error_msg.contains("database is locked")
            || error_msg.contains("database table is locked")
            || error_msg.contains("busy")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::TableColumn;
    use crate::db::store::{SqliteStore, StatusRecord};
    use crate::formats::types::{SourceField, SourceType};
    use crate::mapping::FieldTypeMapper;
    use crate::mapping::warnings::WarningLog;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn mappings(count: usize) -> Vec<ColumnMapping> {
        let fields: Vec<SourceField> = (0..count)
            .map(|i| SourceField::new(format!("c{i}"), SourceType::Int64, i))
            .collect();
        FieldTypeMapper::map_schema(&fields, &mut WarningLog::default())
    }

    async fn sqlite() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::new(
            crate::db::pool::in_memory().await.unwrap(),
            ":memory:",
        ))
    }

    /// Fails inserts with a lock error a fixed number of times
    struct FlakyStore {
        inner: Arc<SqliteStore>,
        failures_left: AtomicU32,
        attempts: AtomicU32,
        error: &'static str,
    }

    #[async_trait]
    impl DestinationStore for FlakyStore {
        fn location(&self) -> String {
            self.inner.location()
        }

        async fn create_table(
            &self,
            table_name: &str,
            mappings: &[ColumnMapping],
            mode: TableMode,
        ) -> Result<(), WriteError> {
            self.inner.create_table(table_name, mappings, mode).await
        }

        async fn insert_batch(
            &self,
            table_name: &str,
            column_count: usize,
            rows: &[Vec<SqlValue>],
        ) -> Result<u64, WriteError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(WriteError::database(
                    "failed to commit batch",
                    sqlx::Error::Protocol(self.error.to_string()),
                ));
            }
            self.inner.insert_batch(table_name, column_count, rows).await
        }

        async fn create_index(&self, table_name: &str, column: &str) -> Result<String, WriteError> {
            self.inner.create_index(table_name, column).await
        }

        async fn record_status(&self, record: &StatusRecord) -> Result<(), WriteError> {
            self.inner.record_status(record).await
        }

        async fn table_columns(&self, table_name: &str) -> Result<Vec<TableColumn>, WriteError> {
            self.inner.table_columns(table_name).await
        }

        async fn count_rows(&self, table_name: &str) -> Result<u64, WriteError> {
            self.inner.count_rows(table_name).await
        }
    }

    fn flaky(inner: Arc<SqliteStore>, failures: u32, error: &'static str) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner,
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
            error,
        })
    }

    #[tokio::test]
    async fn test_write_before_create_is_rejected() {
        let mut writer = ChunkedWriter::new(sqlite().await, "t", TableMode::Replace);
        let err = writer
            .write_batch(&[vec![SqlValue::Integer(1)]])
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::TableNotCreated));
        assert!(matches!(
            writer.finish(5).await,
            Err(WriteError::TableNotCreated)
        ));
    }

    #[tokio::test]
    async fn test_arity_mismatch_is_rejected() {
        let mut writer = ChunkedWriter::new(sqlite().await, "t", TableMode::Replace);
        writer.create_table(&mappings(2)).await.unwrap();

        let err = writer
            .write_batch(&[
                vec![SqlValue::Integer(1), SqlValue::Integer(2)],
                vec![SqlValue::Integer(3)],
            ])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WriteError::ArityMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert_eq!(writer.batches_committed(), 0);
    }

    #[tokio::test]
    async fn test_too_many_columns() {
        let mut writer = ChunkedWriter::new(sqlite().await, "wide", TableMode::Replace);
        let err = writer.create_table(&mappings(2001)).await.unwrap_err();
        assert!(matches!(
            err,
            WriteError::TooManyColumns {
                count: 2001,
                limit: 2000
            }
        ));
    }

    #[tokio::test]
    async fn test_batches_and_indexes() {
        let store = sqlite().await;
        let mut writer = ChunkedWriter::new(store.clone(), "t", TableMode::Replace);
        writer.create_table(&mappings(3)).await.unwrap();

        for batch in 0..4 {
            let rows: Vec<Vec<SqlValue>> = (0..250)
                .map(|i| vec![SqlValue::Integer(batch * 250 + i); 3])
                .collect();
            assert_eq!(writer.write_batch(&rows).await.unwrap(), 250);
        }
        assert_eq!(writer.write_batch(&[]).await.unwrap(), 0);

        assert_eq!(writer.batches_committed(), 4);
        assert_eq!(writer.rows_committed(), 1000);
        assert_eq!(store.count_rows("t").await.unwrap(), 1000);

        let indexes = writer.finish(2).await.unwrap();
        assert_eq!(indexes, vec!["idx_t_c0", "idx_t_c1"]);
    }

    #[tokio::test]
    async fn test_lock_errors_are_retried() {
        let store = flaky(sqlite().await, 2, "database is locked");
        let mut writer = ChunkedWriter::new(store.clone(), "t", TableMode::Replace);
        writer.create_table(&mappings(1)).await.unwrap();

        let written = writer
            .write_batch(&[vec![SqlValue::Integer(1)]])
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(store.count_rows("t").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_other_errors_fail_immediately() {
        let store = flaky(sqlite().await, 1, "disk I/O error");
        let mut writer = ChunkedWriter::new(store.clone(), "t", TableMode::Replace);
        writer.create_table(&mappings(1)).await.unwrap();

        let err = writer
            .write_batch(&[vec![SqlValue::Integer(1)]])
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Database { .. }));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(writer.batches_committed(), 0);
    }
}
