//! Destination store driver
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::SqlitePool;

use super::schema::{
    TableColumn, generate_ddl, generate_index_ddl, generate_insert, index_name, quote_identifier,
    query_table_schema, status_table_ddl, table_exists,
};
use crate::config::{MAX_ROWS_PER_STATEMENT, SQLITE_MAX_BIND_PARAMS, SQLITE_MAX_COLUMNS, STATUS_TABLE};
use crate::error::WriteError;
use crate::mapping::{ColumnMapping, SqlValue};

/// What to do when the destination table already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableMode {
    /// Drop and recreate it
    #[default]
    Replace,
    /// Refuse to convert
    FailIfExists,
}

/// One row of the job bookkeeping table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub job_id: String,
    pub table_name: String,
    pub source: String,
    pub status: String,
    pub ready: bool,
    pub rows_written: u64,
    pub message: Option<String>,
}

#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Stable identifier of the database, used to detect two jobs writing
    /// to the same table
    fn location(&self) -> String;

    /// Most bind parameters a single statement may carry
    fn max_bind_params(&self) -> usize {
        SQLITE_MAX_BIND_PARAMS
    }

    /// Most columns a table may have
    fn max_columns(&self) -> usize {
        SQLITE_MAX_COLUMNS
    }

    async fn create_table(
        &self,
        table_name: &str,
        mappings: &[ColumnMapping],
        mode: TableMode,
    ) -> Result<(), WriteError>;

    /// Insert all rows in a single transaction. Returns the number of rows written.
    async fn insert_batch(
        &self,
        table_name: &str,
        column_count: usize,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, WriteError>;

    /// Create an index on one column, returning its name
    async fn create_index(&self, table_name: &str, column: &str) -> Result<String, WriteError>;

    async fn record_status(&self, record: &StatusRecord) -> Result<(), WriteError>;

    async fn table_columns(&self, table_name: &str) -> Result<Vec<TableColumn>, WriteError>;

    async fn count_rows(&self, table_name: &str) -> Result<u64, WriteError>;
}

/// Rows per INSERT statement so the bind parameters stay under `max_params`
pub fn rows_per_statement(column_count: usize, max_params: usize) -> usize {
    (max_params / column_count.max(1)).clamp(1, MAX_ROWS_PER_STATEMENT)
}

pub struct SqliteStore {
    pool: SqlitePool,
    location: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, location: impl Into<String>) -> Self {
        Self {
            pool,
            location: location.into(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn bind_value<'q>(
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
        value: &'q SqlValue,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Blob(v) => query.bind(v.as_slice()),
        }
    }
}

#[async_trait]
impl DestinationStore for SqliteStore {
    fn location(&self) -> String {
        self.location.clone()
    }

    async fn create_table(
        &self,
        table_name: &str,
        mappings: &[ColumnMapping],
        mode: TableMode,
    ) -> Result<(), WriteError> {
        if mode == TableMode::FailIfExists && table_exists(&self.pool, table_name).await? {
            return Err(WriteError::TableAlreadyExists {
                table: table_name.to_string(),
            });
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WriteError::database("failed to begin transaction", e))?;

        sqlx::query(&status_table_ddl())
            .execute(&mut *tx)
            .await
            .map_err(|e| WriteError::database("failed to create status table", e))?;

        if mode == TableMode::Replace {
            let drop_sql = format!("DROP TABLE IF EXISTS {}", quote_identifier(table_name));
            sqlx::query(&drop_sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| WriteError::database(format!("failed to drop {table_name}"), e))?;
        }

        let ddl = generate_ddl(table_name, mappings);
        tracing::debug!(table = table_name, "{}", ddl);
        sqlx::query(&ddl)
            .execute(&mut *tx)
            .await
            .map_err(|e| WriteError::database(format!("failed to create {table_name}"), e))?;

        tx.commit()
            .await
            .map_err(|e| WriteError::database("failed to commit table creation", e))
    }

    async fn insert_batch(
        &self,
        table_name: &str,
        column_count: usize,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, WriteError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let per_statement = rows_per_statement(column_count, self.max_bind_params());
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WriteError::database("failed to begin transaction", e))?;

        for chunk in rows.chunks(per_statement) {
            let insert_sql = generate_insert(table_name, column_count, chunk.len());
            let mut query = sqlx::query(&insert_sql);
            for row in chunk {
                for value in row {
                    query = Self::bind_value(query, value);
                }
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| WriteError::database("failed to execute batch insert", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| WriteError::database("failed to commit batch", e))?;

        Ok(rows.len() as u64)
    }

    async fn create_index(&self, table_name: &str, column: &str) -> Result<String, WriteError> {
        sqlx::query(&generate_index_ddl(table_name, column))
            .execute(&self.pool)
            .await
            .map_err(|e| WriteError::database(format!("failed to index {column}"), e))?;
        Ok(index_name(table_name, column))
    }

    async fn record_status(&self, record: &StatusRecord) -> Result<(), WriteError> {
        sqlx::query(&status_table_ddl())
            .execute(&self.pool)
            .await
            .map_err(|e| WriteError::database("failed to create status table", e))?;

        let upsert = format!(
            "INSERT INTO {STATUS_TABLE} \
             (job_id, table_name, source, status, ready, rows_written, message, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(job_id) DO UPDATE SET \
             status = excluded.status, ready = excluded.ready, \
             rows_written = excluded.rows_written, message = excluded.message, \
             updated_at = excluded.updated_at"
        );
        sqlx::query(&upsert)
            .bind(&record.job_id)
            .bind(&record.table_name)
            .bind(&record.source)
            .bind(&record.status)
            .bind(record.ready)
            .bind(record.rows_written as i64)
            .bind(record.message.as_deref())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| WriteError::database("failed to record job status", e))?;
        Ok(())
    }

    async fn table_columns(&self, table_name: &str) -> Result<Vec<TableColumn>, WriteError> {
        query_table_schema(&self.pool, table_name).await
    }

    async fn count_rows(&self, table_name: &str) -> Result<u64, WriteError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table_name));
        let (count,): (i64,) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| WriteError::database(format!("failed to count rows of {table_name}"), e))?;
        Ok(count.max(0) as u64)
    }
}
