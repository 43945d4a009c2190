//! SQLite connection pool for the destination database.
use derive_builder::Builder;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::BUSY_TIMEOUT;
use crate::error::WriteError;

#[derive(Builder)]
pub struct PoolArgs {
    #[builder(setter(into))]
    path: PathBuf,
    #[builder(default = "4")]
    max_connections: u32,
    #[builder(default = "true")]
    create_if_missing: bool,
}

/// Open a pool on a database file, tuned for bulk loading
pub async fn pool(args: PoolArgs) -> Result<SqlitePool, WriteError> {
    let PoolArgs {
        path,
        max_connections,
        create_if_missing,
    } = args;

    let connect_options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(create_if_missing)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .pragma("temp_store", "MEMORY")
        .pragma("cache_size", "-64000");

    tracing::debug!(path = %path.display(), max_connections, "opening destination database");

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            WriteError::database(format!("failed to open database {}", path.display()), e)
        })
}

/// In-memory database. A single connection that never expires, since each
/// new connection would see an empty database.
pub async fn in_memory() -> Result<SqlitePool, WriteError> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| WriteError::database("invalid in-memory connection string", e))?;

    SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(connect_options)
        .await
        .map_err(|e| WriteError::database("failed to open in-memory database", e))
}
