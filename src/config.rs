//! Configuration constants for the converter
//!
//! This module centralizes all tunable parameters and constants used throughout
//! the application.

use std::time::Duration;

// ============================================================================
// Container Format
// ============================================================================

/// Upper bound on the number of fields a container header may declare
pub const MAX_FIELD_COUNT: u32 = 4096;

/// Upper bound on a single field name in the container header
pub const MAX_FIELD_NAME_BYTES: usize = 1024;

/// Largest decimal scale accepted for fixed-decimal fields (fits an i64 mantissa)
pub const MAX_DECIMAL_SCALE: u8 = 18;

// ============================================================================
// I/O Configuration
// ============================================================================

/// Size of the blocks pulled from the source stream by the record reader
///
/// Set to 64KB so a typical record needs no more than one refill while keeping
/// per-job read buffers small when many jobs run side by side.
pub const BLOCK_SIZE: usize = 64 * 1024; // 64 KB

/// Largest single record the binary reader will buffer
///
/// A record longer than the current block grows the block buffer up to this
/// limit. Anything larger is treated as corruption rather than an allocation
/// request.
pub const MAX_RECORD_BYTES: usize = 256 * 1024 * 1024; // 256 MB

/// Number of leading rows sampled to infer the schema of CSV/JSON sources
pub const SAMPLE_ROWS: usize = 100;

/// Records sampled by `schema --sample` when no count is given
pub const DEFAULT_PREVIEW_RECORDS: usize = 100;

/// Non-null values listed per column in a preview
pub const PREVIEW_SAMPLE_VALUES: usize = 5;

/// Converted rows included in a preview
pub const PREVIEW_ROWS_SHOWN: usize = 10;

// ============================================================================
// Writer Configuration
// ============================================================================

/// Default destination table name
pub const DEFAULT_TABLE_NAME: &str = "converted_data";

/// Default maximum rows per committed batch
pub const DEFAULT_BATCH_ROWS: usize = 10_000;

/// Default maximum approximate in-memory size of a batch
pub const DEFAULT_BATCH_BYTES: usize = 64 * 1024 * 1024; // 64 MB

/// Number of decoded batches that may wait for the writer
///
/// Two lets the reader decode the next batch while the writer commits the
/// previous one without letting memory grow with file size.
pub const DEFAULT_PIPELINE_DEPTH: usize = 2;

/// Number of leading columns that get an index after the load
pub const DEFAULT_INDEX_COLUMNS: usize = 5;

/// SQLite's default SQLITE_MAX_VARIABLE_NUMBER, rounded down
pub const SQLITE_MAX_BIND_PARAMS: usize = 32_000;

/// Rows per multi-row INSERT statement, before the bind parameter cap applies
pub const MAX_ROWS_PER_STATEMENT: usize = 500;

/// SQLite's default SQLITE_MAX_COLUMN
pub const SQLITE_MAX_COLUMNS: usize = 2000;

/// Bookkeeping table that records job status inside the destination database
pub const STATUS_TABLE: &str = "_conversion_jobs";

pub const MAX_RETRIES: u32 = 5;

/// Batch durations kept for latency percentiles
pub const LATENCY_SAMPLE_LIMIT: usize = 1024;

/// Timeout for committing a single batch
///
/// Set to 3 minutes because a large batch against a slow disk can take a while.
/// This prevents a stuck write from hanging a job indefinitely while allowing
/// legitimate long-running commits to complete.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(180); // 3 minutes

pub const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Service Configuration
// ============================================================================

/// Jobs allowed to run at the same time; the rest wait in `queued`
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 2;
