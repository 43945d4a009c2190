//! Error taxonomy for the conversion engine.
//!
//! `FormatError` and `WriteError` are fatal to a job. Type mapping problems are
//! not errors at all; they are collected as warnings (see `mapping::warnings`).

use thiserror::Error;

/// Corruption or unsupported layout in a source file.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("header truncated at byte offset {offset}: needed {needed} more bytes")]
    TruncatedHeader { offset: u64, needed: usize },

    #[error("unrecognized container magic {found}")]
    UnrecognizedMagic { found: String },

    #[error("unsupported container version {version}")]
    UnsupportedVersion { version: u16 },

    #[error("invalid header at byte offset {offset}: {message}")]
    InvalidHeader { offset: u64, message: String },

    #[error("header declares zero fields")]
    NoFields,

    #[error(
        "truncated record #{record} at byte offset {offset}: needed {needed} bytes, {available} available"
    )]
    TruncatedRecord {
        offset: u64,
        record: u64,
        needed: u64,
        available: u64,
    },

    #[error("corrupt record #{record} at byte offset {offset}, field '{field}': {message}")]
    CorruptRecord {
        offset: u64,
        record: u64,
        field: String,
        message: String,
    },

    #[error("record #{record} at byte offset {offset} is {size} bytes, limit is {limit}")]
    RecordTooLarge {
        offset: u64,
        record: u64,
        size: u64,
        limit: usize,
    },

    #[error("malformed delimited data at byte offset {offset}: {message}")]
    Delimited { offset: u64, message: String },

    #[error("malformed JSON at byte offset {offset}: {message}")]
    Json { offset: u64, message: String },

    #[error("I/O error at byte offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },
}

impl FormatError {
    /// Byte offset the error refers to, when one is known
    pub fn offset(&self) -> Option<u64> {
        match self {
            FormatError::TruncatedHeader { offset, .. }
            | FormatError::InvalidHeader { offset, .. }
            | FormatError::TruncatedRecord { offset, .. }
            | FormatError::CorruptRecord { offset, .. }
            | FormatError::RecordTooLarge { offset, .. }
            | FormatError::Delimited { offset, .. }
            | FormatError::Json { offset, .. }
            | FormatError::Io { offset, .. } => Some(*offset),
            FormatError::UnrecognizedMagic { .. } => Some(0),
            FormatError::UnsupportedVersion { .. } => Some(8),
            FormatError::NoFields => Some(12),
        }
    }
}

/// Failure of the destination store.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("destination table must be created before rows are written")]
    TableNotCreated,

    #[error("destination table '{table}' already exists")]
    TableAlreadyExists { table: String },

    #[error("row has {actual} values but the table has {expected} columns")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("{count} columns exceeds the store limit of {limit}")]
    TooManyColumns { count: usize, limit: usize },

    #[error("{context}: {source}")]
    Database {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("batch write timed out after {secs} seconds")]
    Timeout { secs: u64 },
}

impl WriteError {
    pub(crate) fn database(context: impl Into<String>, source: sqlx::Error) -> Self {
        WriteError::Database {
            context: context.into(),
            source,
        }
    }
}

/// Anything that stops a conversion job.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("write failed: {0}")]
    Write(#[from] WriteError),

    #[error("conversion cancelled")]
    Cancelled,

    #[error("cannot open source '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot detect the format of '{path}', pass one explicitly")]
    UnknownFormat { path: String },

    #[error("table '{destination}' is already being written by job {job_id}")]
    DestinationBusy { destination: String, job_id: String },

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("pipeline task failed: {0}")]
    Pipeline(String),
}

impl ConversionError {
    /// Approximate source byte offset associated with the failure
    pub fn offset(&self) -> Option<u64> {
        match self {
            ConversionError::Format(e) => e.offset(),
            _ => None,
        }
    }
}
