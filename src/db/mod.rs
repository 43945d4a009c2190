//! Database layer - SQLite pool, DDL, store driver and the chunked writer

pub mod pool;
pub mod schema;
pub mod store;
pub mod writer;

pub use store::{DestinationStore, SqliteStore, StatusRecord, TableMode};
pub use writer::ChunkedWriter;
