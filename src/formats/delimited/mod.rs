//! Delimited text sources (CSV, TSV)

pub mod reader;

pub use reader::DelimitedSource;
