//! File format parsers and readers

pub mod binary;
pub mod delimited;
pub mod inference;
pub mod json;
pub mod types;

use std::fmt;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConversionError;
use crate::io::open_file;
use crate::mapping::warnings::WarningLog;
use binary::BinaryRecordReader;
use delimited::DelimitedSource;
use json::JsonSource;
pub use types::{DecodedRow, FieldValue, SourceField, SourceType};

/// A stream of decoded records with a fixed, known field list.
///
/// Implemented by every supported source format so the conversion pipeline
/// does not care where rows come from.
pub trait RecordSource: Send {
    /// Fields in source order; every row has exactly this arity
    fn fields(&self) -> &[SourceField];

    /// Next record, `Ok(None)` at the end of the stream
    fn next_record(&mut self) -> Result<Option<DecodedRow>, crate::error::FormatError>;

    /// Approximate number of source bytes consumed so far
    fn position(&self) -> u64;

    /// Size of the source in bytes, 0 when unknown
    fn total_bytes(&self) -> u64;

    /// Record count declared by the source, if any
    fn estimated_records(&self) -> Option<u64> {
        None
    }

    /// Warnings raised while reading since the last call
    fn drain_warnings(&mut self) -> WarningLog {
        WarningLog::default()
    }
}

/// Configuration for delimited file reading (CSV, TSV, etc.)
#[derive(Debug, Clone)]
pub struct DelimitedConfig {
    pub delimiter: u8,
    pub has_header: bool,
    pub quote: u8,
}

impl Default for DelimitedConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            quote: b'"',
        }
    }
}

impl DelimitedConfig {
    pub fn csv() -> Self {
        Self::default()
    }

    pub fn tsv() -> Self {
        Self {
            delimiter: b'\t',
            has_header: true,
            quote: b'"',
        }
    }
}

/// Supported source formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Binary,
    Csv,
    Tsv,
    Json,
}

impl SourceFormat {
    /// Detect the format from a file extension
    pub fn detect_from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "tbc" | "bin" => Some(SourceFormat::Binary),
            "csv" => Some(SourceFormat::Csv),
            "tsv" => Some(SourceFormat::Tsv),
            "json" | "ndjson" | "jsonl" => Some(SourceFormat::Json),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceFormat::Binary => "binary",
            SourceFormat::Csv => "csv",
            SourceFormat::Tsv => "tsv",
            SourceFormat::Json => "json",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" | "tbc" | "bin" => Ok(SourceFormat::Binary),
            "csv" => Ok(SourceFormat::Csv),
            "tsv" => Ok(SourceFormat::Tsv),
            "json" | "ndjson" | "jsonl" => Ok(SourceFormat::Json),
            other => Err(format!(
                "unknown format '{other}' (expected binary, csv, tsv or json)"
            )),
        }
    }
}

/// Open `path` as a record source of the given format.
///
/// Reads the header (binary) or the inference sample (CSV/JSON) before
/// returning, so the field list is available immediately.
pub fn open_source(
    path: &Path,
    format: SourceFormat,
) -> Result<Box<dyn RecordSource>, ConversionError> {
    let (file, total_bytes) = open_file(path)?;

    let source: Box<dyn RecordSource> = match format {
        SourceFormat::Binary => {
            Box::new(BinaryRecordReader::open(file)?.with_total_bytes(total_bytes))
        }
        SourceFormat::Csv => Box::new(DelimitedSource::new(
            file,
            &DelimitedConfig::csv(),
            total_bytes,
        )?),
        SourceFormat::Tsv => Box::new(DelimitedSource::new(
            file,
            &DelimitedConfig::tsv(),
            total_bytes,
        )?),
        SourceFormat::Json => Box::new(JsonSource::new(BufReader::new(file), total_bytes)?),
    };
    Ok(source)
}
