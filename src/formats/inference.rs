//! Type inference for text-based sources (CSV/TSV, JSON).
//!
//! Each sampled value is classified, and a column's type is the common type
//! of everything seen in it. The rows read during sampling are replayed by
//! the caller so nothing is lost.

use chrono::{NaiveDate, NaiveDateTime};

use crate::formats::types::{FieldValue, SourceType};

/// Date layouts accepted for inferred date columns
const DATE_FORMATS: [&str; 4] = [
    "%Y-%m-%d", // ISO 8601
    "%m/%d/%Y", // US
    "%d-%m-%Y", // European with dashes
    "%d/%m/%Y", // European with slashes
];

/// Timestamp layouts accepted for inferred date-time columns
const TIMESTAMP_FORMATS: [&str; 9] = [
    "%Y-%m-%d %H:%M:%S",    // 2025-01-01 12:34:56
    "%Y-%m-%dT%H:%M:%S",    // 2025-01-01T12:34:56 (ISO 8601)
    "%Y-%m-%d %H:%M:%S%.f", // With fractional seconds
    "%Y-%m-%dT%H:%M:%S%.f", // ISO 8601 with fractional seconds
    "%Y-%m-%d %H:%M",       // Without seconds
    "%Y-%m-%dT%H:%M",       // ISO 8601 without seconds
    "%m/%d/%Y %H:%M:%S",    // US format with time
    "%d-%m-%Y %H:%M:%S",    // European format with time
    "%d/%m/%Y %H:%M:%S",    // European format with time
];

/// Classify a single text value; `None` for an empty (null) value
pub fn infer_value_type(value: &str) -> Option<SourceType> {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        return None;
    }

    if parse_bool(trimmed).is_some() {
        return Some(SourceType::Bool);
    }

    if trimmed.parse::<i64>().is_ok() {
        return Some(SourceType::Int64);
    }

    if parse_double(trimmed).is_some() {
        return Some(SourceType::Double);
    }

    if parse_date(trimmed).is_some() {
        return Some(SourceType::Date);
    }

    if parse_timestamp(trimmed).is_some() {
        return Some(SourceType::DateTime);
    }

    Some(SourceType::VString)
}

/// Most specific type that holds values of both types
pub fn common_type(a: SourceType, b: SourceType) -> SourceType {
    use SourceType::*;

    if a == b {
        return a;
    }

    match (a, b) {
        (Bool, Int64) | (Int64, Bool) => Int64,
        (Bool | Int64, Double) | (Double, Bool | Int64) => Double,
        (Date, DateTime) | (DateTime, Date) => DateTime,
        _ => VString,
    }
}

/// Running per-column type inference over sampled values
#[derive(Debug, Clone)]
pub struct TypeInferrer {
    columns: Vec<Option<SourceType>>,
}

impl TypeInferrer {
    pub fn new(column_count: usize) -> Self {
        Self {
            columns: vec![None; column_count],
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Add a column discovered after sampling started
    pub fn push_column(&mut self) {
        self.columns.push(None);
    }

    /// Fold one observed type into a column; `None` means a null value
    pub fn observe(&mut self, column: usize, observed: Option<SourceType>) {
        let Some(observed) = observed else {
            return;
        };
        if let Some(slot) = self.columns.get_mut(column) {
            *slot = Some(match *slot {
                None => observed,
                Some(current) => common_type(current, observed),
            });
        }
    }

    pub fn observe_text(&mut self, column: usize, value: &str) {
        self.observe(column, infer_value_type(value));
    }

    /// Final column types; columns that were always null become text
    pub fn finish(&self) -> Vec<SourceType> {
        self.columns
            .iter()
            .map(|t| t.unwrap_or(SourceType::VString))
            .collect()
    }
}

/// Parse a raw text value for a column of an inferred type.
///
/// Text that does not fit the column type is kept as `FieldValue::Text`, so
/// the mapper can store it and record a mismatch.
pub fn parse_text_value(source_type: SourceType, raw: &str) -> FieldValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return FieldValue::Null;
    }

    let parsed = match source_type {
        SourceType::Bool => parse_bool(trimmed).map(FieldValue::Bool),
        SourceType::Int64 => trimmed
            .parse::<i64>()
            .ok()
            .or_else(|| parse_bool(trimmed).map(i64::from))
            .map(FieldValue::Int),
        SourceType::Double => parse_double(trimmed)
            .or_else(|| parse_bool(trimmed).map(|b| if b { 1.0 } else { 0.0 }))
            .map(FieldValue::Double),
        SourceType::Date => parse_date(trimmed).map(FieldValue::Date),
        SourceType::DateTime => parse_timestamp(trimmed)
            .or_else(|| parse_date(trimmed).and_then(|d| d.and_hms_opt(0, 0, 0)))
            .map(FieldValue::DateTime),
        _ => None,
    };

    parsed.unwrap_or_else(|| FieldValue::Text(raw.to_string()))
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("t") || value == "1" {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("f") || value == "0"
    {
        Some(false)
    } else {
        None
    }
}

/// Finite decimal numbers only; "inf" and "nan" stay text
fn parse_double(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}
