//! Per-row conversion from decoded source values to store values.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};

use super::warnings::{WarningKind, WarningLog};
use super::{ColumnMapping, TargetType};
use crate::formats::types::{DecodedRow, FieldValue};

/// Fixed-width layouts so lexical order matches chronological order
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.6f";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A value ready to be bound into the destination store
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Rough in-memory footprint, used to bound batch sizes
    pub fn approximate_size(&self) -> usize {
        match self {
            SqlValue::Null => 1,
            SqlValue::Integer(_) | SqlValue::Real(_) => 8,
            SqlValue::Text(s) => s.len() + 24,
            SqlValue::Blob(b) => b.len() + 24,
        }
    }
}

/// Converts decoded rows for a fixed list of column mappings
#[derive(Debug, Clone)]
pub struct ValueConverter {
    mappings: Vec<ColumnMapping>,
}

impl ValueConverter {
    pub fn new(mappings: Vec<ColumnMapping>) -> Self {
        Self { mappings }
    }

    pub fn mappings(&self) -> &[ColumnMapping] {
        &self.mappings
    }

    /// Convert one row. `row_number` is zero-based and only used for warnings.
    pub fn convert_row(
        &self,
        row: DecodedRow,
        row_number: u64,
        warnings: &mut WarningLog,
    ) -> Vec<SqlValue> {
        row.into_iter()
            .zip(&self.mappings)
            .map(|(value, mapping)| convert_value(mapping, value, row_number, warnings))
            .collect()
    }
}

/// Convert a single value for `mapping`'s target type.
///
/// Never fails: out-of-range values are clamped, NaN becomes NULL, and a value
/// of the wrong kind is stored as text. Each case is recorded in `warnings`.
pub fn convert_value(
    mapping: &ColumnMapping,
    value: FieldValue,
    row_number: u64,
    warnings: &mut WarningLog,
) -> SqlValue {
    let column = mapping.target_name.as_str();
    let mut warn = |kind: WarningKind, detail: String| {
        warnings.record(column, kind, row_number, || detail);
    };

    match (mapping.target_type, value) {
        (_, FieldValue::Null) => SqlValue::Null,

        (TargetType::Integer, FieldValue::Bool(b)) => SqlValue::Integer(b as i64),
        (TargetType::Integer, FieldValue::Int(v)) => SqlValue::Integer(v),
        (TargetType::Integer, FieldValue::UInt(v)) => match i64::try_from(v) {
            Ok(v) => SqlValue::Integer(v),
            Err(_) => {
                warn(
                    WarningKind::Overflow,
                    format!("{v} exceeds the signed 64-bit range, clamped"),
                );
                SqlValue::Integer(i64::MAX)
            }
        },

        (TargetType::Real, FieldValue::Bool(b)) => SqlValue::Real(if b { 1.0 } else { 0.0 }),
        (TargetType::Real, FieldValue::Int(v)) => SqlValue::Real(v as f64),
        (TargetType::Real, FieldValue::UInt(v)) => SqlValue::Real(v as f64),
        (TargetType::Real, FieldValue::Decimal { unscaled, scale }) => {
            SqlValue::Real(decimal_to_f64(unscaled, scale))
        }
        (TargetType::Real, FieldValue::Float(v)) => real_value(v as f64, &mut warn),
        (TargetType::Real, FieldValue::Double(v)) => real_value(v, &mut warn),

        (TargetType::Blob, FieldValue::Bytes(bytes)) => SqlValue::Blob(bytes),

        (TargetType::Date, FieldValue::Date(date)) => {
            let date = clamp_date(date, &mut warn);
            SqlValue::Text(date.format(DATE_FORMAT).to_string())
        }
        (TargetType::DateTime, FieldValue::DateTime(timestamp)) => {
            let timestamp = clamp_datetime(timestamp, &mut warn);
            SqlValue::Text(timestamp.format(DATETIME_FORMAT).to_string())
        }
        (TargetType::DateTime, FieldValue::Date(date)) => {
            let timestamp = clamp_datetime(date.and_time(NaiveTime::default()), &mut warn);
            SqlValue::Text(timestamp.format(DATETIME_FORMAT).to_string())
        }
        (TargetType::DateTime, FieldValue::Time(time)) => {
            SqlValue::Text(time.format(TIME_FORMAT).to_string())
        }

        (TargetType::Text, value) => SqlValue::Text(render_text(&value)),

        (target, value) => {
            let text = render_text(&value);
            warn(
                WarningKind::TypeMismatch,
                format!("'{text}' is not a valid {} value, stored as text", target.sql_name()),
            );
            SqlValue::Text(text)
        }
    }
}

fn real_value(v: f64, warn: &mut impl FnMut(WarningKind, String)) -> SqlValue {
    if v.is_nan() {
        warn(WarningKind::NotANumber, "NaN stored as NULL".to_string());
        SqlValue::Null
    } else if v.is_infinite() {
        warn(
            WarningKind::Overflow,
            format!("{v} clamped to the largest finite value"),
        );
        SqlValue::Real(if v > 0.0 { f64::MAX } else { f64::MIN })
    } else {
        SqlValue::Real(v)
    }
}

fn min_datetime() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_micro_opt(0, 0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}

fn max_datetime() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|d| d.and_hms_micro_opt(23, 59, 59, 999_999))
        .unwrap_or(NaiveDateTime::MAX)
}

fn clamp_date(date: NaiveDate, warn: &mut impl FnMut(WarningKind, String)) -> NaiveDate {
    if (1..=9999).contains(&date.year()) {
        return date;
    }
    let clamped = if date.year() < 1 {
        min_datetime().date()
    } else {
        max_datetime().date()
    };
    warn(
        WarningKind::Overflow,
        format!("year {} is outside 1..=9999, clamped", date.year()),
    );
    clamped
}

fn clamp_datetime(
    timestamp: NaiveDateTime,
    warn: &mut impl FnMut(WarningKind, String),
) -> NaiveDateTime {
    if (1..=9999).contains(&timestamp.year()) {
        return timestamp;
    }
    warn(
        WarningKind::Overflow,
        format!("year {} is outside 1..=9999, clamped", timestamp.year()),
    );
    if timestamp.year() < 1 {
        min_datetime()
    } else {
        max_datetime()
    }
}

/// Exact decimal rendering of `unscaled * 10^-scale`
pub fn decimal_string(unscaled: i64, scale: u8) -> String {
    let sign = if unscaled < 0 { "-" } else { "" };
    let digits = unscaled.unsigned_abs().to_string();
    let scale = scale as usize;
    if scale == 0 {
        return format!("{sign}{digits}");
    }

    let digits = if digits.len() <= scale {
        format!("{}{digits}", "0".repeat(scale - digits.len() + 1))
    } else {
        digits
    };
    let (whole, fraction) = digits.split_at(digits.len() - scale);
    format!("{sign}{whole}.{fraction}")
}

/// Correctly rounded f64 for a fixed decimal, via its exact decimal text
pub fn decimal_to_f64(unscaled: i64, scale: u8) -> f64 {
    decimal_string(unscaled, scale)
        .parse::<f64>()
        .unwrap_or_else(|_| unscaled as f64 / 10f64.powi(scale as i32))
}

/// Text form of any decoded value
pub fn render_text(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => String::new(),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Int(v) => v.to_string(),
        FieldValue::UInt(v) => v.to_string(),
        FieldValue::Decimal { unscaled, scale } => decimal_string(*unscaled, *scale),
        FieldValue::Float(v) => v.to_string(),
        FieldValue::Double(v) => v.to_string(),
        FieldValue::Text(s) => s.clone(),
        FieldValue::Bytes(bytes) => hex::encode(bytes),
        FieldValue::Date(d) => d.format(DATE_FORMAT).to_string(),
        FieldValue::Time(t) => t.format(TIME_FORMAT).to_string(),
        FieldValue::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
    }
}
