//! Aggregated, non-fatal conversion warnings.
//!
//! A noisy column can raise the same warning for every row, so warnings are
//! keyed by (column, kind) and only the count grows.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Source type has no known mapping; stored as hex text
    UnsupportedType,
    /// Value outside the target range; clamped
    Overflow,
    /// NaN stored as NULL
    NotANumber,
    /// Value kind differs from the inferred column type; stored as text
    TypeMismatch,
    /// JSON key outside the sampled columns; dropped
    UnknownKey,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WarningKind::UnsupportedType => "unsupported type",
            WarningKind::Overflow => "overflow",
            WarningKind::NotANumber => "not a number",
            WarningKind::TypeMismatch => "type mismatch",
            WarningKind::UnknownKey => "unknown key",
        };
        f.write_str(name)
    }
}

/// One aggregated warning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeMappingWarning {
    pub column: String,
    pub kind: WarningKind,
    pub count: u64,
    /// Zero-based row number of the first occurrence
    pub first_row: u64,
    /// Description of the first occurrence
    pub detail: String,
}

impl fmt::Display for TypeMappingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "column '{}': {} x{} (first at row {}: {})",
            self.column, self.kind, self.count, self.first_row, self.detail
        )
    }
}

/// Warning accumulator with one entry per (column, kind)
#[derive(Debug, Clone, Default)]
pub struct WarningLog {
    entries: HashMap<(String, WarningKind), TypeMappingWarning>,
    total: u64,
}

impl WarningLog {
    /// Count one occurrence. `detail` is only evaluated for the first one.
    pub fn record(
        &mut self,
        column: &str,
        kind: WarningKind,
        row: u64,
        detail: impl FnOnce() -> String,
    ) {
        self.total += 1;
        match self.entries.get_mut(&(column.to_string(), kind)) {
            Some(entry) => {
                entry.count += 1;
                entry.first_row = entry.first_row.min(row);
            }
            None => {
                self.entries.insert(
                    (column.to_string(), kind),
                    TypeMappingWarning {
                        column: column.to_string(),
                        kind,
                        count: 1,
                        first_row: row,
                        detail: detail(),
                    },
                );
            }
        }
    }

    /// Merge another log into this one
    pub fn absorb(&mut self, other: WarningLog) {
        self.total += other.total;
        for (key, warning) in other.entries {
            match self.entries.get_mut(&key) {
                Some(entry) => {
                    entry.count += warning.count;
                    if warning.first_row < entry.first_row {
                        entry.first_row = warning.first_row;
                        entry.detail = warning.detail;
                    }
                }
                None => {
                    self.entries.insert(key, warning);
                }
            }
        }
    }

    /// Total occurrences across all entries
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by column, then kind
    pub fn warnings(&self) -> Vec<TypeMappingWarning> {
        let mut warnings: Vec<TypeMappingWarning> = self.entries.values().cloned().collect();
        warnings.sort_by(|a, b| (&a.column, a.kind).cmp(&(&b.column, b.kind)));
        warnings
    }

    pub fn into_warnings(self) -> Vec<TypeMappingWarning> {
        let mut warnings: Vec<TypeMappingWarning> = self.entries.into_values().collect();
        warnings.sort_by(|a, b| (&a.column, a.kind).cmp(&(&b.column, b.kind)));
        warnings
    }
}
