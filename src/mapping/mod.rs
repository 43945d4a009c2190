//! Source field to relational column mapping

pub mod value;
pub mod warnings;

use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

use crate::config::DEFAULT_TABLE_NAME;
use crate::formats::types::{SourceField, SourceType};
use warnings::{WarningKind, WarningLog};

pub use value::{SqlValue, ValueConverter};
pub use warnings::TypeMappingWarning;

/// Destination column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetType {
    Integer,
    Real,
    Text,
    Blob,
    Date,
    DateTime,
}

impl TargetType {
    /// Returns the SQLite type name
    pub fn sql_name(&self) -> &'static str {
        match self {
            TargetType::Integer => "INTEGER",
            TargetType::Real => "REAL",
            TargetType::Text => "TEXT",
            TargetType::Blob => "BLOB",
            TargetType::Date => "DATE",
            TargetType::DateTime => "DATETIME",
        }
    }

    /// Whether an index on this column is useful for lookups
    pub fn is_indexable(&self) -> bool {
        matches!(
            self,
            TargetType::Integer | TargetType::Real | TargetType::Text
        )
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

impl Serialize for TargetType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.sql_name())
    }
}

/// How one source field lands in the destination table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    pub source_field: SourceField,
    pub target_type: TargetType,
    /// Unique (case-insensitively) within the table
    pub target_name: String,
}

/// Maps declared source types to destination column types.
///
/// Pure and deterministic: the same fields always produce the same mappings.
pub struct FieldTypeMapper;

impl FieldTypeMapper {
    pub fn target_type(source_type: SourceType) -> TargetType {
        match source_type {
            SourceType::Bool
            | SourceType::Byte
            | SourceType::Int16
            | SourceType::Int32
            | SourceType::Int64
            | SourceType::UInt64 => TargetType::Integer,
            SourceType::FixedDecimal | SourceType::Float | SourceType::Double => TargetType::Real,
            SourceType::String
            | SourceType::WString
            | SourceType::VString
            | SourceType::VWString
            | SourceType::SpatialObj
            | SourceType::Unknown(_) => TargetType::Text,
            SourceType::Blob => TargetType::Blob,
            SourceType::Date => TargetType::Date,
            SourceType::Time | SourceType::DateTime => TargetType::DateTime,
        }
    }

    /// Map a single field, without checking its name against other columns
    pub fn map_field(field: &SourceField) -> ColumnMapping {
        ColumnMapping {
            source_field: field.clone(),
            target_type: Self::target_type(field.source_type),
            target_name: sanitize_column_name(&field.name, field.ordinal),
        }
    }

    /// Map a whole field list, making column names unique.
    ///
    /// Fields with an unknown type code are mapped to TEXT and recorded as an
    /// `UnsupportedType` warning.
    pub fn map_schema(fields: &[SourceField], warnings: &mut WarningLog) -> Vec<ColumnMapping> {
        let mut taken: HashSet<String> = HashSet::with_capacity(fields.len());

        fields
            .iter()
            .map(|field| {
                let mut mapping = Self::map_field(field);
                mapping.target_name = disambiguate(&mapping.target_name, &mut taken);

                if let SourceType::Unknown(code) = field.source_type {
                    warnings.record(&mapping.target_name, WarningKind::UnsupportedType, 0, || {
                        format!("type code {code} is not recognized, values stored as hex text")
                    });
                }
                mapping
            })
            .collect()
    }
}

fn disambiguate(name: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_lowercase()) {
        return name.to_string();
    }
    (2..)
        .map(|n| format!("{name}_{n}"))
        .find(|candidate| taken.insert(candidate.to_lowercase()))
        .unwrap_or_else(|| name.to_string())
}

/// Replace anything but letters, digits and `_`; prefix a leading digit with `_`
fn sanitize_identifier(name: &str) -> Option<String> {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    match sanitized.chars().next() {
        None => None,
        Some(c) if c.is_ascii_digit() => Some(format!("_{sanitized}")),
        Some(_) => Some(sanitized),
    }
}

/// Column name for a source field; empty names become `column_<n>`
pub fn sanitize_column_name(name: &str, ordinal: usize) -> String {
    sanitize_identifier(name.trim()).unwrap_or_else(|| format!("column_{}", ordinal + 1))
}

/// Table name; SQLite reserves the `sqlite_` prefix
pub fn sanitize_table_name(name: &str) -> String {
    let sanitized =
        sanitize_identifier(name.trim()).unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string());
    if sanitized.to_ascii_lowercase().starts_with("sqlite_") {
        format!("_{sanitized}")
    } else {
        sanitized
    }
}

/// One column of a schema report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaColumn {
    pub name: String,
    pub source_name: String,
    pub source_type: SourceType,
    pub sql_type: TargetType,
    pub size: u32,
    pub scale: u8,
    pub nullable: bool,
}

/// Destination schema as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub table_name: String,
    pub columns: Vec<SchemaColumn>,
}

impl SchemaReport {
    pub fn from_mappings(table_name: &str, mappings: &[ColumnMapping]) -> Self {
        Self {
            table_name: table_name.to_string(),
            columns: mappings
                .iter()
                .map(|m| SchemaColumn {
                    name: m.target_name.clone(),
                    source_name: m.source_field.name.clone(),
                    source_type: m.source_field.source_type,
                    sql_type: m.target_type,
                    size: m.source_field.declared_size,
                    scale: m.source_field.scale,
                    nullable: m.source_field.nullable,
                })
                .collect(),
        }
    }
}
