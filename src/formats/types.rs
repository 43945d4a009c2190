//! Source-side data model shared by every reader.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Serialize, Serializer};
use std::fmt;

/// Declared type of a source field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    Bool,
    Byte,
    Int16,
    Int32,
    Int64,
    UInt64,
    FixedDecimal,
    Float,
    Double,
    String,
    WString,
    VString,
    VWString,
    Date,
    Time,
    DateTime,
    Blob,
    SpatialObj,
    /// A type code this build does not know how to interpret
    Unknown(u8),
}

impl SourceType {
    /// Resolve a container type code
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => SourceType::Bool,
            2 => SourceType::Byte,
            3 => SourceType::Int16,
            4 => SourceType::Int32,
            5 => SourceType::Int64,
            6 => SourceType::FixedDecimal,
            7 => SourceType::Float,
            8 => SourceType::Double,
            9 => SourceType::String,
            10 => SourceType::WString,
            11 => SourceType::VString,
            12 => SourceType::VWString,
            13 => SourceType::Date,
            14 => SourceType::Time,
            15 => SourceType::DateTime,
            16 => SourceType::Blob,
            17 => SourceType::SpatialObj,
            18 => SourceType::UInt64,
            other => SourceType::Unknown(other),
        }
    }

    /// Container type code
    pub fn code(&self) -> u8 {
        match self {
            SourceType::Bool => 1,
            SourceType::Byte => 2,
            SourceType::Int16 => 3,
            SourceType::Int32 => 4,
            SourceType::Int64 => 5,
            SourceType::FixedDecimal => 6,
            SourceType::Float => 7,
            SourceType::Double => 8,
            SourceType::String => 9,
            SourceType::WString => 10,
            SourceType::VString => 11,
            SourceType::VWString => 12,
            SourceType::Date => 13,
            SourceType::Time => 14,
            SourceType::DateTime => 15,
            SourceType::Blob => 16,
            SourceType::SpatialObj => 17,
            SourceType::UInt64 => 18,
            SourceType::Unknown(code) => *code,
        }
    }

    /// True for types encoded with a length prefix
    pub fn is_variable_length(&self) -> bool {
        matches!(
            self,
            SourceType::VString | SourceType::VWString | SourceType::Blob | SourceType::SpatialObj
        )
    }

    /// Encoded width in bytes of a fixed-width value, `None` for variable-length types
    pub fn fixed_width(&self, declared_size: u32) -> Option<usize> {
        match self {
            SourceType::Bool | SourceType::Byte => Some(1),
            SourceType::Int16 => Some(2),
            SourceType::Int32 | SourceType::Float | SourceType::Date => Some(4),
            SourceType::Int64
            | SourceType::UInt64
            | SourceType::FixedDecimal
            | SourceType::Double
            | SourceType::Time
            | SourceType::DateTime => Some(8),
            SourceType::String | SourceType::Unknown(_) => Some(declared_size as usize),
            SourceType::WString => Some(declared_size as usize * 2),
            SourceType::VString
            | SourceType::VWString
            | SourceType::Blob
            | SourceType::SpatialObj => None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            SourceType::Bool => "Bool".to_string(),
            SourceType::Byte => "Byte".to_string(),
            SourceType::Int16 => "Int16".to_string(),
            SourceType::Int32 => "Int32".to_string(),
            SourceType::Int64 => "Int64".to_string(),
            SourceType::UInt64 => "UInt64".to_string(),
            SourceType::FixedDecimal => "FixedDecimal".to_string(),
            SourceType::Float => "Float".to_string(),
            SourceType::Double => "Double".to_string(),
            SourceType::String => "String".to_string(),
            SourceType::WString => "WString".to_string(),
            SourceType::VString => "V_String".to_string(),
            SourceType::VWString => "V_WString".to_string(),
            SourceType::Date => "Date".to_string(),
            SourceType::Time => "Time".to_string(),
            SourceType::DateTime => "DateTime".to_string(),
            SourceType::Blob => "Blob".to_string(),
            SourceType::SpatialObj => "SpatialObj".to_string(),
            SourceType::Unknown(code) => format!("Unknown({code})"),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl Serialize for SourceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

/// One field declared by a source, in source order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceField {
    pub name: String,
    pub source_type: SourceType,
    /// Byte or character width for fixed text, maximum length for variable types
    pub declared_size: u32,
    /// Decimal places for fixed-decimal fields
    pub scale: u8,
    pub nullable: bool,
    pub ordinal: usize,
}

impl SourceField {
    pub fn new(name: impl Into<String>, source_type: SourceType, ordinal: usize) -> Self {
        Self {
            name: name.into(),
            source_type,
            declared_size: 0,
            scale: 0,
            nullable: true,
            ordinal,
        }
    }

    pub fn with_size(mut self, declared_size: u32) -> Self {
        self.declared_size = declared_size;
        self
    }

    pub fn with_scale(mut self, scale: u8) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// A decoded value, typed by how it was read rather than where it will go
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    /// `unscaled * 10^-scale`
    Decimal { unscaled: i64, scale: u8 },
    Float(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// One source record, same arity and order as the source fields
pub type DecodedRow = Vec<FieldValue>;

/// UTF-8, falling back to Latin-1 for legacy single-byte text
pub(crate) fn decode_narrow(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
