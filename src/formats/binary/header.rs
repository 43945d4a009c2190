//! Container header parsing.
//!
//! # Header Structure
//!
//! | Offset | Field        | Type    | Description                          |
//! |--------|--------------|---------|--------------------------------------|
//! | 0-7    | magic        | [u8; 8] | `TBC\0\r\n\x1a\n`                    |
//! | 8-9    | version      | u16     | Only 1 is supported                  |
//! | 10-11  | flags        | u16     | Reserved                             |
//! | 12-15  | field_count  | u32     | 1..=4096                             |
//! | 16-23  | record_count | u64     | `u64::MAX` when unknown              |
//!
//! Followed by one descriptor per field:
//!
//! | Field    | Type          | Description                          |
//! |----------|---------------|--------------------------------------|
//! | name_len | u16           | 1..=1024                             |
//! | name     | [u8; name_len]| UTF-8                                |
//! | type     | u8            | Type code                            |
//! | flags    | u8            | bit 0 = nullable                     |
//! | size     | u32           | Fixed width or maximum length        |
//! | scale    | u8            | Decimal places for FixedDecimal      |
//!
//! All integers are little-endian.

use std::io::{ErrorKind, Read};

use crate::config::{MAX_DECIMAL_SCALE, MAX_FIELD_COUNT, MAX_FIELD_NAME_BYTES};
use crate::error::FormatError;
use crate::formats::types::{SourceField, SourceType};

/// Container magic bytes
pub const MAGIC: [u8; 8] = *b"TBC\0\r\n\x1a\n";

/// The only container version this build reads and writes
pub const FORMAT_VERSION: u16 = 1;

/// Length of the fixed header prefix before the field descriptors
pub const HEADER_PREFIX_LEN: usize = 24;

/// `record_count` value meaning the writer did not know the count
pub const UNKNOWN_RECORD_COUNT: u64 = u64::MAX;

/// Descriptor flag bit marking a nullable field
pub const FLAG_NULLABLE: u8 = 0x01;

/// Parsed container header
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHeader {
    pub fields: Vec<SourceField>,
    /// Record count written by the producer, used only as a progress hint
    pub record_count: Option<u64>,
    /// Total header length; the first record starts here
    pub header_len: u64,
}

/// Reads the field list from the front of a container stream.
pub struct SchemaExtractor;

impl SchemaExtractor {
    /// Consume exactly the header bytes from `reader`.
    ///
    /// On success the stream is positioned at the first record. Nothing is
    /// read past the last field descriptor.
    pub fn extract<R: Read>(reader: &mut R) -> Result<ContainerHeader, FormatError> {
        let mut cursor = HeaderCursor { reader, offset: 0 };

        let prefix = cursor.take(HEADER_PREFIX_LEN)?;
        if prefix[0..8] != MAGIC {
            return Err(FormatError::UnrecognizedMagic {
                found: hex::encode(&prefix[0..8]),
            });
        }

        let version = read_u16(&prefix, 8);
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion { version });
        }

        let field_count = read_u32(&prefix, 12);
        if field_count == 0 {
            return Err(FormatError::NoFields);
        }
        if field_count > MAX_FIELD_COUNT {
            return Err(FormatError::InvalidHeader {
                offset: 12,
                message: format!("{field_count} fields declared, limit is {MAX_FIELD_COUNT}"),
            });
        }

        let record_count = match read_u64(&prefix, 16) {
            UNKNOWN_RECORD_COUNT => None,
            count => Some(count),
        };

        let mut fields = Vec::with_capacity(field_count as usize);
        for ordinal in 0..field_count as usize {
            fields.push(cursor.field_descriptor(ordinal)?);
        }

        Ok(ContainerHeader {
            fields,
            record_count,
            header_len: cursor.offset,
        })
    }
}

/// Exact reads that turn EOF into a truncation error at the current offset
struct HeaderCursor<'a, R: Read> {
    reader: &'a mut R,
    offset: u64,
}

impl<R: Read> HeaderCursor<'_, R> {
    fn take(&mut self, len: usize) -> Result<Vec<u8>, FormatError> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(FormatError::TruncatedHeader {
                        offset: self.offset + filled as u64,
                        needed: len - filled,
                    });
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(FormatError::Io {
                        offset: self.offset + filled as u64,
                        source,
                    });
                }
            }
        }
        self.offset += len as u64;
        Ok(buf)
    }

    fn field_descriptor(&mut self, ordinal: usize) -> Result<SourceField, FormatError> {
        let descriptor_offset = self.offset;
        let invalid = |message: String| FormatError::InvalidHeader {
            offset: descriptor_offset,
            message: format!("field #{ordinal}: {message}"),
        };

        let name_len = read_u16(&self.take(2)?, 0) as usize;
        if name_len == 0 {
            return Err(invalid("empty field name".to_string()));
        }
        if name_len > MAX_FIELD_NAME_BYTES {
            return Err(invalid(format!(
                "name is {name_len} bytes, limit is {MAX_FIELD_NAME_BYTES}"
            )));
        }

        let name = String::from_utf8(self.take(name_len)?)
            .map_err(|_| invalid("name is not valid UTF-8".to_string()))?;

        // type(1) flags(1) size(4) scale(1)
        let rest = self.take(7)?;
        let source_type = SourceType::from_code(rest[0]);
        let nullable = rest[1] & FLAG_NULLABLE != 0;
        let size = read_u32(&rest, 2);
        let scale = rest[6];

        if source_type == SourceType::FixedDecimal && scale > MAX_DECIMAL_SCALE {
            return Err(invalid(format!(
                "decimal scale {scale} exceeds {MAX_DECIMAL_SCALE}"
            )));
        }

        Ok(SourceField::new(name, source_type, ordinal)
            .with_size(size)
            .with_scale(scale)
            .with_nullable(nullable))
    }
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}
