//! Container encoding, used to produce sample files and test fixtures.

use chrono::{NaiveDate, Timelike};
use std::io::{self, ErrorKind, Write};

use super::header::{FLAG_NULLABLE, FORMAT_VERSION, MAGIC, UNKNOWN_RECORD_COUNT};
use super::reader::NULL_SENTINEL;
use crate::formats::types::{FieldValue, SourceField, SourceType};

/// Writes a container: the header up front, then one record per call.
pub struct ContainerWriter<W: Write> {
    inner: W,
    fields: Vec<SourceField>,
    nullable_count: usize,
    position: u64,
    records_written: u64,
}

impl<W: Write> ContainerWriter<W> {
    /// Write the header for `fields` and return a writer ready for records
    pub fn new(inner: W, fields: Vec<SourceField>, record_count: Option<u64>) -> io::Result<Self> {
        if fields.is_empty() {
            return Err(invalid("a container needs at least one field"));
        }

        let mut header = Vec::with_capacity(64);
        header.extend_from_slice(&MAGIC);
        header.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&(fields.len() as u32).to_le_bytes());
        header.extend_from_slice(&record_count.unwrap_or(UNKNOWN_RECORD_COUNT).to_le_bytes());

        for field in &fields {
            let name = field.name.as_bytes();
            let name_len = u16::try_from(name.len())
                .map_err(|_| invalid(&format!("field name '{}' is too long", field.name)))?;
            header.extend_from_slice(&name_len.to_le_bytes());
            header.extend_from_slice(name);
            header.push(field.source_type.code());
            header.push(if field.nullable { FLAG_NULLABLE } else { 0 });
            header.extend_from_slice(&field.declared_size.to_le_bytes());
            header.push(field.scale);
        }

        let mut writer = Self {
            nullable_count: fields.iter().filter(|f| f.nullable).count(),
            inner,
            fields,
            position: 0,
            records_written: 0,
        };
        writer.write_raw(&header)?;
        Ok(writer)
    }

    pub fn fields(&self) -> &[SourceField] {
        &self.fields
    }

    /// Bytes written so far; the offset the next record will start at
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Encode one record. Values must match the declared field types.
    pub fn write_record(&mut self, row: &[FieldValue]) -> io::Result<()> {
        if row.len() != self.fields.len() {
            return Err(invalid(&format!(
                "record has {} values, container has {} fields",
                row.len(),
                self.fields.len()
            )));
        }

        let mut body = vec![0u8; self.nullable_count.div_ceil(8)];
        let mut slot = 0usize;
        for (field, value) in self.fields.iter().zip(row) {
            if field.nullable {
                if value.is_null() {
                    body[slot / 8] |= 1 << (slot % 8);
                }
                slot += 1;
            }
            if value.is_null() {
                if !field.nullable {
                    return Err(invalid(&format!("null value for non-nullable field '{}'", field.name)));
                }
                continue;
            }
            encode_value(field, value, &mut body)?;
        }

        let body_len = u32::try_from(body.len()).map_err(|_| invalid("record body over 4 GiB"))?;
        self.write_raw(&body_len.to_le_bytes())?;
        self.write_raw(&body)?;
        self.records_written += 1;
        Ok(())
    }

    /// Append bytes without framing, for building damaged fixtures
    pub fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

fn encode_value(field: &SourceField, value: &FieldValue, out: &mut Vec<u8>) -> io::Result<()> {
    let mismatch = || {
        invalid(&format!(
            "{value:?} cannot be encoded as {} for field '{}'",
            field.source_type, field.name
        ))
    };
    let int = |min: i64, max: i64| match value {
        FieldValue::Int(v) if (min..=max).contains(v) => Ok(*v),
        _ => Err(mismatch()),
    };

    match field.source_type {
        SourceType::Bool => match value {
            FieldValue::Bool(v) => out.push(*v as u8),
            _ => return Err(mismatch()),
        },
        SourceType::Byte => out.push(int(0, u8::MAX as i64)? as u8),
        SourceType::Int16 => {
            out.extend_from_slice(&(int(i16::MIN as i64, i16::MAX as i64)? as i16).to_le_bytes())
        }
        SourceType::Int32 => {
            out.extend_from_slice(&(int(i32::MIN as i64, i32::MAX as i64)? as i32).to_le_bytes())
        }
        SourceType::Int64 => out.extend_from_slice(&int(i64::MIN, i64::MAX)?.to_le_bytes()),
        SourceType::UInt64 => match value {
            FieldValue::UInt(v) => out.extend_from_slice(&v.to_le_bytes()),
            FieldValue::Int(v) if *v >= 0 => out.extend_from_slice(&(*v as u64).to_le_bytes()),
            _ => return Err(mismatch()),
        },
        SourceType::FixedDecimal => match value {
            FieldValue::Decimal { unscaled, scale } if *scale == field.scale => {
                out.extend_from_slice(&unscaled.to_le_bytes())
            }
            _ => return Err(mismatch()),
        },
        SourceType::Float => match value {
            FieldValue::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            _ => return Err(mismatch()),
        },
        SourceType::Double => match value {
            FieldValue::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
            _ => return Err(mismatch()),
        },
        SourceType::String => {
            let FieldValue::Text(text) = value else {
                return Err(mismatch());
            };
            pad_into(text.as_bytes(), field.declared_size as usize, field, out)?;
        }
        SourceType::WString => {
            let FieldValue::Text(text) = value else {
                return Err(mismatch());
            };
            let wide = utf16_bytes(text);
            pad_into(&wide, field.declared_size as usize * 2, field, out)?;
        }
        SourceType::Date => {
            let FieldValue::Date(date) = value else {
                return Err(mismatch());
            };
            let days = date.signed_duration_since(epoch_date()).num_days();
            let days = i32::try_from(days).map_err(|_| mismatch())?;
            out.extend_from_slice(&days.to_le_bytes());
        }
        SourceType::Time => {
            let FieldValue::Time(time) = value else {
                return Err(mismatch());
            };
            let micros = time.num_seconds_from_midnight() as i64 * 1_000_000
                + (time.nanosecond() / 1_000) as i64;
            out.extend_from_slice(&micros.to_le_bytes());
        }
        SourceType::DateTime => {
            let FieldValue::DateTime(timestamp) = value else {
                return Err(mismatch());
            };
            out.extend_from_slice(&timestamp.and_utc().timestamp_micros().to_le_bytes());
        }
        SourceType::VString | SourceType::VWString | SourceType::Blob | SourceType::SpatialObj => {
            let bytes = match (field.source_type, value) {
                (SourceType::VString, FieldValue::Text(text)) => text.as_bytes().to_vec(),
                (SourceType::VWString, FieldValue::Text(text)) => utf16_bytes(text),
                (SourceType::Blob | SourceType::SpatialObj, FieldValue::Bytes(bytes)) => {
                    bytes.clone()
                }
                _ => return Err(mismatch()),
            };
            let len = u32::try_from(bytes.len())
                .ok()
                .filter(|len| *len != NULL_SENTINEL)
                .ok_or_else(mismatch)?;
            if field.declared_size > 0 && len > field.declared_size {
                return Err(invalid(&format!(
                    "{len} bytes exceeds the declared maximum of field '{}'",
                    field.name
                )));
            }
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&bytes);
        }
        SourceType::Unknown(_) => {
            let FieldValue::Bytes(bytes) = value else {
                return Err(mismatch());
            };
            if bytes.len() != field.declared_size as usize {
                return Err(mismatch());
            }
            out.extend_from_slice(bytes);
        }
    }
    Ok(())
}

fn pad_into(bytes: &[u8], width: usize, field: &SourceField, out: &mut Vec<u8>) -> io::Result<()> {
    if bytes.len() > width {
        return Err(invalid(&format!(
            "value is {} bytes, field '{}' holds {width}",
            bytes.len(),
            field.name
        )));
    }
    out.extend_from_slice(bytes);
    out.resize(out.len() + width - bytes.len(), 0);
    Ok(())
}

fn utf16_bytes(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// 1970-01-01
fn epoch_date() -> NaiveDate {
    NaiveDate::default()
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidInput, message.to_string())
}
