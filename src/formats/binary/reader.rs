//! Record-by-record decoding of container bodies.

use chrono::{DateTime, NaiveDate, NaiveTime};
use std::io::Read;

use super::block::BlockBuffer;
use super::header::{ContainerHeader, SchemaExtractor};
use crate::config::{BLOCK_SIZE, MAX_RECORD_BYTES};
use crate::error::FormatError;
use crate::formats::RecordSource;
use crate::formats::types::{DecodedRow, FieldValue, SourceField, SourceType, decode_narrow};

/// Length prefix value marking a null variable-length value
pub const NULL_SENTINEL: u32 = u32::MAX;

/// Bytes in the record length prefix
const RECORD_PREFIX_LEN: usize = 4;

const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Days from 0001-01-01 (CE day 1) to 1970-01-01
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

/// Forward-only decoder over the records of a container.
///
/// Yields one `DecodedRow` per record and stops for good after the end of
/// the stream or the first error.
pub struct BinaryRecordReader<R> {
    fields: Vec<SourceField>,
    /// Position of each field in the null bitmap, `None` for non-nullable fields
    null_slots: Vec<Option<usize>>,
    bitmap_len: usize,
    block: BlockBuffer<R>,
    max_record_bytes: usize,
    record_count_hint: Option<u64>,
    total_bytes: u64,
    records_read: u64,
    done: bool,
}

impl<R: Read> BinaryRecordReader<R> {
    /// Read the header from `reader` and prepare to decode records
    pub fn open(mut reader: R) -> Result<Self, FormatError> {
        let header = SchemaExtractor::extract(&mut reader)?;
        Ok(Self::new(reader, header))
    }

    /// `reader` must be positioned at the first record, right after `header`
    pub fn new(reader: R, header: ContainerHeader) -> Self {
        Self::with_limits(reader, header, BLOCK_SIZE, MAX_RECORD_BYTES)
    }

    pub fn with_limits(
        reader: R,
        header: ContainerHeader,
        block_size: usize,
        max_record_bytes: usize,
    ) -> Self {
        let mut nullable = 0usize;
        let null_slots = header
            .fields
            .iter()
            .map(|field| {
                field.nullable.then(|| {
                    nullable += 1;
                    nullable - 1
                })
            })
            .collect();

        Self {
            fields: header.fields,
            null_slots,
            bitmap_len: nullable.div_ceil(8),
            block: BlockBuffer::new(reader, block_size, header.header_len),
            max_record_bytes,
            record_count_hint: header.record_count,
            total_bytes: 0,
            records_read: 0,
            done: false,
        }
    }

    /// Total source size, used for progress reporting
    pub fn with_total_bytes(mut self, total_bytes: u64) -> Self {
        self.total_bytes = total_bytes;
        self
    }

    pub fn fields(&self) -> &[SourceField] {
        &self.fields
    }

    /// Absolute offset of the next record
    pub fn position(&self) -> u64 {
        self.block.offset()
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    fn read_record(&mut self) -> Result<Option<DecodedRow>, FormatError> {
        let offset = self.block.offset();
        let record = self.records_read;
        let io_error = |source| FormatError::Io { offset, source };

        let available = self.block.fill_to(RECORD_PREFIX_LEN).map_err(io_error)?;
        if available == 0 {
            return Ok(None);
        }
        if available < RECORD_PREFIX_LEN {
            return Err(FormatError::TruncatedRecord {
                offset,
                record,
                needed: RECORD_PREFIX_LEN as u64,
                available: available as u64,
            });
        }

        let prefix = &self.block.available()[..RECORD_PREFIX_LEN];
        let body_len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as u64;
        let record_len = RECORD_PREFIX_LEN as u64 + body_len;
        if record_len > self.max_record_bytes as u64 {
            return Err(FormatError::RecordTooLarge {
                offset,
                record,
                size: record_len,
                limit: self.max_record_bytes,
            });
        }

        let record_len = record_len as usize;
        let available = self.block.fill_to(record_len).map_err(io_error)?;
        if available < record_len {
            return Err(FormatError::TruncatedRecord {
                offset,
                record,
                needed: record_len as u64,
                available: available as u64,
            });
        }

        let body = &self.block.available()[RECORD_PREFIX_LEN..record_len];
        let decoder = RecordDecoder {
            fields: &self.fields,
            null_slots: &self.null_slots,
            bitmap_len: self.bitmap_len,
            offset,
            record,
        };
        let row = decoder.decode(body)?;

        self.block.consume(record_len);
        self.records_read += 1;
        Ok(Some(row))
    }
}

impl<R: Read> Iterator for BinaryRecordReader<R> {
    type Item = Result<DecodedRow, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: Read> std::iter::FusedIterator for BinaryRecordReader<R> {}

impl<R: Read + Send> RecordSource for BinaryRecordReader<R> {
    fn fields(&self) -> &[SourceField] {
        &self.fields
    }

    fn next_record(&mut self) -> Result<Option<DecodedRow>, FormatError> {
        self.next().transpose()
    }

    fn position(&self) -> u64 {
        self.block.offset()
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn estimated_records(&self) -> Option<u64> {
        self.record_count_hint
    }
}

/// Decodes one record body against the field list
struct RecordDecoder<'a> {
    fields: &'a [SourceField],
    null_slots: &'a [Option<usize>],
    bitmap_len: usize,
    offset: u64,
    record: u64,
}

impl RecordDecoder<'_> {
    fn decode(&self, body: &[u8]) -> Result<DecodedRow, FormatError> {
        if body.len() < self.bitmap_len {
            return Err(self.corrupt(
                "",
                format!(
                    "body is {} bytes, shorter than its {}-byte null bitmap",
                    body.len(),
                    self.bitmap_len
                ),
            ));
        }
        let (bitmap, values) = body.split_at(self.bitmap_len);

        let mut cursor = BodyCursor {
            data: values,
            pos: 0,
        };
        let mut row = Vec::with_capacity(self.fields.len());

        for (field, slot) in self.fields.iter().zip(self.null_slots) {
            if let Some(slot) = slot
                && bitmap[slot / 8] & (1 << (slot % 8)) != 0
            {
                row.push(FieldValue::Null);
                continue;
            }
            row.push(self.decode_value(field, &mut cursor)?);
        }

        let trailing = cursor.remaining();
        if trailing > 0 {
            return Err(self.corrupt(
                "",
                format!("{trailing} bytes left over after the last field"),
            ));
        }

        Ok(row)
    }

    fn decode_value(
        &self,
        field: &SourceField,
        cursor: &mut BodyCursor<'_>,
    ) -> Result<FieldValue, FormatError> {
        let Some(width) = field.source_type.fixed_width(field.declared_size) else {
            return self.decode_variable(field, cursor);
        };
        let bytes = cursor
            .take(width)
            .ok_or_else(|| self.overrun(field, width, cursor.remaining()))?;

        let value = match field.source_type {
            SourceType::Bool => match bytes[0] {
                0 => FieldValue::Bool(false),
                1 => FieldValue::Bool(true),
                other => {
                    return Err(self.corrupt(&field.name, format!("invalid bool byte {other:#04x}")));
                }
            },
            SourceType::Byte => FieldValue::Int(bytes[0] as i64),
            SourceType::Int16 => FieldValue::Int(i16::from_le_bytes(array(bytes)) as i64),
            SourceType::Int32 => FieldValue::Int(i32::from_le_bytes(array(bytes)) as i64),
            SourceType::Int64 => FieldValue::Int(i64::from_le_bytes(array(bytes))),
            SourceType::UInt64 => FieldValue::UInt(u64::from_le_bytes(array(bytes))),
            SourceType::FixedDecimal => FieldValue::Decimal {
                unscaled: i64::from_le_bytes(array(bytes)),
                scale: field.scale,
            },
            SourceType::Float => FieldValue::Float(f32::from_le_bytes(array(bytes))),
            SourceType::Double => FieldValue::Double(f64::from_le_bytes(array(bytes))),
            SourceType::String => FieldValue::Text(decode_narrow(trim_nuls(bytes))),
            SourceType::WString => FieldValue::Text(decode_wide(bytes, true)),
            SourceType::Date => {
                let days = i32::from_le_bytes(array(bytes));
                let date = days
                    .checked_add(UNIX_EPOCH_CE_DAYS)
                    .and_then(NaiveDate::from_num_days_from_ce_opt)
                    .ok_or_else(|| {
                        self.corrupt(&field.name, format!("day number {days} is out of range"))
                    })?;
                FieldValue::Date(date)
            }
            SourceType::Time => {
                let micros = i64::from_le_bytes(array(bytes));
                if !(0..MICROS_PER_DAY).contains(&micros) {
                    return Err(self.corrupt(
                        &field.name,
                        format!("time of day {micros}us is outside 00:00..24:00"),
                    ));
                }
                let secs = (micros / 1_000_000) as u32;
                let nanos = (micros % 1_000_000) as u32 * 1_000;
                let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                    .ok_or_else(|| self.corrupt(&field.name, "invalid time of day".to_string()))?;
                FieldValue::Time(time)
            }
            SourceType::DateTime => {
                let micros = i64::from_le_bytes(array(bytes));
                let timestamp = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                    self.corrupt(&field.name, format!("timestamp {micros}us is out of range"))
                })?;
                FieldValue::DateTime(timestamp.naive_utc())
            }
            _ => FieldValue::Bytes(bytes.to_vec()),
        };

        Ok(value)
    }

    fn decode_variable(
        &self,
        field: &SourceField,
        cursor: &mut BodyCursor<'_>,
    ) -> Result<FieldValue, FormatError> {
        let prefix = cursor
            .take(4)
            .ok_or_else(|| self.overrun(field, 4, cursor.remaining()))?;
        let len = u32::from_le_bytes(array(prefix));

        if len == NULL_SENTINEL {
            if field.nullable {
                return Ok(FieldValue::Null);
            }
            return Err(self.corrupt(
                &field.name,
                "null marker in a non-nullable field".to_string(),
            ));
        }
        if field.declared_size > 0 && len > field.declared_size {
            return Err(self.corrupt(
                &field.name,
                format!(
                    "length {len} exceeds declared maximum {}",
                    field.declared_size
                ),
            ));
        }

        let len = len as usize;
        let bytes = cursor
            .take(len)
            .ok_or_else(|| self.overrun(field, len, cursor.remaining()))?;

        let value = match field.source_type {
            SourceType::VString => FieldValue::Text(decode_narrow(bytes)),
            SourceType::VWString => {
                if len % 2 != 0 {
                    return Err(self.corrupt(
                        &field.name,
                        format!("wide string has odd byte length {len}"),
                    ));
                }
                FieldValue::Text(decode_wide(bytes, false))
            }
            _ => FieldValue::Bytes(bytes.to_vec()),
        };
        Ok(value)
    }

    fn overrun(&self, field: &SourceField, needed: usize, remaining: usize) -> FormatError {
        self.corrupt(
            &field.name,
            format!("value needs {needed} bytes but only {remaining} remain in the record"),
        )
    }

    fn corrupt(&self, field: &str, message: String) -> FormatError {
        FormatError::CorruptRecord {
            offset: self.offset,
            record: self.record,
            field: field.to_string(),
            message,
        }
    }
}

struct BodyCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BodyCursor<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let bytes = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

fn trim_nuls(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

/// UTF-16LE; fixed-width values are padded with NUL code units
fn decode_wide(bytes: &[u8], trim: bool) -> String {
    let mut units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    if trim {
        while units.last() == Some(&0) {
            units.pop();
        }
    }
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::binary::encoder::ContainerWriter;
    use chrono::NaiveDateTime;
    use std::io::Cursor;

    fn all_types_fields() -> Vec<SourceField> {
        let types = [
            (SourceType::Bool, 0, 0),
            (SourceType::Byte, 0, 0),
            (SourceType::Int16, 0, 0),
            (SourceType::Int32, 0, 0),
            (SourceType::Int64, 0, 0),
            (SourceType::UInt64, 0, 0),
            (SourceType::FixedDecimal, 0, 3),
            (SourceType::Float, 0, 0),
            (SourceType::Double, 0, 0),
            (SourceType::String, 8, 0),
            (SourceType::WString, 4, 0),
            (SourceType::VString, 0, 0),
            (SourceType::VWString, 0, 0),
            (SourceType::Date, 0, 0),
            (SourceType::Time, 0, 0),
            (SourceType::DateTime, 0, 0),
            (SourceType::Blob, 0, 0),
            (SourceType::SpatialObj, 0, 0),
            (SourceType::Unknown(77), 2, 0),
        ];
        types
            .iter()
            .enumerate()
            .map(|(i, (source_type, size, scale))| {
                SourceField::new(format!("f{i}"), *source_type, i)
                    .with_size(*size)
                    .with_scale(*scale)
            })
            .collect()
    }

    fn full_row() -> DecodedRow {
        vec![
            FieldValue::Bool(true),
            FieldValue::Int(200),
            FieldValue::Int(-12_345),
            FieldValue::Int(2_000_000_000),
            FieldValue::Int(i64::MIN),
            FieldValue::UInt(u64::MAX),
            FieldValue::Decimal {
                unscaled: -123_456,
                scale: 3,
            },
            FieldValue::Float(1.5),
            FieldValue::Double(-2.25e10),
            FieldValue::Text("héllo".to_string()),
            FieldValue::Text("日本".to_string()),
            FieldValue::Text("variable text".to_string()),
            FieldValue::Text("wide ✓".to_string()),
            FieldValue::Date(NaiveDate::from_ymd_opt(1969, 7, 20).unwrap()),
            FieldValue::Time(NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap()),
            FieldValue::DateTime(
                NaiveDateTime::parse_from_str("2024-02-29 12:30:00.000001", "%Y-%m-%d %H:%M:%S%.f")
                    .unwrap(),
            ),
            FieldValue::Bytes(vec![0, 1, 2, 255]),
            FieldValue::Bytes(vec![0xDE, 0xAD]),
            FieldValue::Bytes(vec![9, 8]),
        ]
    }

    fn encode(fields: &[SourceField], rows: &[DecodedRow]) -> Vec<u8> {
        let mut writer =
            ContainerWriter::new(Vec::new(), fields.to_vec(), Some(rows.len() as u64)).unwrap();
        for row in rows {
            writer.write_record(row).unwrap();
        }
        writer.into_inner()
    }

    #[test]
    fn test_round_trip_every_type() {
        let fields = all_types_fields();
        let null_row: DecodedRow = vec![FieldValue::Null; fields.len()];
        let rows = vec![full_row(), null_row.clone(), full_row()];

        let bytes = encode(&fields, &rows);
        let reader = BinaryRecordReader::open(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.fields(), fields.as_slice());

        let decoded: Vec<DecodedRow> = reader.collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded, rows);
    }

    #[test]
    fn test_records_straddle_small_blocks() {
        let fields = all_types_fields();
        let rows: Vec<DecodedRow> = (0..50).map(|_| full_row()).collect();
        let bytes = encode(&fields, &rows);

        let mut cursor = Cursor::new(bytes);
        let header = SchemaExtractor::extract(&mut cursor).unwrap();
        // Block smaller than one record: every record needs a grown buffer
        let reader = BinaryRecordReader::with_limits(cursor, header, 16, 4096);
        let decoded: Vec<DecodedRow> = reader.collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded.len(), 50);
        assert_eq!(decoded[49], full_row());
    }

    #[test]
    fn test_empty_is_distinct_from_null() {
        let fields = vec![
            SourceField::new("s", SourceType::VString, 0),
            SourceField::new("b", SourceType::Blob, 1),
        ];
        let rows = vec![
            vec![FieldValue::Text(String::new()), FieldValue::Bytes(Vec::new())],
            vec![FieldValue::Null, FieldValue::Null],
        ];

        let decoded: Vec<DecodedRow> = BinaryRecordReader::open(Cursor::new(encode(&fields, &rows)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(decoded, rows);
    }

    #[test]
    fn test_zero_width_fixed_text() {
        let fields = vec![
            SourceField::new("blank", SourceType::String, 0).with_nullable(false),
            SourceField::new("maybe", SourceType::String, 1),
        ];
        let rows = vec![
            vec![FieldValue::Text(String::new()), FieldValue::Text(String::new())],
            vec![FieldValue::Text(String::new()), FieldValue::Null],
        ];

        let decoded: Vec<DecodedRow> = BinaryRecordReader::open(Cursor::new(encode(&fields, &rows)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(decoded, rows);
    }

    #[test]
    fn test_sentinel_in_non_nullable_field_is_corrupt() {
        let fields = vec![SourceField::new("s", SourceType::VString, 0).with_nullable(false)];
        let mut bytes = encode(&fields, &[]);
        let record_offset = bytes.len() as u64;
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&NULL_SENTINEL.to_le_bytes());

        let mut reader = BinaryRecordReader::open(Cursor::new(bytes)).unwrap();
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, FormatError::CorruptRecord { offset, .. } if offset == record_offset));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_record_reports_offset() {
        let fields = vec![
            SourceField::new("id", SourceType::Int64, 0).with_nullable(false),
            SourceField::new("note", SourceType::VString, 1),
        ];
        let rows = vec![vec![FieldValue::Int(1), FieldValue::Text("ok".to_string())]];
        let mut bytes = encode(&fields, &rows);
        let bad_offset = bytes.len() as u64;

        // Record claims 30 body bytes; the stream ends after 12
        bytes.extend_from_slice(&30u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 12]);

        let mut reader = BinaryRecordReader::open(Cursor::new(bytes)).unwrap();
        assert!(reader.next().unwrap().is_ok());
        let err = reader.next().unwrap().unwrap_err();
        match &err {
            FormatError::TruncatedRecord {
                offset,
                record,
                needed,
                available,
            } => {
                assert_eq!(*offset, bad_offset);
                assert_eq!(*record, 1);
                assert_eq!(*needed, 34);
                assert_eq!(*available, 16);
            }
            other => panic!("expected truncation, got {other}"),
        }
        assert!(err.to_string().contains(&bad_offset.to_string()));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_field_overrunning_body_is_corrupt() {
        let fields = vec![SourceField::new("note", SourceType::VString, 0).with_nullable(false)];
        let mut bytes = encode(&fields, &[]);
        let bad_offset = bytes.len() as u64;

        // Length prefix says 50 bytes, the body holds only 3
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&50u32.to_le_bytes());
        bytes.extend_from_slice(b"abc");

        let err = BinaryRecordReader::open(Cursor::new(bytes))
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.offset(), Some(bad_offset));
        assert!(err.to_string().contains("'note'"));
    }

    #[test]
    fn test_trailing_bytes_are_corrupt() {
        let fields = vec![SourceField::new("n", SourceType::Int32, 0).with_nullable(false)];
        let mut bytes = encode(&fields, &[]);
        bytes.extend_from_slice(&6u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 0, 0, 0, 0xFF, 0xFF]);

        let err = BinaryRecordReader::open(Cursor::new(bytes))
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("2 bytes left over"));
    }

    #[test]
    fn test_record_too_large() {
        let fields = vec![SourceField::new("b", SourceType::Blob, 0)];
        let mut bytes = encode(&fields, &[]);
        bytes.extend_from_slice(&(1u32 << 20).to_le_bytes());

        let mut cursor = Cursor::new(bytes);
        let header = SchemaExtractor::extract(&mut cursor).unwrap();
        let mut reader = BinaryRecordReader::with_limits(cursor, header, 64, 1024);
        assert!(matches!(
            reader.next(),
            Some(Err(FormatError::RecordTooLarge { limit: 1024, .. }))
        ));
    }

    #[test]
    fn test_invalid_bool_byte() {
        let fields = vec![SourceField::new("flag", SourceType::Bool, 0).with_nullable(false)];
        let mut bytes = encode(&fields, &[]);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(2);

        let err = BinaryRecordReader::open(Cursor::new(bytes))
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("invalid bool"));
    }

    #[test]
    fn test_latin1_fallback_and_nul_trim() {
        let fields = vec![SourceField::new("s", SourceType::String, 0)
            .with_size(6)
            .with_nullable(false)];
        let mut bytes = encode(&fields, &[]);
        bytes.extend_from_slice(&6u32.to_le_bytes());
        bytes.extend_from_slice(&[b'c', b'a', b'f', 0xE9, 0, 0]);

        let row = BinaryRecordReader::open(Cursor::new(bytes))
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(row, vec![FieldValue::Text("café".to_string())]);
    }

    #[test]
    fn test_position_tracks_consumed_records() {
        let fields = vec![SourceField::new("n", SourceType::Int32, 0).with_nullable(false)];
        let rows = vec![vec![FieldValue::Int(1)], vec![FieldValue::Int(2)]];
        let bytes = encode(&fields, &rows);
        let total = bytes.len() as u64;

        let mut reader = BinaryRecordReader::open(Cursor::new(bytes))
            .unwrap()
            .with_total_bytes(total);
        let start = reader.position();
        reader.next_record().unwrap();
        assert_eq!(reader.position(), start + 8);
        reader.next_record().unwrap();
        assert_eq!(reader.position(), total);
        assert_eq!(reader.next_record().unwrap(), None);
        assert_eq!(reader.records_read(), 2);
        assert_eq!(reader.estimated_records(), Some(2));
    }
}
