use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::io::BufRead;
use tracing::debug;

use crate::config::SAMPLE_ROWS;
use crate::error::FormatError;
use crate::formats::RecordSource;
use crate::formats::inference::{TypeInferrer, infer_value_type, parse_text_value};
use crate::formats::types::{DecodedRow, FieldValue, SourceField, SourceType};
use crate::mapping::warnings::{WarningKind, WarningLog};

/// How records are laid out in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonLayout {
    /// A single top-level array of objects
    Array,
    /// One object per line (NDJSON)
    Lines,
}

/// Streaming reader for arrays of JSON objects and newline-delimited JSON.
///
/// Columns are the keys seen in the first `SAMPLE_ROWS` objects, in the order
/// they first appear. Keys that show up only later are dropped and counted as
/// warnings.
pub struct JsonSource<R: BufRead> {
    elements: ElementSplitter<R>,
    fields: Vec<SourceField>,
    types: Vec<SourceType>,
    key_index: HashMap<String, usize>,
    sampled: VecDeque<(u64, Map<String, Value>)>,
    total_bytes: u64,
    rows_read: u64,
    warnings: WarningLog,
}

impl<R: BufRead> JsonSource<R> {
    pub fn new(reader: R, total_bytes: u64) -> Result<Self, FormatError> {
        let mut elements = ElementSplitter::new(reader)?;

        let mut names: Vec<String> = Vec::new();
        let mut key_index: HashMap<String, usize> = HashMap::new();
        let mut inferrer = TypeInferrer::new(0);
        let mut sampled = VecDeque::with_capacity(SAMPLE_ROWS);

        while sampled.len() < SAMPLE_ROWS {
            let Some((offset, object)) = elements.next_object()? else {
                break;
            };
            for (key, value) in &object {
                let column = match key_index.get(key) {
                    Some(column) => *column,
                    None => {
                        key_index.insert(key.clone(), names.len());
                        names.push(key.clone());
                        inferrer.push_column();
                        names.len() - 1
                    }
                };
                inferrer.observe(column, infer_json_type(value));
            }
            sampled.push_back((offset, object));
        }

        if names.is_empty() {
            return Err(FormatError::NoFields);
        }

        let types = inferrer.finish();
        let fields = names
            .into_iter()
            .zip(&types)
            .enumerate()
            .map(|(ordinal, (name, source_type))| SourceField::new(name, *source_type, ordinal))
            .collect();

        debug!(
            layout = ?elements.layout,
            sampled = sampled.len(),
            columns = types.len(),
            "Inferred JSON schema"
        );

        Ok(Self {
            elements,
            fields,
            types,
            key_index,
            sampled,
            total_bytes,
            rows_read: 0,
            warnings: WarningLog::default(),
        })
    }

    pub fn layout(&self) -> JsonLayout {
        self.elements.layout
    }

    fn convert(&mut self, object: Map<String, Value>) -> DecodedRow {
        let row_number = self.rows_read;
        self.rows_read += 1;

        let mut row = vec![FieldValue::Null; self.types.len()];
        for (key, value) in object {
            match self.key_index.get(&key) {
                Some(&column) => row[column] = json_to_field_value(self.types[column], value),
                None => self.warnings.record(&key, WarningKind::UnknownKey, row_number, || {
                    format!("key '{key}' is not in the sampled columns and was dropped")
                }),
            }
        }
        row
    }
}

impl<R: BufRead + Send> RecordSource for JsonSource<R> {
    fn fields(&self) -> &[SourceField] {
        &self.fields
    }

    fn next_record(&mut self) -> Result<Option<DecodedRow>, FormatError> {
        let object = match self.sampled.pop_front() {
            Some((_, object)) => object,
            None => match self.elements.next_object()? {
                Some((_, object)) => object,
                None => return Ok(None),
            },
        };
        Ok(Some(self.convert(object)))
    }

    fn position(&self) -> u64 {
        match self.sampled.front() {
            Some((offset, _)) => *offset,
            None => self.elements.offset,
        }
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn drain_warnings(&mut self) -> WarningLog {
        std::mem::take(&mut self.warnings)
    }
}

fn infer_json_type(value: &Value) -> Option<SourceType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(SourceType::Bool),
        Value::Number(n) if n.is_i64() => Some(SourceType::Int64),
        Value::Number(_) => Some(SourceType::Double),
        Value::String(s) => infer_value_type(s),
        Value::Array(_) | Value::Object(_) => Some(SourceType::VString),
    }
}

/// Nested arrays and objects are kept as their JSON text
fn json_to_field_value(source_type: SourceType, value: Value) -> FieldValue {
    match (source_type, value) {
        (_, Value::Null) => FieldValue::Null,
        (SourceType::Bool, Value::Bool(b)) => FieldValue::Bool(b),
        (SourceType::Int64, Value::Bool(b)) => FieldValue::Int(b as i64),
        (SourceType::Int64, Value::Number(n)) if n.is_i64() => {
            FieldValue::Int(n.as_i64().unwrap_or_default())
        }
        (SourceType::Double, Value::Bool(b)) => FieldValue::Double(if b { 1.0 } else { 0.0 }),
        (SourceType::Double, Value::Number(n)) if n.as_f64().is_some() => {
            FieldValue::Double(n.as_f64().unwrap_or_default())
        }
        (SourceType::VString, Value::String(s)) => FieldValue::Text(s),
        (_, Value::String(s)) => parse_text_value(source_type, &s),
        (_, other) => FieldValue::Text(other.to_string()),
    }
}

/// Splits a JSON document into the raw bytes of its top-level objects
struct ElementSplitter<R: BufRead> {
    reader: R,
    layout: JsonLayout,
    /// Absolute offset of the next unread byte
    offset: u64,
    expect_separator: bool,
    finished: bool,
}

impl<R: BufRead> ElementSplitter<R> {
    fn new(reader: R) -> Result<Self, FormatError> {
        let mut splitter = Self {
            reader,
            layout: JsonLayout::Lines,
            offset: 0,
            expect_separator: false,
            finished: false,
        };

        splitter.skip_bom()?;
        splitter.skip_whitespace()?;
        match splitter.peek()? {
            None => return Err(FormatError::NoFields),
            Some(b'[') => {
                splitter.bump();
                splitter.layout = JsonLayout::Array;
            }
            Some(b'{') => splitter.layout = JsonLayout::Lines,
            Some(other) => {
                return Err(FormatError::Json {
                    offset: splitter.offset,
                    message: format!(
                        "expected '[' or '{{' at the start of the document, found {:?}",
                        other as char
                    ),
                });
            }
        }
        Ok(splitter)
    }

    fn next_object(&mut self) -> Result<Option<(u64, Map<String, Value>)>, FormatError> {
        if self.finished {
            return Ok(None);
        }

        let element = match self.layout {
            JsonLayout::Array => self.next_array_element()?,
            JsonLayout::Lines => self.next_line()?,
        };
        let Some((offset, bytes)) = element else {
            self.finished = true;
            return Ok(None);
        };

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(object)) => Ok(Some((offset, object))),
            Ok(_) => Err(FormatError::Json {
                offset,
                message: "expected a JSON object".to_string(),
            }),
            Err(e) => Err(FormatError::Json {
                offset,
                message: e.to_string(),
            }),
        }
    }

    fn next_line(&mut self) -> Result<Option<(u64, Vec<u8>)>, FormatError> {
        let mut line = Vec::new();
        loop {
            line.clear();
            let start = self.offset;
            let read = self
                .reader
                .read_until(b'\n', &mut line)
                .map_err(|source| FormatError::Io {
                    offset: start,
                    source,
                })?;
            if read == 0 {
                return Ok(None);
            }
            self.offset += read as u64;

            let leading = line.iter().take_while(|b| b.is_ascii_whitespace()).count();
            if leading == line.len() {
                continue;
            }
            let trimmed = line[leading..].trim_ascii_end().to_vec();
            return Ok(Some((start + leading as u64, trimmed)));
        }
    }

    fn next_array_element(&mut self) -> Result<Option<(u64, Vec<u8>)>, FormatError> {
        loop {
            self.skip_whitespace()?;
            match self.peek()? {
                None => {
                    return Err(FormatError::Json {
                        offset: self.offset,
                        message: "unterminated top-level array".to_string(),
                    });
                }
                Some(b']') => {
                    self.bump();
                    return Ok(None);
                }
                Some(b',') if self.expect_separator => {
                    self.bump();
                    self.expect_separator = false;
                }
                Some(b'{') if !self.expect_separator => break,
                Some(other) => {
                    return Err(FormatError::Json {
                        offset: self.offset,
                        message: format!("unexpected {:?} in top-level array", other as char),
                    });
                }
            }
        }

        let start = self.offset;
        let mut element = Vec::new();
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        loop {
            let Some(byte) = self.peek()? else {
                return Err(FormatError::Json {
                    offset: start,
                    message: "object is not terminated before end of input".to_string(),
                });
            };
            self.bump();
            element.push(byte);

            if in_string {
                if escaped {
                    escaped = false;
                } else if byte == b'\\' {
                    escaped = true;
                } else if byte == b'"' {
                    in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }

        self.expect_separator = true;
        Ok(Some((start, element)))
    }

    fn peek(&mut self) -> Result<Option<u8>, FormatError> {
        let buf = self.reader.fill_buf().map_err(|source| FormatError::Io {
            offset: self.offset,
            source,
        })?;
        Ok(buf.first().copied())
    }

    fn bump(&mut self) {
        self.reader.consume(1);
        self.offset += 1;
    }

    fn skip_whitespace(&mut self) -> Result<(), FormatError> {
        while let Some(byte) = self.peek()? {
            if !byte.is_ascii_whitespace() {
                break;
            }
            self.bump();
        }
        Ok(())
    }

    fn skip_bom(&mut self) -> Result<(), FormatError> {
        let buf = self.reader.fill_buf().map_err(|source| FormatError::Io {
            offset: 0,
            source,
        })?;
        if buf.starts_with(&[0xEF, 0xBB, 0xBF]) {
            self.reader.consume(3);
            self.offset += 3;
        }
        Ok(())
    }
}
