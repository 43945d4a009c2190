use std::collections::VecDeque;
use std::io::Read;

use csv::ByteRecord;
use tracing::debug;

use crate::config::SAMPLE_ROWS;
use crate::error::FormatError;
use crate::formats::inference::{TypeInferrer, parse_text_value};
use crate::formats::types::{DecodedRow, SourceField, SourceType, decode_narrow};
use crate::formats::{DelimitedConfig, RecordSource};

/// Streaming reader for delimited text (CSV, TSV, ...).
///
/// Column types are inferred from the first `SAMPLE_ROWS` records, which are
/// held back and replayed before the rest of the file is read.
pub struct DelimitedSource<R: Read> {
    reader: csv::Reader<R>,
    fields: Vec<SourceField>,
    types: Vec<SourceType>,
    sampled: VecDeque<ByteRecord>,
    total_bytes: u64,
}

impl<R: Read> DelimitedSource<R> {
    pub fn new(reader: R, config: &DelimitedConfig, total_bytes: u64) -> Result<Self, FormatError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(config.delimiter)
            .quote(config.quote)
            .has_headers(config.has_header)
            .from_reader(reader);

        let header_names: Option<Vec<String>> = if config.has_header {
            let headers = reader.byte_headers().map_err(|e| csv_error(e, 0))?;
            Some(headers.iter().map(|h| decode_narrow(h).trim().to_string()).collect())
        } else {
            None
        };

        let mut sampled = VecDeque::with_capacity(SAMPLE_ROWS);
        let mut inferrer = header_names.as_ref().map(|names| TypeInferrer::new(names.len()));
        let mut record = ByteRecord::new();

        while sampled.len() < SAMPLE_ROWS {
            let offset = reader.position().byte();
            if !reader
                .read_byte_record(&mut record)
                .map_err(|e| csv_error(e, offset))?
            {
                break;
            }
            let inferrer = inferrer.get_or_insert_with(|| TypeInferrer::new(record.len()));
            for (i, raw) in record.iter().enumerate() {
                inferrer.observe_text(i, &decode_narrow(raw));
            }
            sampled.push_back(record.clone());
        }

        let names = match header_names {
            Some(names) => names,
            None => {
                let count = inferrer.as_ref().map_or(0, TypeInferrer::column_count);
                (0..count).map(|i| format!("column_{}", i + 1)).collect()
            }
        };
        if names.is_empty() {
            return Err(FormatError::NoFields);
        }

        let types = inferrer
            .map(|inferrer| inferrer.finish())
            .unwrap_or_else(|| vec![SourceType::VString; names.len()]);

        let fields = names
            .into_iter()
            .zip(&types)
            .enumerate()
            .map(|(ordinal, (name, source_type))| SourceField::new(name, *source_type, ordinal))
            .collect();

        debug!(
            sampled = sampled.len(),
            columns = types.len(),
            "Inferred delimited schema"
        );

        Ok(Self {
            reader,
            fields,
            types,
            sampled,
            total_bytes,
        })
    }

    fn convert(&self, record: &ByteRecord) -> DecodedRow {
        record
            .iter()
            .zip(&self.types)
            .map(|(raw, source_type)| parse_text_value(*source_type, &decode_narrow(raw)))
            .collect()
    }
}

impl<R: Read + Send> RecordSource for DelimitedSource<R> {
    fn fields(&self) -> &[SourceField] {
        &self.fields
    }

    fn next_record(&mut self) -> Result<Option<DecodedRow>, FormatError> {
        if let Some(record) = self.sampled.pop_front() {
            return Ok(Some(self.convert(&record)));
        }

        let offset = self.reader.position().byte();
        let mut record = ByteRecord::new();
        if !self
            .reader
            .read_byte_record(&mut record)
            .map_err(|e| csv_error(e, offset))?
        {
            return Ok(None);
        }
        Ok(Some(self.convert(&record)))
    }

    fn position(&self) -> u64 {
        match self.sampled.front() {
            Some(record) => record.position().map_or(0, |p| p.byte()),
            None => self.reader.position().byte(),
        }
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

fn csv_error(err: csv::Error, fallback_offset: u64) -> FormatError {
    let offset = err.position().map_or(fallback_offset, |p| p.byte());
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => FormatError::Io { offset, source },
        _ => FormatError::Delimited { offset, message },
    }
}
