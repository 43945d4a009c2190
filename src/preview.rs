//! Sampled preview of a source: the mapped schema, per-column statistics over
//! the leading records and a few converted rows.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::config::{PREVIEW_ROWS_SHOWN, PREVIEW_SAMPLE_VALUES};
use crate::error::FormatError;
use crate::formats::RecordSource;
use crate::mapping::warnings::{TypeMappingWarning, WarningLog};
use crate::mapping::{
    ColumnMapping, FieldTypeMapper, SchemaReport, SqlValue, TargetType, ValueConverter,
};

/// Statistics for one column over the sampled records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub name: String,
    pub sql_type: TargetType,
    pub null_count: u64,
    pub unique_count: u64,
    /// Leading non-null values, in source order
    pub sample_values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataPreview {
    /// Records actually sampled; less than requested for short sources
    pub sample_size: u64,
    pub schema: SchemaReport,
    pub column_stats: Vec<ColumnStats>,
    /// Leading converted rows keyed by column name
    pub sample_rows: Vec<Map<String, Value>>,
    pub warnings: Vec<TypeMappingWarning>,
}

/// Running statistics for one column
struct ColumnAccumulator {
    mapping: ColumnMapping,
    null_count: u64,
    distinct: HashSet<String>,
    sample_values: Vec<String>,
    numeric_count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl ColumnAccumulator {
    fn new(mapping: ColumnMapping) -> Self {
        Self {
            mapping,
            null_count: 0,
            distinct: HashSet::new(),
            sample_values: Vec::new(),
            numeric_count: 0,
            sum: 0.0,
            min: None,
            max: None,
        }
    }

    fn observe(&mut self, value: &SqlValue) {
        let number = match value {
            SqlValue::Null => {
                self.null_count += 1;
                return;
            }
            SqlValue::Integer(v) => Some(*v as f64),
            SqlValue::Real(v) => Some(*v),
            SqlValue::Text(_) | SqlValue::Blob(_) => None,
        };

        let text = display_text(value);
        if self.sample_values.len() < PREVIEW_SAMPLE_VALUES {
            self.sample_values.push(text.clone());
        }
        self.distinct.insert(text);

        if let Some(number) = number {
            self.numeric_count += 1;
            self.sum += number;
            self.min = Some(self.min.map_or(number, |m| m.min(number)));
            self.max = Some(self.max.map_or(number, |m| m.max(number)));
        }
    }

    fn finish(self) -> ColumnStats {
        let avg = (self.numeric_count > 0).then(|| self.sum / self.numeric_count as f64);
        ColumnStats {
            name: self.mapping.target_name,
            sql_type: self.mapping.target_type,
            null_count: self.null_count,
            unique_count: self.distinct.len() as u64,
            sample_values: self.sample_values,
            min: self.min,
            max: self.max,
            avg,
        }
    }
}

fn display_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Integer(v) => v.to_string(),
        SqlValue::Real(v) => v.to_string(),
        SqlValue::Text(s) => s.clone(),
        SqlValue::Blob(b) => hex::encode(b),
    }
}

fn json_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::from(v),
        // Non-finite reals never reach here; the converter clamps or nulls them
        SqlValue::Real(v) => serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(hex::encode(b)),
    }
}

/// Read up to `sample_size` records from `source` and summarize them.
///
/// Values are converted exactly as a conversion would store them, so the
/// statistics describe the destination table rather than the raw source.
pub fn preview_source(
    source: &mut dyn RecordSource,
    table_name: &str,
    sample_size: usize,
) -> Result<DataPreview, FormatError> {
    let mut warnings = WarningLog::default();
    let mappings = FieldTypeMapper::map_schema(source.fields(), &mut warnings);
    let schema = SchemaReport::from_mappings(table_name, &mappings);
    let converter = ValueConverter::new(mappings.clone());
    let mut columns: Vec<ColumnAccumulator> =
        mappings.into_iter().map(ColumnAccumulator::new).collect();

    let mut sampled = 0u64;
    let mut sample_rows = Vec::new();
    while sampled < sample_size as u64 {
        let Some(row) = source.next_record()? else {
            break;
        };
        let values = converter.convert_row(row, sampled, &mut warnings);
        for (column, value) in columns.iter_mut().zip(&values) {
            column.observe(value);
        }
        if sample_rows.len() < PREVIEW_ROWS_SHOWN {
            sample_rows.push(
                columns
                    .iter()
                    .map(|c| c.mapping.target_name.clone())
                    .zip(values.into_iter().map(json_value))
                    .collect(),
            );
        }
        sampled += 1;
    }
    warnings.absorb(source.drain_warnings());

    Ok(DataPreview {
        sample_size: sampled,
        schema,
        column_stats: columns.into_iter().map(ColumnAccumulator::finish).collect(),
        sample_rows,
        warnings: warnings.into_warnings(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::binary::{BinaryRecordReader, ContainerWriter};
    use crate::formats::delimited::DelimitedSource;
    use crate::formats::types::{FieldValue, SourceField, SourceType};
    use crate::formats::DelimitedConfig;
    use std::io::Cursor;

    fn csv_source(text: &str) -> DelimitedSource<Cursor<Vec<u8>>> {
        let bytes = text.as_bytes().to_vec();
        let len = bytes.len() as u64;
        DelimitedSource::new(Cursor::new(bytes), &DelimitedConfig::default(), len).unwrap()
    }

    #[test]
    fn test_csv_column_stats() {
        let mut source = csv_source(
            "city,population,area\n\
             Oslo,700000,454.0\n\
             Bergen,,465.3\n\
             Oslo,700000,\n\
             Tromso,100000,2521.0\n",
        );

        let preview = preview_source(&mut source, "cities", 100).unwrap();

        assert_eq!(preview.sample_size, 4);
        assert_eq!(preview.schema.table_name, "cities");
        assert_eq!(preview.sample_rows.len(), 4);

        let city = &preview.column_stats[0];
        assert_eq!(city.sql_type, TargetType::Text);
        assert_eq!(city.null_count, 0);
        assert_eq!(city.unique_count, 3);
        assert_eq!(city.sample_values, vec!["Oslo", "Bergen", "Oslo", "Tromso"]);
        assert_eq!((city.min, city.max, city.avg), (None, None, None));

        let population = &preview.column_stats[1];
        assert_eq!(population.sql_type, TargetType::Integer);
        assert_eq!(population.null_count, 1);
        assert_eq!(population.unique_count, 2);
        assert_eq!(population.min, Some(100000.0));
        assert_eq!(population.max, Some(700000.0));
        assert_eq!(population.avg, Some(500000.0));

        let area = &preview.column_stats[2];
        assert_eq!(area.sql_type, TargetType::Real);
        assert_eq!(area.null_count, 1);
        assert_eq!(area.min, Some(454.0));
        assert_eq!(area.max, Some(2521.0));

        let first = &preview.sample_rows[0];
        let keys: Vec<&str> = first.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["city", "population", "area"]);
        assert_eq!(first["population"], Value::from(700000));
        assert_eq!(preview.sample_rows[1]["population"], Value::Null);
    }

    #[test]
    fn test_binary_sample_is_bounded() {
        let fields = vec![
            SourceField::new("id", SourceType::Int32, 0).with_nullable(false),
            SourceField::new("tag", SourceType::VString, 1),
            SourceField::new("payload", SourceType::Blob, 2),
        ];
        let mut writer = ContainerWriter::new(Vec::new(), fields, Some(50)).unwrap();
        for i in 0..50 {
            let tag = if i % 5 == 0 {
                FieldValue::Null
            } else {
                FieldValue::Text(format!("tag{}", i % 3))
            };
            writer
                .write_record(&[FieldValue::Int(i), tag, FieldValue::Bytes(vec![i as u8])])
                .unwrap();
        }
        let mut source = BinaryRecordReader::open(Cursor::new(writer.into_inner())).unwrap();

        let preview = preview_source(&mut source, "t", 20).unwrap();

        assert_eq!(preview.sample_size, 20);
        assert_eq!(preview.sample_rows.len(), PREVIEW_ROWS_SHOWN);
        assert!(preview.warnings.is_empty());

        let id = &preview.column_stats[0];
        assert_eq!(id.unique_count, 20);
        assert_eq!(id.sample_values.len(), PREVIEW_SAMPLE_VALUES);
        assert_eq!((id.min, id.max, id.avg), (Some(0.0), Some(19.0), Some(9.5)));

        // Nulls at 0, 5, 10 and 15
        let tag = &preview.column_stats[1];
        assert_eq!(tag.null_count, 4);
        assert_eq!(tag.unique_count, 3);
        assert_eq!(tag.sample_values[0], "tag1");

        let payload = &preview.column_stats[2];
        assert_eq!(payload.sql_type, TargetType::Blob);
        assert_eq!(payload.sample_values[..2], ["00".to_string(), "01".to_string()]);
        assert_eq!(preview.sample_rows[3]["payload"], Value::from("03"));

        // Reading stopped at the sample
        assert_eq!(source.records_read(), 20);
    }

    #[test]
    fn test_empty_source() {
        let mut source = csv_source("a,b\n");
        let preview = preview_source(&mut source, "t", 10).unwrap();
        assert_eq!(preview.sample_size, 0);
        assert!(preview.sample_rows.is_empty());
        assert_eq!(preview.column_stats.len(), 2);
        assert_eq!(preview.column_stats[0].null_count, 0);
    }
}
