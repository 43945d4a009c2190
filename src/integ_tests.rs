//! Integration tests for the conversion pipeline
//!
//! These tests write real source files into a temp directory and convert them
//! into SQLite databases, end to end through `ConversionJob`.

#[cfg(test)]
mod tests {
    use crate::{
        config::STATUS_TABLE,
        coordination::{
            ConversionJob, ConversionReport, ConvertOptionsBuilder, JobStatus,
            progress::CancelFlag,
        },
        db::{
            DestinationStore, SqliteStore, StatusRecord, TableMode,
            pool::{self, PoolArgsBuilder},
            schema::TableColumn,
        },
        error::WriteError,
        formats::{
            SourceFormat,
            binary::ContainerWriter,
            types::{FieldValue, SourceField, SourceType},
        },
        mapping::{ColumnMapping, SqlValue, warnings::WarningKind},
    };
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveTime};
    use std::fs::File;
    use std::io::{BufWriter, Write};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    // ============ Test Helpers ============

    /// Helper to open a SQLite store on a file in `dir`
    async fn file_store(dir: &TempDir) -> Arc<SqliteStore> {
        let path = dir.path().join("out.db");
        let pool = pool::pool(PoolArgsBuilder::default().path(&path).build().unwrap())
            .await
            .unwrap();
        Arc::new(SqliteStore::new(pool, path.display().to_string()))
    }

    /// Helper to write a container file and return its path
    fn write_container(
        dir: &TempDir,
        name: &str,
        fields: Vec<SourceField>,
        rows: impl IntoIterator<Item = Vec<FieldValue>>,
    ) -> PathBuf {
        let path = dir.path().join(name);
        let file = BufWriter::new(File::create(&path).unwrap());
        let mut writer = ContainerWriter::new(file, fields, None).unwrap();
        for row in rows {
            writer.write_record(&row).unwrap();
        }
        writer.flush().unwrap();
        path
    }

    /// Helper to write a text file with the given lines
    fn write_lines(dir: &TempDir, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    /// Helper to run a job to completion with default options
    async fn convert(
        store: Arc<dyn DestinationStore>,
        source: &Path,
        table: &str,
        batch_rows: usize,
    ) -> Arc<ConversionReport> {
        let options = ConvertOptionsBuilder::default()
            .source(source)
            .table_name(table)
            .batch_rows(batch_rows)
            .build()
            .unwrap();
        ConversionJob::new(format!("job-{table}"), options, store)
            .run()
            .await
    }

    async fn status_row(store: &SqliteStore, table: &str) -> (String, i64, i64) {
        sqlx::query_as(&format!(
            "SELECT status, ready, rows_written FROM {STATUS_TABLE} WHERE table_name = ?"
        ))
        .bind(table)
        .fetch_one(store.pool())
        .await
        .unwrap()
    }

    /// Counts committed batches and raises a cancel flag after `cancel_after`
    struct CancelAfter {
        inner: Arc<SqliteStore>,
        committed: AtomicU64,
        cancel_after: u64,
        cancel: CancelFlag,
    }

    #[async_trait]
    impl DestinationStore for CancelAfter {
        fn location(&self) -> String {
            self.inner.location()
        }

        async fn create_table(
            &self,
            table_name: &str,
            mappings: &[ColumnMapping],
            mode: TableMode,
        ) -> Result<(), WriteError> {
            self.inner.create_table(table_name, mappings, mode).await
        }

        async fn insert_batch(
            &self,
            table_name: &str,
            column_count: usize,
            rows: &[Vec<SqlValue>],
        ) -> Result<u64, WriteError> {
            let written = self.inner.insert_batch(table_name, column_count, rows).await?;
            if self.committed.fetch_add(1, Ordering::SeqCst) + 1 == self.cancel_after {
                self.cancel.cancel();
            }
            Ok(written)
        }

        async fn create_index(&self, table_name: &str, column: &str) -> Result<String, WriteError> {
            self.inner.create_index(table_name, column).await
        }

        async fn record_status(&self, record: &StatusRecord) -> Result<(), WriteError> {
            self.inner.record_status(record).await
        }

        async fn table_columns(&self, table_name: &str) -> Result<Vec<TableColumn>, WriteError> {
            self.inner.table_columns(table_name).await
        }

        async fn count_rows(&self, table_name: &str) -> Result<u64, WriteError> {
            self.inner.count_rows(table_name).await
        }
    }

    // ============ Binary Container Scenarios ============

    #[tokio::test]
    async fn test_three_field_container_in_batches_of_500() {
        let dir = TempDir::new().unwrap();
        let fields = vec![
            SourceField::new("id", SourceType::Int64, 0),
            SourceField::new("name", SourceType::String, 1).with_size(20),
            SourceField::new("amount", SourceType::Double, 2),
        ];
        let source = write_container(
            &dir,
            "sales.tbc",
            fields,
            (0..10_000).map(|i| {
                vec![
                    FieldValue::Int(i),
                    FieldValue::Text(format!("customer {i}")),
                    FieldValue::Double(i as f64 * 1.25),
                ]
            }),
        );
        let store = file_store(&dir).await;

        let report = convert(store.clone(), &source, "sales", 500).await;

        assert_eq!(report.status(), JobStatus::Completed);
        assert_eq!(report.rows, 10_000);
        assert_eq!(report.batches, 20);
        assert_eq!(store.count_rows("sales").await.unwrap(), 10_000);

        let columns = store.table_columns("sales").await.unwrap();
        let columns: Vec<(&str, &str)> = columns
            .iter()
            .map(|c| (c.name.as_str(), c.sql_type.as_str()))
            .collect();
        assert_eq!(
            columns,
            vec![("id", "INTEGER"), ("name", "TEXT"), ("amount", "REAL")]
        );

        let (name, amount): (String, f64) =
            sqlx::query_as("SELECT name, amount FROM sales WHERE id = 9999")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(name, "customer 9999");
        assert_eq!(amount, 9999.0 * 1.25);

        assert_eq!(status_row(&store, "sales").await, ("completed".to_string(), 1, 10_000));
        assert!(report.batch_latency.p50_ms.is_some());
    }

    #[tokio::test]
    async fn test_truncated_variable_field_fails_with_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("damaged.tbc");
        let fields = vec![
            SourceField::new("id", SourceType::Int64, 0).with_nullable(false),
            SourceField::new("note", SourceType::VString, 1),
        ];
        let mut writer = ContainerWriter::new(File::create(&path).unwrap(), fields, None).unwrap();
        for i in 0..20 {
            writer
                .write_record(&[FieldValue::Int(i), FieldValue::Text(format!("note {i}"))])
                .unwrap();
        }

        // Record whose note claims 100 bytes but carries 3
        let bad_offset = writer.position();
        let mut body = vec![0u8];
        body.extend_from_slice(&20i64.to_le_bytes());
        body.extend_from_slice(&100u32.to_le_bytes());
        body.extend_from_slice(b"abc");
        writer.write_raw(&(body.len() as u32).to_le_bytes()).unwrap();
        writer.write_raw(&body).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let store = file_store(&dir).await;
        let report = convert(store.clone(), &path, "damaged", 5).await;

        assert_eq!(report.status(), JobStatus::Failed);
        assert_eq!(report.progress.error_offset, Some(bad_offset));
        let error = report.progress.error.clone().unwrap();
        assert!(
            error.contains(&bad_offset.to_string()),
            "error should name offset {bad_offset}: {error}"
        );

        // Earlier batches stay, marked not ready
        assert_eq!(report.rows, 20);
        assert_eq!(store.count_rows("damaged").await.unwrap(), 20);
        assert_eq!(status_row(&store, "damaged").await, ("failed".to_string(), 0, 20));
    }

    #[tokio::test]
    async fn test_cancel_after_three_of_ten_batches() {
        let dir = TempDir::new().unwrap();
        let source = write_container(
            &dir,
            "ten.tbc",
            vec![SourceField::new("n", SourceType::Int32, 0)],
            (0..1000).map(|i| vec![FieldValue::Int(i)]),
        );

        let cancel = CancelFlag::default();
        let inner = file_store(&dir).await;
        let store = Arc::new(CancelAfter {
            inner: inner.clone(),
            committed: AtomicU64::new(0),
            cancel_after: 3,
            cancel: cancel.clone(),
        });

        let options = ConvertOptionsBuilder::default()
            .source(source)
            .table_name("ten")
            .batch_rows(100usize)
            .build()
            .unwrap();
        let report = ConversionJob::new("cancel-job", options, store)
            .with_cancel(cancel)
            .run()
            .await;

        assert_eq!(report.status(), JobStatus::Cancelled);
        assert!(report.progress.error.is_none());
        assert_eq!(report.batches, 3);
        assert_eq!(report.rows, 300);
        assert_eq!(inner.count_rows("ten").await.unwrap(), 300);
        assert_eq!(status_row(&inner, "ten").await, ("cancelled".to_string(), 0, 300));
    }

    #[tokio::test]
    async fn test_unknown_type_code_becomes_text_with_warning() {
        let dir = TempDir::new().unwrap();
        let fields = vec![
            SourceField::new("id", SourceType::Int32, 0),
            SourceField::new("mystery", SourceType::Unknown(200), 1).with_size(2),
        ];
        let source = write_container(
            &dir,
            "mystery.tbc",
            fields,
            (0..10).map(|i| vec![FieldValue::Int(i), FieldValue::Bytes(vec![0xab, i as u8])]),
        );
        let store = file_store(&dir).await;

        let report = convert(store.clone(), &source, "mystery", 4).await;

        assert_eq!(report.status(), JobStatus::Completed);
        assert_eq!(report.rows, 10);
        let schema = report.schema.as_ref().unwrap();
        assert_eq!(schema.columns[1].sql_type.sql_name(), "TEXT");
        assert!(
            report
                .warnings
                .iter()
                .any(|w| w.column == "mystery" && w.kind == WarningKind::UnsupportedType)
        );
        assert!(report.progress.warnings >= 1);

        let (value,): (String,) = sqlx::query_as("SELECT mystery FROM mystery WHERE id = 3")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(value, "ab03");
    }

    #[tokio::test]
    async fn test_every_type_lands_with_nulls_and_empties() {
        let dir = TempDir::new().unwrap();
        let types = [
            SourceType::Bool,
            SourceType::Byte,
            SourceType::Int16,
            SourceType::Int32,
            SourceType::Int64,
            SourceType::UInt64,
            SourceType::FixedDecimal,
            SourceType::Float,
            SourceType::Double,
            SourceType::String,
            SourceType::WString,
            SourceType::VString,
            SourceType::VWString,
            SourceType::Date,
            SourceType::Time,
            SourceType::DateTime,
            SourceType::Blob,
            SourceType::SpatialObj,
        ];
        let fields: Vec<SourceField> = types
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let field = SourceField::new(format!("f {i}"), *t, i);
                match t {
                    SourceType::String | SourceType::WString => field.with_size(8),
                    SourceType::FixedDecimal => field.with_scale(3),
                    _ => field,
                }
            })
            .collect();

        let date = NaiveDate::from_ymd_opt(2023, 6, 30).unwrap();
        let time = NaiveTime::from_hms_micro_opt(13, 45, 1, 250_000).unwrap();
        let values = vec![
            FieldValue::Bool(true),
            FieldValue::Int(255),
            FieldValue::Int(-32768),
            FieldValue::Int(123_456),
            FieldValue::Int(-9_000_000_000),
            FieldValue::UInt(u64::MAX),
            FieldValue::Decimal {
                unscaled: -12_345,
                scale: 3,
            },
            FieldValue::Float(0.5),
            FieldValue::Double(-2.25),
            FieldValue::Text("fixed".to_string()),
            FieldValue::Text("wide".to_string()),
            FieldValue::Text(String::new()),
            FieldValue::Text("ünï".to_string()),
            FieldValue::Date(date),
            FieldValue::Time(time),
            FieldValue::DateTime(date.and_time(time)),
            FieldValue::Bytes(Vec::new()),
            FieldValue::Bytes(vec![1, 2, 3]),
        ];
        let nulls = vec![FieldValue::Null; types.len()];
        let source = write_container(&dir, "all.tbc", fields, vec![values, nulls]);
        let store = file_store(&dir).await;

        let report = convert(store.clone(), &source, "all_types", 10).await;
        assert_eq!(report.status(), JobStatus::Completed);

        // One column per field, in order, no extras
        let columns = store.table_columns("all_types").await.unwrap();
        assert_eq!(columns.len(), types.len());
        assert_eq!(columns[0].name, "f_0");
        assert_eq!(columns[17].name, "f_17");

        // u64::MAX does not fit and is clamped with a warning
        assert!(
            report
                .warnings
                .iter()
                .any(|w| w.column == "f_5" && w.kind == WarningKind::Overflow)
        );

        let row: (i64, i64, f64, String, String, String, String, Vec<u8>) = sqlx::query_as(
            "SELECT f_0, f_5, f_6, f_11, f_13, f_14, f_15, f_16 FROM all_types WHERE f_0 IS NOT NULL",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(row.0, 1);
        assert_eq!(row.1, i64::MAX);
        assert_eq!(row.2, -12.345);
        // Zero-length values stay distinct from NULL
        assert_eq!(row.3, "");
        assert_eq!(row.4, "2023-06-30");
        assert_eq!(row.5, "13:45:01.250000");
        assert_eq!(row.6, "2023-06-30 13:45:01.250000");
        assert!(row.7.is_empty());

        let (nulls,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM all_types WHERE f_0 IS NULL AND f_11 IS NULL AND f_16 IS NULL",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(nulls, 1);
    }

    #[tokio::test]
    async fn test_zero_width_text_field_lands_as_empty_strings() {
        let dir = TempDir::new().unwrap();
        let fields = vec![
            SourceField::new("id", SourceType::Int32, 0),
            SourceField::new("blank", SourceType::String, 1).with_nullable(false),
            SourceField::new("maybe", SourceType::WString, 2),
        ];
        let source = write_container(
            &dir,
            "blank.tbc",
            fields,
            (0..6).map(|i| {
                let maybe = if i % 2 == 0 {
                    FieldValue::Null
                } else {
                    FieldValue::Text(String::new())
                };
                vec![FieldValue::Int(i), FieldValue::Text(String::new()), maybe]
            }),
        );
        let store = file_store(&dir).await;

        let report = convert(store.clone(), &source, "blank", 4).await;

        assert_eq!(report.status(), JobStatus::Completed);
        assert_eq!(report.rows, 6);
        let (empty, nulls, empties): (i64, i64, i64) = sqlx::query_as(
            "SELECT SUM(blank = ''), SUM(maybe IS NULL), SUM(maybe = '') FROM blank",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!((empty, nulls, empties), (6, 3, 3));
    }

    // ============ Text Source Scenarios ============

    #[tokio::test]
    async fn test_csv_with_mixed_column() {
        let dir = TempDir::new().unwrap();
        let source = write_lines(
            &dir,
            "orders.csv",
            &[
                "order id,placed,total,code",
                "1,2024-01-05,10.50,A1",
                "2,2024-01-06,3,B2",
                "3,,7.25,42",
            ],
        );
        let store = file_store(&dir).await;

        let report = convert(store.clone(), &source, "orders", 100).await;

        assert_eq!(report.status(), JobStatus::Completed);
        let types: Vec<&str> = report
            .schema
            .as_ref()
            .unwrap()
            .columns
            .iter()
            .map(|c| c.sql_type.sql_name())
            .collect();
        assert_eq!(types, vec!["INTEGER", "DATE", "REAL", "TEXT"]);

        let (placed,): (Option<String>,) =
            sqlx::query_as("SELECT placed FROM orders WHERE order_id = 3")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(placed, None);
    }

    #[tokio::test]
    async fn test_json_array_and_lines() {
        let dir = TempDir::new().unwrap();
        let array = write_lines(
            &dir,
            "people.json",
            &[
                r#"[{"name": "Ada", "age": 36, "tags": ["math"]},"#,
                r#" {"name": "Linus", "age": 28, "tags": []}]"#,
            ],
        );
        let lines = write_lines(
            &dir,
            "events.ndjson",
            &[
                r#"{"kind": "click", "at": "2024-03-01 10:00:00"}"#,
                r#"{"kind": "view", "at": "2024-03-01 10:00:05"}"#,
                r#"{"kind": "click", "at": "2024-03-01 10:01:00"}"#,
            ],
        );
        let store = file_store(&dir).await;

        let people = convert(store.clone(), &array, "people", 100).await;
        assert_eq!(people.status(), JobStatus::Completed);
        assert_eq!(store.count_rows("people").await.unwrap(), 2);
        let (tags,): (String,) = sqlx::query_as("SELECT tags FROM people WHERE name = 'Ada'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(tags, r#"["math"]"#);

        let events = convert(store.clone(), &lines, "events", 2).await;
        assert_eq!(events.status(), JobStatus::Completed);
        assert_eq!(events.batches, 2);
        let columns: Vec<String> = store
            .table_columns("events")
            .await
            .unwrap()
            .into_iter()
            .map(|c| format!("{} {}", c.name, c.sql_type))
            .collect();
        assert_eq!(columns, vec!["kind TEXT", "at DATETIME"]);
    }

    #[tokio::test]
    async fn test_explicit_format_overrides_extension() {
        let dir = TempDir::new().unwrap();
        let source = write_lines(&dir, "data.txt", &["a\tb", "1\tx", "2\ty"]);
        let store = file_store(&dir).await;

        let options = ConvertOptionsBuilder::default()
            .source(source)
            .format(SourceFormat::Tsv)
            .table_name("tabbed")
            .build()
            .unwrap();
        let report = ConversionJob::new("tsv-job", options, store.clone())
            .run()
            .await;

        assert_eq!(report.status(), JobStatus::Completed);
        assert_eq!(store.count_rows("tabbed").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rerun_replaces_previous_table() {
        let dir = TempDir::new().unwrap();
        let first = write_lines(&dir, "v1.csv", &["a,b", "1,2", "3,4", "5,6"]);
        let second = write_lines(&dir, "v2.csv", &["x", "9"]);
        let store = file_store(&dir).await;

        assert_eq!(
            convert(store.clone(), &first, "t", 100).await.status(),
            JobStatus::Completed
        );
        assert_eq!(
            convert(store.clone(), &second, "t", 100).await.status(),
            JobStatus::Completed
        );

        assert_eq!(store.count_rows("t").await.unwrap(), 1);
        assert_eq!(store.table_columns("t").await.unwrap().len(), 1);
    }
}
