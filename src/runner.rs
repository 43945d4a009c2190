//! High-level runner API for the converter.
//!
//! This module wraps the engine for the CLI: it opens the destination
//! database, runs a job with a progress display and turns the outcome into an
//! `anyhow::Result`.

use anyhow::{Context, Result, anyhow, bail};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::DEFAULT_PREVIEW_RECORDS;
use crate::coordination::progress::{CancelFlag, JobStatus, ProgressWatcher};
use crate::coordination::{ConversionJob, ConversionReport, ConvertOptionsBuilder};
use crate::db::pool::PoolArgsBuilder;
use crate::db::{SqliteStore, TableMode};
use crate::formats::binary::ContainerWriter;
use crate::formats::types::{FieldValue, SourceField, SourceType};
use crate::formats::{SourceFormat, open_source};
use crate::io::SourceUri;
use crate::mapping::warnings::WarningLog;
use crate::mapping::{FieldTypeMapper, SchemaReport, sanitize_table_name};
use crate::preview::{DataPreview, preview_source};

/// Arguments for a single conversion
#[derive(Debug, Clone)]
pub struct ConvertArgs {
    pub source_uri: String,
    pub output: PathBuf,
    pub table: String,
    pub format: Option<String>,
    pub batch_rows: usize,
    pub batch_bytes: usize,
    pub index_columns: usize,
    pub fail_if_exists: bool,
    pub quiet: bool,
}

fn resolve_source(source_uri: &str, format: Option<&str>) -> Result<(PathBuf, SourceFormat)> {
    let path = SourceUri::parse(source_uri)?.path().to_path_buf();

    let format = match format {
        Some(name) => name.parse::<SourceFormat>().map_err(|e| anyhow!(e))?,
        None => SourceFormat::detect_from_path(&path).ok_or_else(|| {
            anyhow!(
                "Could not detect format from file '{}'.\n\
                 Supported extensions: .tbc, .bin, .csv, .tsv, .json, .ndjson\n\
                 Please specify --format explicitly.",
                source_uri
            )
        })?,
    };
    Ok((path, format))
}

/// Convert one file into a SQLite table.
///
/// Returns the report of a completed job; a failed or cancelled job is an error.
/// Ctrl-C cancels the job after the batch in flight.
pub async fn run_convert(args: ConvertArgs) -> Result<Arc<ConversionReport>> {
    let (path, format) = resolve_source(&args.source_uri, args.format.as_deref())?;

    let pool = crate::db::pool::pool(PoolArgsBuilder::default().path(&args.output).build()?)
        .await
        .with_context(|| format!("Failed to open output database {}", args.output.display()))?;
    let store = Arc::new(SqliteStore::new(pool, args.output.display().to_string()));

    let options = ConvertOptionsBuilder::default()
        .source(path)
        .format(format)
        .table_name(args.table.clone())
        .batch_rows(args.batch_rows)
        .batch_bytes(args.batch_bytes)
        .index_columns(args.index_columns)
        .table_mode(if args.fail_if_exists {
            TableMode::FailIfExists
        } else {
            TableMode::Replace
        })
        .build()?;

    let mut job_id = Uuid::new_v4().simple().to_string();
    job_id.truncate(12);
    let job = ConversionJob::new(job_id, options, store);
    info!(job_id = %job.id(), table = %job.table_name(), "converting {}", args.source_uri);

    let cancel = job.cancel_flag();
    let interrupt = tokio::spawn(cancel_on_interrupt(cancel));
    let progress = if args.quiet {
        None
    } else {
        Some(tokio::spawn(track_progress(job.watcher())))
    };

    let report = job.run().await;
    interrupt.abort();
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    match report.status() {
        JobStatus::Completed => Ok(report),
        JobStatus::Cancelled => bail!(
            "Conversion cancelled after {} rows; committed rows were kept in '{}'",
            report.rows,
            report.table_name
        ),
        _ => Err(anyhow!(
            "Conversion failed: {}",
            report
                .progress
                .error
                .clone()
                .unwrap_or_else(|| report.progress.message.clone())
        )),
    }
}

async fn cancel_on_interrupt(cancel: CancelFlag) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("interrupt received, cancelling after the current batch");
        cancel.cancel();
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Drive progress bars from the job's snapshots until it finishes
async fn track_progress(mut watcher: ProgressWatcher) {
    let multi_progress = MultiProgress::new();

    let bytes_bar = multi_progress.add(ProgressBar::new(0));
    bytes_bar.set_style(bar_style(
        "[{elapsed_precise}] Bytes: [{bar:30.yellow/blue}] {bytes}/{total_bytes} ({percent}%) | {bytes_per_sec}",
    ));
    let rows_bar = multi_progress.add(ProgressBar::new_spinner());
    rows_bar.set_style(bar_style("[{elapsed_precise}] Rows:  {human_pos} | {msg}"));

    while let Some(snapshot) = watcher.changed().await {
        bytes_bar.set_length(snapshot.total_bytes);
        bytes_bar.set_position(snapshot.bytes_processed);
        rows_bar.set_position(snapshot.rows_processed);
        rows_bar.set_message(format!(
            "{} | {} warnings",
            snapshot.status, snapshot.warnings
        ));
        if snapshot.status.is_terminal() {
            break;
        }
    }

    bytes_bar.finish();
    match watcher.report() {
        Some(report) => {
            let latency = report.batch_latency;
            if let (Some(p50), Some(p90), Some(p99)) = (latency.p50_ms, latency.p90_ms, latency.p99_ms)
            {
                rows_bar.finish_with_message(format!(
                    "{} | batch p50: {}ms, p90: {}ms, p99: {}ms",
                    report.status(),
                    p50,
                    p90,
                    p99
                ));
            } else {
                rows_bar.finish_with_message(report.status().to_string());
            }
        }
        None => rows_bar.finish(),
    }
}

/// Read a source's field list and return the table it would produce,
/// without converting anything
pub fn describe_schema(
    source_uri: &str,
    format: Option<&str>,
    table: &str,
) -> Result<(SchemaReport, WarningLog)> {
    let (path, format) = resolve_source(source_uri, format)?;
    let source = open_source(&path, format)
        .with_context(|| format!("Failed to read schema from {}", path.display()))?;

    let mut warnings = WarningLog::default();
    let mappings = FieldTypeMapper::map_schema(source.fields(), &mut warnings);
    Ok((
        SchemaReport::from_mappings(&sanitize_table_name(table), &mappings),
        warnings,
    ))
}

/// Sample the leading `records` of a source (100 by default) and report the
/// mapped schema with per-column statistics
pub fn preview_schema(
    source_uri: &str,
    format: Option<&str>,
    table: &str,
    records: Option<usize>,
) -> Result<DataPreview> {
    let (path, format) = resolve_source(source_uri, format)?;
    let mut source = open_source(&path, format)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let preview = preview_source(
        source.as_mut(),
        &sanitize_table_name(table),
        records.unwrap_or(DEFAULT_PREVIEW_RECORDS),
    )
    .with_context(|| format!("Failed to sample {}", path.display()))?;
    Ok(preview)
}

/// Fields of the sample container written by `write_demo`
fn demo_fields() -> Vec<SourceField> {
    vec![
        SourceField::new("id", SourceType::Int64, 0).with_nullable(false),
        SourceField::new("name", SourceType::String, 1).with_size(20),
        SourceField::new("amount", SourceType::FixedDecimal, 2).with_scale(2),
        SourceField::new("ratio", SourceType::Double, 3),
        SourceField::new("active", SourceType::Bool, 4),
        SourceField::new("created", SourceType::DateTime, 5),
        SourceField::new("notes", SourceType::VWString, 6),
    ]
}

/// Write a sample container file with `records` deterministic rows.
/// Returns the number of bytes written.
pub fn write_demo(path: &Path, records: u64) -> Result<u64> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = ContainerWriter::new(BufWriter::new(file), demo_fields(), Some(records))?;

    let base = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| anyhow!("invalid demo base date"))?;

    for i in 0..records {
        let n = i as i64;
        let notes = if i % 7 == 0 {
            FieldValue::Null
        } else {
            FieldValue::Text(format!("note {i}: ünïcödé"))
        };
        writer.write_record(&[
            FieldValue::Int(n),
            FieldValue::Text(format!("item {i}")),
            FieldValue::Decimal {
                unscaled: n * 125 % 100_000,
                scale: 2,
            },
            if i % 11 == 0 {
                FieldValue::Null
            } else {
                FieldValue::Double(n as f64 / 3.0)
            },
            FieldValue::Bool(i % 2 == 0),
            FieldValue::DateTime(base + chrono::Duration::minutes(n)),
            notes,
        ])?;
    }

    let written = writer.position();
    writer.flush()?;
    Ok(written)
}
