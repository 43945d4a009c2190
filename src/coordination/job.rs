//! One conversion, from source file to destination table.

use derive_builder::Builder;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::job_store::DestinationClaim;
use super::pipeline::{BatchLimits, BatchProducer};
use super::progress::{
    CancelFlag, ConversionProgress, JobStatus, ProgressPublisher, ProgressWatcher,
};
use crate::config::{
    DEFAULT_BATCH_BYTES, DEFAULT_BATCH_ROWS, DEFAULT_INDEX_COLUMNS, DEFAULT_PIPELINE_DEPTH,
    DEFAULT_TABLE_NAME, QUERY_TIMEOUT,
};
use crate::db::{ChunkedWriter, DestinationStore, StatusRecord, TableMode};
use crate::error::{ConversionError, WriteError};
use crate::formats::{SourceFormat, open_source};
use crate::mapping::warnings::WarningLog;
use crate::mapping::{
    FieldTypeMapper, SchemaReport, TypeMappingWarning, ValueConverter, sanitize_table_name,
};
use crate::telemetry::{LatencySummary, ProgressStats, TelemetryEvent};

/// Settings for a single conversion
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ConvertOptions {
    pub source: PathBuf,
    /// Detected from the file extension when not set
    #[builder(default)]
    pub format: Option<SourceFormat>,
    #[builder(default = "DEFAULT_TABLE_NAME.to_string()")]
    pub table_name: String,
    #[builder(default = "DEFAULT_BATCH_ROWS")]
    pub batch_rows: usize,
    #[builder(default = "DEFAULT_BATCH_BYTES")]
    pub batch_bytes: usize,
    #[builder(default = "DEFAULT_PIPELINE_DEPTH")]
    pub pipeline_depth: usize,
    #[builder(default = "DEFAULT_INDEX_COLUMNS")]
    pub index_columns: usize,
    #[builder(default)]
    pub table_mode: TableMode,
    #[builder(default = "QUERY_TIMEOUT")]
    pub batch_timeout: Duration,
}

impl ConvertOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.batch_rows == Some(0) {
            return Err("batch_rows must be at least 1".to_string());
        }
        if self.batch_bytes == Some(0) {
            return Err("batch_bytes must be at least 1".to_string());
        }
        if self.pipeline_depth == Some(0) {
            return Err("pipeline_depth must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Outcome of a job, whatever its final status
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub job_id: String,
    pub source: String,
    pub table_name: String,
    pub progress: ConversionProgress,
    pub schema: Option<SchemaReport>,
    pub warnings: Vec<TypeMappingWarning>,
    pub batches: u64,
    pub rows: u64,
    pub bytes: u64,
    pub indexes: Vec<String>,
    pub duration_secs: f64,
    pub batch_latency: LatencySummary,
}

impl ConversionReport {
    pub fn status(&self) -> JobStatus {
        self.progress.status
    }
}

#[derive(Default)]
struct RunState {
    schema: Option<SchemaReport>,
    warnings: WarningLog,
    stats: ProgressStats,
    indexes: Vec<String>,
    table_created: bool,
}

/// Reads a source, maps its schema and writes it into the destination store.
///
/// The job is the only writer of its progress; observers get a
/// `ProgressWatcher`. Cancellation is honored between batches.
pub struct ConversionJob {
    id: String,
    options: ConvertOptions,
    table_name: String,
    store: Arc<dyn DestinationStore>,
    publisher: ProgressPublisher,
    cancel: CancelFlag,
    claim: Option<DestinationClaim>,
}

impl ConversionJob {
    pub fn new(
        id: impl Into<String>,
        options: ConvertOptions,
        store: Arc<dyn DestinationStore>,
    ) -> Self {
        let table_name = sanitize_table_name(&options.table_name);
        Self {
            id: id.into(),
            options,
            table_name,
            store,
            publisher: ProgressPublisher::new(0),
            cancel: CancelFlag::default(),
            claim: None,
        }
    }

    /// Release `claim` once the job has finished, before the report is published
    pub fn with_claim(mut self, claim: DestinationClaim) -> Self {
        self.claim = Some(claim);
        self
    }

    /// Share an existing cancellation flag instead of the job's own
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn watcher(&self) -> ProgressWatcher {
        self.publisher.watcher()
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run to a terminal status and return the report. Failures are reported,
    /// not returned.
    pub async fn run(mut self) -> Arc<ConversionReport> {
        let start_time = Instant::now();
        let mut state = RunState::default();

        info!(
            job_id = %self.id,
            source = %self.options.source.display(),
            table = %self.table_name,
            "starting conversion"
        );

        match self.execute(&mut state).await {
            Ok(()) => {
                info!(
                    job_id = %self.id,
                    rows = state.stats.rows_written,
                    batches = state.stats.batches_committed,
                    "conversion completed"
                );
            }
            Err(e) => {
                match &e {
                    ConversionError::Cancelled => {
                        warn!(job_id = %self.id, rows = state.stats.rows_written, "conversion cancelled")
                    }
                    _ => error!(job_id = %self.id, "conversion failed: {}", e),
                }
                self.publisher.fail(&e);
                // The partial table stays, marked not ready
                if state.table_created {
                    let progress = self.publisher.snapshot();
                    let message = progress.error.clone().or(Some(progress.message.clone()));
                    if let Err(status_err) = self
                        .record_status(progress.status, progress.rows_processed, message)
                        .await
                    {
                        warn!(job_id = %self.id, "failed to record job status: {}", status_err);
                    }
                }
            }
        }

        let progress = self.publisher.snapshot();
        let report = Arc::new(ConversionReport {
            job_id: self.id.clone(),
            source: self.options.source.display().to_string(),
            table_name: self.table_name.clone(),
            rows: state.stats.rows_written,
            bytes: progress.bytes_processed,
            batches: state.stats.batches_committed,
            batch_latency: state.stats.get_percentiles(),
            progress,
            schema: state.schema,
            warnings: state.warnings.into_warnings(),
            indexes: state.indexes,
            duration_secs: start_time.elapsed().as_secs_f64(),
        });

        if let Some(claim) = self.claim.take() {
            claim.release().await;
        }
        self.publisher.publish_report(report.clone());
        report
    }

    async fn execute(&self, state: &mut RunState) -> Result<(), ConversionError> {
        self.check_cancelled()?;
        self.publisher
            .transition(JobStatus::ReadingSchema, "reading schema")?;

        let path = self.options.source.clone();
        let format = match self.options.format {
            Some(format) => format,
            None => SourceFormat::detect_from_path(&path).ok_or_else(|| {
                ConversionError::UnknownFormat {
                    path: path.display().to_string(),
                }
            })?,
        };
        let source = tokio::task::spawn_blocking(move || open_source(&path, format))
            .await
            .map_err(|e| ConversionError::Pipeline(e.to_string()))??;
        let total_bytes = source.total_bytes();
        self.publisher.set_total_bytes(total_bytes);

        let mappings = FieldTypeMapper::map_schema(source.fields(), &mut state.warnings);
        for warning in state.warnings.warnings() {
            warn!(job_id = %self.id, "{}", warning);
        }
        let schema = SchemaReport::from_mappings(&self.table_name, &mappings);
        info!(
            job_id = %self.id,
            format = %format,
            columns = mappings.len(),
            records = ?source.estimated_records(),
            "schema read"
        );
        state.schema = Some(schema.clone());
        self.publisher.publish_schema(schema);

        self.check_cancelled()?;
        let mut writer = ChunkedWriter::new(
            self.store.clone(),
            self.table_name.clone(),
            self.options.table_mode,
        )
        .with_timeout(self.options.batch_timeout);
        writer.create_table(&mappings).await?;
        state.table_created = true;
        self.record_status(JobStatus::Converting, 0, None).await?;
        self.publisher
            .transition(JobStatus::Converting, "converting")?;

        let limits = BatchLimits {
            max_rows: self.options.batch_rows,
            max_bytes: self.options.batch_bytes,
        };
        let producer = BatchProducer::new(
            source,
            ValueConverter::new(mappings),
            limits,
            self.cancel.clone(),
        );
        let (mut batches, reader_task) = producer.spawn(self.options.pipeline_depth);

        while let Some(batch) = batches.recv().await {
            self.check_cancelled()?;
            let batch = batch?;

            let batch_start = Instant::now();
            let rows = writer.write_batch(&batch.rows).await?;
            state.stats.update(&TelemetryEvent::BatchCommitted {
                rows,
                bytes_processed: batch.position,
                duration_ms: batch_start.elapsed().as_millis() as u64,
            });
            state.warnings.absorb(batch.warnings);
            self.publisher.advance(
                writer.rows_committed(),
                batch.position,
                state.warnings.total(),
            );
        }
        reader_task
            .await
            .map_err(|e| ConversionError::Pipeline(e.to_string()))?;
        self.check_cancelled()?;

        let index_start = Instant::now();
        state.indexes = writer.finish(self.options.index_columns).await?;
        state.stats.update(&TelemetryEvent::IndexesCreated {
            count: state.indexes.len(),
            duration_ms: index_start.elapsed().as_millis() as u64,
        });

        let rows = writer.rows_committed();
        self.publisher
            .advance(rows, total_bytes, state.warnings.total());
        self.record_status(JobStatus::Completed, rows, None).await?;
        self.publisher
            .transition(JobStatus::Completed, format!("{rows} rows converted"))?;
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), ConversionError> {
        if self.cancel.is_cancelled() {
            return Err(ConversionError::Cancelled);
        }
        Ok(())
    }

    async fn record_status(
        &self,
        status: JobStatus,
        rows_written: u64,
        message: Option<String>,
    ) -> Result<(), WriteError> {
        self.store
            .record_status(&StatusRecord {
                job_id: self.id.clone(),
                table_name: self.table_name.clone(),
                source: self.options.source.display().to_string(),
                status: status.to_string(),
                ready: status == JobStatus::Completed,
                rows_written,
                message,
            })
            .await
    }
}
