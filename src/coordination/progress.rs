//! Job status, progress snapshots and cancellation.
//!
//! A job publishes through `ProgressPublisher`; any number of
//! `ProgressWatcher`s observe whole snapshots through `tokio::sync::watch`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use super::job::ConversionReport;
use crate::error::ConversionError;
use crate::mapping::SchemaReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    ReadingSchema,
    Converting,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::ReadingSchema => "reading_schema",
            JobStatus::Converting => "converting",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (*self, next),
            (Queued, ReadingSchema)
                | (ReadingSchema, Converting)
                | (Converting, Completed)
                | (Queued | ReadingSchema | Converting, Failed)
                | (Queued | ReadingSchema | Converting, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a job's progress
#[derive(Debug, Clone, Serialize)]
pub struct ConversionProgress {
    pub status: JobStatus,
    pub rows_processed: u64,
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub message: String,
    pub error: Option<String>,
    pub warnings: u64,
    pub error_offset: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversionProgress {
    pub fn new(total_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            status: JobStatus::Queued,
            rows_processed: 0,
            bytes_processed: 0,
            total_bytes,
            message: "queued".to_string(),
            error: None,
            warnings: 0,
            error_offset: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Bytes consumed as a percentage of the source size
    pub fn percentage(&self) -> f64 {
        if self.status == JobStatus::Completed {
            return 100.0;
        }
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.bytes_processed as f64 / self.total_bytes as f64 * 100.0).min(100.0)
    }
}

/// Cooperative cancellation, checked at batch boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Write side of a job's observable state. Owned by the job.
pub struct ProgressPublisher {
    progress: watch::Sender<ConversionProgress>,
    schema: watch::Sender<Option<SchemaReport>>,
    report: watch::Sender<Option<Arc<ConversionReport>>>,
}

impl ProgressPublisher {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            progress: watch::Sender::new(ConversionProgress::new(total_bytes)),
            schema: watch::Sender::new(None),
            report: watch::Sender::new(None),
        }
    }

    pub fn watcher(&self) -> ProgressWatcher {
        ProgressWatcher {
            progress: self.progress.subscribe(),
            schema: self.schema.subscribe(),
            report: self.report.subscribe(),
        }
    }

    pub fn snapshot(&self) -> ConversionProgress {
        self.progress.borrow().clone()
    }

    /// Move to `next`, rejecting transitions the state machine does not allow
    pub fn transition(
        &self,
        next: JobStatus,
        message: impl Into<String>,
    ) -> Result<(), ConversionError> {
        let message = message.into();
        let mut result = Ok(());
        self.progress.send_if_modified(|progress| {
            if !progress.status.can_transition_to(next) {
                result = Err(ConversionError::InvalidTransition {
                    from: progress.status.to_string(),
                    to: next.to_string(),
                });
                return false;
            }
            progress.status = next;
            progress.message = message;
            progress.updated_at = Utc::now();
            true
        });
        result
    }

    pub fn set_total_bytes(&self, total_bytes: u64) {
        self.progress.send_modify(|progress| {
            progress.total_bytes = total_bytes;
            progress.updated_at = Utc::now();
        });
    }

    /// Record committed work. Counters never move backwards.
    pub fn advance(&self, rows: u64, bytes: u64, warnings: u64) {
        self.progress.send_modify(|progress| {
            progress.rows_processed = progress.rows_processed.max(rows);
            progress.bytes_processed = progress.bytes_processed.max(bytes);
            progress.warnings = progress.warnings.max(warnings);
            progress.message = format!("{} rows converted", progress.rows_processed);
            progress.updated_at = Utc::now();
        });
    }

    /// Terminal transition for an error: `cancelled` for a cancellation,
    /// `failed` for anything else
    pub fn fail(&self, error: &ConversionError) {
        let next = match error {
            ConversionError::Cancelled => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        };
        self.progress.send_if_modified(|progress| {
            if !progress.status.can_transition_to(next) {
                return false;
            }
            progress.status = next;
            progress.message = error.to_string();
            if next == JobStatus::Failed {
                progress.error = Some(error.to_string());
                progress.error_offset = error.offset();
            }
            progress.updated_at = Utc::now();
            true
        });
    }

    pub fn publish_schema(&self, schema: SchemaReport) {
        self.schema.send_replace(Some(schema));
    }

    pub fn publish_report(&self, report: Arc<ConversionReport>) {
        self.report.send_replace(Some(report));
    }
}

/// Read side of a job's observable state
#[derive(Debug, Clone)]
pub struct ProgressWatcher {
    progress: watch::Receiver<ConversionProgress>,
    schema: watch::Receiver<Option<SchemaReport>>,
    report: watch::Receiver<Option<Arc<ConversionReport>>>,
}

impl ProgressWatcher {
    pub fn snapshot(&self) -> ConversionProgress {
        self.progress.borrow().clone()
    }

    pub fn schema(&self) -> Option<SchemaReport> {
        self.schema.borrow().clone()
    }

    pub fn report(&self) -> Option<Arc<ConversionReport>> {
        self.report.borrow().clone()
    }

    /// Wait for the next snapshot; `None` once the job is gone
    pub async fn changed(&mut self) -> Option<ConversionProgress> {
        self.progress.changed().await.ok()?;
        Some(self.progress.borrow_and_update().clone())
    }

    /// Wait for the final report; `None` if the job ended without one
    pub async fn wait_for_report(&mut self) -> Option<Arc<ConversionReport>> {
        let report = self.report.wait_for(|report| report.is_some()).await.ok()?;
        report.clone()
    }
}
