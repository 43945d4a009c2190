use serde::Serialize;

use crate::config::LATENCY_SAMPLE_LIMIT;

/// Events emitted by the writer loop as a conversion advances
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// A batch was committed to the destination
    BatchCommitted {
        rows: u64,
        bytes_processed: u64,
        duration_ms: u64,
    },
    /// Indexes were built after the last batch
    IndexesCreated { count: usize, duration_ms: u64 },
}

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub batches_committed: u64,
    pub rows_written: u64,
    pub bytes_processed: u64,
    pub indexes_created: usize,
    pub index_duration_ms: u64,
    /// Every `sample_stride`-th batch duration, at most `LATENCY_SAMPLE_LIMIT`
    batch_durations_ms: Vec<u64>,
    sample_stride: u64,
}

/// Batch commit latency percentiles in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub p50_ms: Option<u64>,
    pub p90_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::BatchCommitted {
                rows,
                bytes_processed,
                duration_ms,
            } => {
                self.record_duration(*duration_ms);
                self.batches_committed += 1;
                self.rows_written += rows;
                // Source position, not a delta
                self.bytes_processed = self.bytes_processed.max(*bytes_processed);
            }
            TelemetryEvent::IndexesCreated { count, duration_ms } => {
                self.indexes_created += count;
                self.index_duration_ms += duration_ms;
            }
        }
    }

    /// Keep a systematic sample: when full, drop every other sample and
    /// double the stride, so memory stays flat on long conversions
    fn record_duration(&mut self, duration_ms: u64) {
        let stride = self.sample_stride.max(1);
        if self.batches_committed % stride != 0 {
            return;
        }
        self.batch_durations_ms.push(duration_ms);

        if self.batch_durations_ms.len() >= LATENCY_SAMPLE_LIMIT {
            let mut position = 0;
            self.batch_durations_ms.retain(|_| {
                position += 1;
                position % 2 == 1
            });
            self.sample_stride = stride * 2;
        }
    }

    /// Calculate percentile from sampled batch durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.batch_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.batch_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> LatencySummary {
        LatencySummary {
            p50_ms: self.percentile(50.0),
            p90_ms: self.percentile(90.0),
            p99_ms: self.percentile(99.0),
        }
    }
}
