//! Conversion jobs: pipeline, progress, registry and orchestration

pub mod job;
pub mod job_store;
pub mod pipeline;
pub mod progress;
pub mod service;

pub use job::{ConversionJob, ConversionReport, ConvertOptions, ConvertOptionsBuilder};
pub use job_store::{InMemoryJobStore, JobStore};
pub use progress::{CancelFlag, ConversionProgress, JobStatus, ProgressWatcher};
pub use service::ConversionService;
