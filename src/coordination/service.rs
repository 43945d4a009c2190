//! Job orchestration: submit, poll, cancel, wait and delete conversions.
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::job::{ConversionJob, ConversionReport, ConvertOptions};
use super::job_store::{
    Claim, DestinationClaim, InMemoryJobStore, JobHandle, JobStore, destination_key,
};
use super::progress::ConversionProgress;
use crate::config::DEFAULT_MAX_CONCURRENT_JOBS;
use crate::db::DestinationStore;
use crate::error::ConversionError;
use crate::mapping::{SchemaReport, sanitize_table_name};

/// Runs conversions in the background, at most `max_concurrent` at a time.
/// Jobs waiting for a slot report `queued`.
pub struct ConversionService {
    jobs: Arc<dyn JobStore>,
    permits: Arc<Semaphore>,
}

impl Default for ConversionService {
    fn default() -> Self {
        Self::new(
            Arc::new(InMemoryJobStore::new()),
            DEFAULT_MAX_CONCURRENT_JOBS,
        )
    }
}

impl ConversionService {
    pub fn new(jobs: Arc<dyn JobStore>, max_concurrent: usize) -> Self {
        Self {
            jobs,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Queue a conversion and return its job id
    pub async fn submit(
        &self,
        options: ConvertOptions,
        store: Arc<dyn DestinationStore>,
    ) -> Result<String, ConversionError> {
        let job_id = new_job_id();
        let table_name = sanitize_table_name(&options.table_name);
        let destination = destination_key(&store.location(), &table_name);

        if let Claim::HeldBy(holder) = self
            .jobs
            .try_claim_destination(&destination, &job_id)
            .await
        {
            return Err(ConversionError::DestinationBusy {
                destination: table_name,
                job_id: holder,
            });
        }

        let claim = DestinationClaim::new(self.jobs.clone(), destination.clone(), job_id.clone());
        let job = ConversionJob::new(job_id.clone(), options, store).with_claim(claim);
        self.jobs
            .insert(JobHandle {
                id: job_id.clone(),
                destination: destination.clone(),
                watcher: job.watcher(),
                cancel: job.cancel_flag(),
            })
            .await;

        let permits = self.permits.clone();
        let jobs = self.jobs.clone();
        let task_job_id = job_id.clone();
        tokio::spawn(async move {
            // A closed semaphore only happens on shutdown; run anyway
            let _permit = permits.acquire_owned().await.ok();
            debug!(job_id = %task_job_id, "job started");
            // The job releases its claim when it finishes; a panic skips that
            if let Err(e) = tokio::spawn(job.run()).await {
                error!(job_id = %task_job_id, "job task aborted: {}", e);
                jobs.release_destination(&destination, &task_job_id).await;
            }
        });

        info!(job_id = %job_id, table = %table_name, "job submitted");
        Ok(job_id)
    }

    pub async fn status(&self, job_id: &str) -> Option<ConversionProgress> {
        Some(self.jobs.get(job_id).await?.watcher.snapshot())
    }

    /// Destination schema, once the job has read it
    pub async fn schema(&self, job_id: &str) -> Option<SchemaReport> {
        self.jobs.get(job_id).await?.watcher.schema()
    }

    /// Request cancellation. Returns false for unknown or finished jobs.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let Some(handle) = self.jobs.get(job_id).await else {
            return false;
        };
        if handle.watcher.snapshot().status.is_terminal() {
            return false;
        }
        handle.cancel.cancel();
        info!(job_id, "cancellation requested");
        true
    }

    /// Wait for a job to finish and return its report
    pub async fn wait(&self, job_id: &str) -> Option<Arc<ConversionReport>> {
        let mut watcher = self.jobs.get(job_id).await?.watcher;
        watcher.wait_for_report().await
    }

    /// Forget a job, cancelling it first if it is still running. The
    /// destination table is left as is.
    pub async fn delete(&self, job_id: &str) -> bool {
        let Some(handle) = self.jobs.delete(job_id).await else {
            return false;
        };
        if !handle.watcher.snapshot().status.is_terminal() {
            handle.cancel.cancel();
        }
        info!(job_id, "job deleted");
        true
    }

    /// All known jobs with their latest progress, oldest first
    pub async fn list(&self) -> Vec<(String, ConversionProgress)> {
        self.jobs
            .list()
            .await
            .into_iter()
            .map(|handle| (handle.id, handle.watcher.snapshot()))
            .collect()
    }
}

/// Short random job id
fn new_job_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}
