//! Registry of submitted jobs and the destinations they write to.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::progress::{CancelFlag, ProgressWatcher};

/// What the service keeps about a submitted job
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: String,
    /// Store location and table, see `destination_key`
    pub destination: String,
    pub watcher: ProgressWatcher,
    pub cancel: CancelFlag,
}

/// Result of claiming a destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    Acquired,
    /// Another job is writing it
    HeldBy(String),
}

pub fn destination_key(location: &str, table_name: &str) -> String {
    format!("{location}#{table_name}")
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, handle: JobHandle);

    async fn get(&self, job_id: &str) -> Option<JobHandle>;

    /// Remove a job, returning it if it existed
    async fn delete(&self, job_id: &str) -> Option<JobHandle>;

    /// All jobs, oldest first
    async fn list(&self) -> Vec<JobHandle>;

    /// Atomically claim `destination` for `job_id`
    async fn try_claim_destination(&self, destination: &str, job_id: &str) -> Claim;

    /// Release a claim; a no-op unless `job_id` holds it
    async fn release_destination(&self, destination: &str, job_id: &str);
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<String, (u64, JobHandle)>,
    claims: HashMap<String, String>,
    next_seq: u64,
}

/// Process-local job store
#[derive(Default)]
pub struct InMemoryJobStore {
    registry: RwLock<Registry>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, handle: JobHandle) {
        let mut registry = self.registry.write().await;
        let seq = registry.next_seq;
        registry.next_seq += 1;
        registry.jobs.insert(handle.id.clone(), (seq, handle));
    }

    async fn get(&self, job_id: &str) -> Option<JobHandle> {
        let registry = self.registry.read().await;
        registry.jobs.get(job_id).map(|(_, handle)| handle.clone())
    }

    async fn delete(&self, job_id: &str) -> Option<JobHandle> {
        let mut registry = self.registry.write().await;
        registry.jobs.remove(job_id).map(|(_, handle)| handle)
    }

    async fn list(&self) -> Vec<JobHandle> {
        let registry = self.registry.read().await;
        let mut jobs: Vec<&(u64, JobHandle)> = registry.jobs.values().collect();
        jobs.sort_by_key(|(seq, _)| *seq);
        jobs.into_iter().map(|(_, handle)| handle.clone()).collect()
    }

    async fn try_claim_destination(&self, destination: &str, job_id: &str) -> Claim {
        let mut registry = self.registry.write().await;
        if let Some(holder) = registry.claims.get(destination)
            && holder != job_id
        {
            return Claim::HeldBy(holder.clone());
        }
        registry
            .claims
            .insert(destination.to_string(), job_id.to_string());
        Claim::Acquired
    }

    async fn release_destination(&self, destination: &str, job_id: &str) {
        let mut registry = self.registry.write().await;
        if registry.claims.get(destination).is_some_and(|holder| holder == job_id) {
            registry.claims.remove(destination);
        }
    }
}

/// A held destination claim, released when the job finishes
pub struct DestinationClaim {
    jobs: Arc<dyn JobStore>,
    destination: String,
    job_id: String,
}

impl DestinationClaim {
    pub fn new(jobs: Arc<dyn JobStore>, destination: String, job_id: String) -> Self {
        Self {
            jobs,
            destination,
            job_id,
        }
    }

    pub async fn release(self) {
        self.jobs
            .release_destination(&self.destination, &self.job_id)
            .await;
    }
}
