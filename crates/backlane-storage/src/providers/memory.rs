//! In-memory job storage backed by a concurrent map.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;
use uuid::Uuid;

use backlane_core::error::AppError;
use backlane_core::result::AppResult;
use backlane_entity::{Job, JobStatus};

use crate::traits::{JobStorage, is_expired};

/// Process-local job storage.
///
/// Cloning shares the underlying map, which lets tests hand the same
/// records to a second engine to simulate a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStorage {
    jobs: Arc<DashMap<Uuid, Job>>,
}

impl MemoryJobStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the store holds no jobs.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn collect<F>(&self, batch_size: usize, mut filter: F) -> Vec<Job>
    where
        F: FnMut(&Job) -> bool,
    {
        let mut matched: Vec<Job> = self
            .jobs
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matched.sort_by_key(|job| (job.scheduled_at, job.created_at));
        matched.truncate(batch_size);
        matched
    }
}

#[async_trait]
impl JobStorage for MemoryJobStorage {
    fn provider_type(&self) -> &str {
        "memory"
    }

    async fn store_job(&self, job: &Job) -> AppResult<()> {
        match self.jobs.entry(job.id) {
            Entry::Occupied(_) => Err(AppError::conflict(format!(
                "Job {} already exists",
                job.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
                Ok(())
            }
        }
    }

    async fn get_job(&self, id: Uuid) -> AppResult<Option<Job>> {
        Ok(self.jobs.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_job(&self, job: &Job) -> AppResult<()> {
        match self.jobs.get_mut(&job.id) {
            Some(mut entry) => {
                *entry = job.clone();
                Ok(())
            }
            None => Err(AppError::not_found(format!("Job {} not found", job.id))),
        }
    }

    async fn get_running_jobs(&self, batch_size: usize) -> AppResult<Vec<Job>> {
        Ok(self.collect(batch_size, |job| job.status.is_recoverable()))
    }

    async fn get_pending_scheduled_jobs(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> AppResult<Vec<Job>> {
        Ok(self.collect(batch_size, |job| {
            job.status == JobStatus::Scheduled && job.is_due(now)
        }))
    }

    async fn delete_old_jobs(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let mut removed = 0u64;
        self.jobs.retain(|_, job| {
            let expired = is_expired(job, older_than);
            if expired {
                removed += 1;
            }
            !expired
        });

        debug!(removed, "Purged finished jobs from memory");
        Ok(removed)
    }
}
