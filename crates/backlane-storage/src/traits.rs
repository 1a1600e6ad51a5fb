//! Job storage trait for pluggable persistence backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use backlane_core::result::AppResult;
use backlane_entity::{Job, JobStatus};

/// Durable record of job metadata.
///
/// The engine applies no locking around these calls: the dispatch loop, the
/// scheduler poller and every running worker may call into the same
/// provider concurrently, so implementations must be safe for that.
#[async_trait]
pub trait JobStorage: Send + Sync + std::fmt::Debug + 'static {
    /// Return the provider type name (e.g., "memory", "json").
    fn provider_type(&self) -> &str;

    /// Persist a new job. Fails with `Conflict` if the id already exists.
    async fn store_job(&self, job: &Job) -> AppResult<()>;

    /// Fetch a job by id.
    async fn get_job(&self, id: Uuid) -> AppResult<Option<Job>>;

    /// Overwrite the mutable fields of an existing job.
    async fn update_job(&self, job: &Job) -> AppResult<()>;

    /// Set status and error of an existing job.
    ///
    /// Entering a terminal status stamps `completed_at`; any other status
    /// clears it. `Succeeded` clears `last_error`.
    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> AppResult<()> {
        let mut job = self
            .get_job(id)
            .await?
            .ok_or_else(|| backlane_core::AppError::not_found(format!("Job {id} not found")))?;

        let now = Utc::now();
        match status {
            JobStatus::Succeeded => job.mark_succeeded(now),
            JobStatus::Failed => {
                let error = error.or_else(|| job.last_error.clone()).unwrap_or_default();
                job.mark_failed(error, now);
            }
            other => {
                job.status = other;
                job.completed_at = None;
                if error.is_some() {
                    job.last_error = error;
                }
            }
        }

        self.update_job(&job).await
    }

    /// Up to `batch_size` jobs that must be re-dispatched after a restart
    /// (`Queued`, `Running`, or `Retrying`), oldest first.
    async fn get_running_jobs(&self, batch_size: usize) -> AppResult<Vec<Job>>;

    /// Up to `batch_size` `Scheduled` jobs whose `scheduled_at <= now`,
    /// earliest first.
    async fn get_pending_scheduled_jobs(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> AppResult<Vec<Job>>;

    /// Remove finished jobs completed before `older_than`.
    async fn delete_old_jobs(&self, older_than: DateTime<Utc>) -> AppResult<u64>;
}

/// Whether a finished job falls outside the retention window.
pub(crate) fn is_expired(job: &Job, older_than: DateTime<Utc>) -> bool {
    job.status.is_terminal() && job.completed_at.is_some_and(|at| at < older_than)
}
