//! Persists lifecycle transitions around each attempt.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use backlane_entity::Job;
use backlane_storage::JobStorage;

use super::{JobMiddleware, Next, retry_pending};
use crate::error::JobError;

/// Writes `Running` before the attempt and the outcome after it.
///
/// A retryable failure while an outer retry is pending (see
/// [`retry_pending`]) only records `last_error` in memory; the resilience
/// middleware persists `Retrying` or the final outcome. A cancelled attempt
/// is left `Running` so the next start recovers it.
#[derive(Debug, Clone)]
pub struct StatusMiddleware {
    storage: Arc<dyn JobStorage>,
}

impl StatusMiddleware {
    /// Create a status middleware writing through `storage`.
    pub fn new(storage: Arc<dyn JobStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl JobMiddleware for StatusMiddleware {
    fn name(&self) -> &'static str {
        "status"
    }

    async fn handle(
        &self,
        job: &mut Job,
        next: Next<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        job.mark_running();
        self.storage.update_job(job).await?;

        let err = match next.run(job, cancel).await {
            Ok(()) => {
                job.mark_succeeded(Utc::now());
                self.storage.update_job(job).await?;
                return Ok(());
            }
            Err(e) if e.is_cancellation() => {
                debug!(job_id = %job.id, "Leaving cancelled job in running state");
                return Err(e);
            }
            Err(e) => e,
        };

        if err.is_retryable() && retry_pending() {
            job.last_error = Some(err.to_string());
            return Err(err);
        }

        job.mark_failed(err.to_string(), Utc::now());

        if let Err(store_err) = self.storage.update_job(job).await {
            error!(
                job_id = %job.id,
                error = %store_err,
                "Failed to persist job failure"
            );
        }

        Err(err)
    }
}
