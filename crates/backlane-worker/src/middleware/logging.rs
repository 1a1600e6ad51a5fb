//! Attempt logging.

use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use backlane_entity::Job;

use super::{JobMiddleware, Next};
use crate::error::JobError;

/// Logs the start, duration, and outcome of each attempt. Never alters the
/// job and always calls through.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl JobMiddleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(
        &self,
        job: &mut Job,
        next: Next<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let started = Instant::now();
        info!(
            job_id = %job.id,
            handler_type = %job.handler_type,
            queue = %job.queue_name,
            attempt = job.retry_count + 1,
            "Starting job"
        );

        let result = next.run(job, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => info!(job_id = %job.id, elapsed_ms, "Job succeeded"),
            Err(e) if e.is_cancellation() => {
                warn!(job_id = %job.id, elapsed_ms, "Job cancelled before completion")
            }
            Err(e) => error!(job_id = %job.id, elapsed_ms, error = %e, "Job failed"),
        }

        result
    }
}
