//! Per-attempt timeout and in-place retry with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use backlane_core::config::resilience::ResilienceConfig;
use backlane_entity::Job;
use backlane_storage::JobStorage;

use super::{JobMiddleware, Next, with_retry_pending};
use crate::error::JobError;

/// Timeout and retry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Window allowed for each attempt.
    pub timeout: Duration,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on a single delay before jitter.
    pub max_delay: Duration,
    /// Scale each delay by a random factor in `[0.8, 1.2]`.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Build a policy from configuration.
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts(),
            timeout: config.timeout(),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.use_jitter,
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if self.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.8..=1.2))
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }
}

/// Retries failed attempts in place, persisting `Retrying` between them.
///
/// Must be the outermost middleware so its writes land after the status
/// middleware's. Every attempt but the last runs with
/// [`retry_pending`](super::retry_pending) set, so inner middleware never
/// persists `Failed` for a failure that will be retried.
#[derive(Debug, Clone)]
pub struct ResilienceMiddleware {
    storage: Arc<dyn JobStorage>,
    policy: RetryPolicy,
}

impl ResilienceMiddleware {
    /// Create a resilience middleware with `policy`.
    pub fn new(storage: Arc<dyn JobStorage>, policy: RetryPolicy) -> Self {
        Self { storage, policy }
    }

    async fn finalize_failure(&self, job: &mut Job, err: &JobError) {
        if job.status.is_terminal() {
            return;
        }
        job.mark_failed(err.to_string(), Utc::now());
        if let Err(store_err) = self.storage.update_job(job).await {
            error!(job_id = %job.id, error = %store_err, "Failed to persist job failure");
        }
    }
}

#[async_trait]
impl JobMiddleware for ResilienceMiddleware {
    fn name(&self) -> &'static str {
        "resilience"
    }

    async fn handle(
        &self,
        job: &mut Job,
        next: Next<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let mut attempt = 1u32;

        loop {
            let pending = attempt < self.policy.max_attempts;
            let outcome = tokio::time::timeout(
                self.policy.timeout,
                with_retry_pending(pending, next.run(job, cancel)),
            )
            .await;
            let err = match outcome {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => e,
                Err(_) => JobError::Timeout {
                    timeout: self.policy.timeout,
                },
            };

            if err.is_cancellation() {
                return Err(err);
            }
            if !err.is_retryable() || attempt >= self.policy.max_attempts {
                self.finalize_failure(job, &err).await;
                return Err(err);
            }

            job.mark_retrying(err.to_string());
            self.storage.update_job(job).await?;

            let delay = self.policy.backoff(attempt);
            warn!(
                job_id = %job.id,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Job attempt failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
