//! Shared handlers and polling helpers for engine integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use backlane_core::AppError;
use backlane_core::config::engine::EngineConfig;
use backlane_core::result::AppResult;
use backlane_entity::{Job, JobStatus};
use backlane_storage::JobStorage;
use backlane_storage::providers::MemoryJobStorage;
use backlane_worker::{BoxError, JobEngine, JobHandler};

/// Engine settings with short intervals suitable for tests.
pub fn fast_config(parallelism: usize) -> EngineConfig {
    EngineConfig {
        max_degree_of_parallelism: parallelism,
        polling_batch_size: 100,
        poll_interval_ms: 25,
        ..EngineConfig::default()
    }
}

/// Poll `engine` until the job satisfies `done`, or panic after `limit`.
pub async fn wait_for<F>(engine: &JobEngine, id: Uuid, limit: Duration, done: F) -> Job
where
    F: Fn(&Job) -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if let Some(job) = engine.get_job(id).await.expect("storage read failed") {
            if done(&job) {
                return job;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            let job = engine.get_job(id).await.expect("storage read failed");
            panic!("job {id} did not reach the expected state in {limit:?}: {job:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the job is `Succeeded` or `Failed`.
pub async fn wait_for_terminal(engine: &JobEngine, id: Uuid) -> Job {
    wait_for(engine, id, Duration::from_secs(5), |job| job.status.is_terminal()).await
}

/// Wait until the job has the given status.
pub async fn wait_for_status(engine: &JobEngine, id: Uuid, status: JobStatus) -> Job {
    wait_for(engine, id, Duration::from_secs(5), |job| job.status == status).await
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailPayload {
    pub email: String,
}

/// Records every address it "sends" to.
#[derive(Clone, Default)]
pub struct SendEmailHandler {
    pub sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl JobHandler for SendEmailHandler {
    type Payload = EmailPayload;

    fn handler_type() -> &'static str {
        "send_email"
    }

    async fn execute(&self, payload: EmailPayload, _cancel: CancellationToken) -> Result<(), BoxError> {
        self.sent.lock().unwrap().push(payload.email);
        Ok(())
    }
}

/// Sleeps for the payload's milliseconds while tracking peak concurrency.
#[derive(Clone, Default)]
pub struct ProbeHandler {
    pub current: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub completed: Arc<AtomicUsize>,
}

#[async_trait]
impl JobHandler for ProbeHandler {
    type Payload = u64;

    fn handler_type() -> &'static str {
        "probe"
    }

    async fn execute(&self, millis: u64, _cancel: CancellationToken) -> Result<(), BoxError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records the label of every job it runs.
#[derive(Clone, Default)]
pub struct LabelHandler {
    pub seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl JobHandler for LabelHandler {
    type Payload = String;

    fn handler_type() -> &'static str {
        "label"
    }

    async fn execute(&self, label: String, _cancel: CancellationToken) -> Result<(), BoxError> {
        self.seen.lock().unwrap().push(label);
        Ok(())
    }
}

impl LabelHandler {
    pub fn count(&self, label: &str) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|seen| seen.as_str() == label)
            .count()
    }
}

/// Fails its first `failures` calls.
#[derive(Clone, Default)]
pub struct FlakyHandler {
    pub failures: u32,
    pub calls: Arc<AtomicU32>,
}

#[async_trait]
impl JobHandler for FlakyHandler {
    type Payload = ();

    fn handler_type() -> &'static str {
        "flaky"
    }

    async fn execute(&self, _payload: (), _cancel: CancellationToken) -> Result<(), BoxError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(format!("attempt {call} failed").into());
        }
        Ok(())
    }
}

/// Waits for shutdown, then reports an error.
#[derive(Clone, Default)]
pub struct WaitForShutdownHandler;

#[async_trait]
impl JobHandler for WaitForShutdownHandler {
    type Payload = ();

    fn handler_type() -> &'static str {
        "wait_for_shutdown"
    }

    async fn execute(&self, _payload: (), cancel: CancellationToken) -> Result<(), BoxError> {
        cancel.cancelled().await;
        Err("stopped by shutdown".into())
    }
}

/// Never registered with any engine.
pub struct UnregisteredHandler;

#[async_trait]
impl JobHandler for UnregisteredHandler {
    type Payload = ();

    async fn execute(&self, _payload: (), _cancel: CancellationToken) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Memory storage with injectable read and write failures.
#[derive(Debug, Default)]
pub struct FaultyStorage {
    pub inner: MemoryJobStorage,
    /// Every `get_running_jobs` call fails.
    pub fail_recovery: bool,
    /// Number of leading `get_pending_scheduled_jobs` calls that fail.
    pub scheduled_failures: u32,
    /// Jobs whose `update_job` always fails.
    pub reject_updates: Mutex<HashSet<Uuid>>,
    pub recovery_calls: AtomicU32,
    pub scheduled_calls: AtomicU32,
}

impl FaultyStorage {
    pub fn reject_updates_for(&self, id: Uuid) {
        self.reject_updates.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl JobStorage for FaultyStorage {
    fn provider_type(&self) -> &str {
        "faulty"
    }

    async fn store_job(&self, job: &Job) -> AppResult<()> {
        self.inner.store_job(job).await
    }

    async fn get_job(&self, id: Uuid) -> AppResult<Option<Job>> {
        self.inner.get_job(id).await
    }

    async fn update_job(&self, job: &Job) -> AppResult<()> {
        if self.reject_updates.lock().unwrap().contains(&job.id) {
            return Err(AppError::storage(format!("write rejected for job {}", job.id)));
        }
        self.inner.update_job(job).await
    }

    async fn get_running_jobs(&self, batch_size: usize) -> AppResult<Vec<Job>> {
        self.recovery_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_recovery {
            return Err(AppError::storage("job index unavailable"));
        }
        self.inner.get_running_jobs(batch_size).await
    }

    async fn get_pending_scheduled_jobs(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> AppResult<Vec<Job>> {
        let call = self.scheduled_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.scheduled_failures {
            return Err(AppError::storage(format!("scheduled scan {call} failed")));
        }
        self.inner.get_pending_scheduled_jobs(now, batch_size).await
    }

    async fn delete_old_jobs(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        self.inner.delete_old_jobs(older_than).await
    }
}
