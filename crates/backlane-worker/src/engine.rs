//! Job engine: intake queue, bounded dispatch, recovery, and the scheduler
//! poller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use backlane_core::config::engine::EngineConfig;
use backlane_core::error::AppError;
use backlane_core::result::AppResult;
use backlane_entity::{EnqueueOptions, Job, JobStatus, NewJob};
use backlane_storage::JobStorage;

use crate::builder::EngineBuilder;
use crate::error::JobError;
use crate::handler::{JobHandler, payload_type_of};
use crate::processor::JobProcessor;
use crate::registry::HandlerRegistry;

/// Background job engine.
///
/// Jobs are persisted on enqueue and their ids pushed onto an unbounded
/// in-memory intake queue. [`JobEngine::run`] drains that queue, running
/// at most `max_degree_of_parallelism` jobs at a time.
#[derive(Debug)]
pub struct JobEngine {
    storage: Arc<dyn JobStorage>,
    processor: Arc<JobProcessor>,
    config: EngineConfig,
    intake_tx: mpsc::UnboundedSender<Uuid>,
    intake_rx: Mutex<Option<mpsc::UnboundedReceiver<Uuid>>>,
}

impl JobEngine {
    /// Start configuring an engine backed by `storage`.
    pub fn builder(storage: Arc<dyn JobStorage>) -> EngineBuilder {
        EngineBuilder::new(storage)
    }

    pub(crate) fn new(
        storage: Arc<dyn JobStorage>,
        processor: JobProcessor,
        config: EngineConfig,
    ) -> Self {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        Self {
            storage,
            processor: Arc::new(processor),
            config,
            intake_tx,
            intake_rx: Mutex::new(Some(intake_rx)),
        }
    }

    /// Installed middleware, outermost first.
    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.processor.middleware_names()
    }

    /// Handlers known to this engine.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        self.processor.registry()
    }

    /// Persist a job for handler `H` and queue it for execution.
    ///
    /// A job scheduled in the future is stored as `Scheduled` and left for
    /// the poller. Fails with [`JobError::Configuration`] if `H` is not
    /// registered on this engine.
    pub async fn enqueue<H: JobHandler>(
        &self,
        payload: H::Payload,
        options: EnqueueOptions,
    ) -> Result<Uuid, JobError> {
        let handler_type = H::handler_type();
        let payload_type = payload_type_of::<H>();

        let binding = self.registry().resolve(handler_type).map_err(|_| {
            JobError::Configuration(format!("No handler registered for '{handler_type}'"))
        })?;
        if binding.payload_type() != payload_type {
            return Err(JobError::Configuration(format!(
                "Handler '{handler_type}' is registered for payload '{}', not '{payload_type}'",
                binding.payload_type()
            )));
        }

        let payload = serde_json::to_value(&payload).map_err(JobError::PayloadEncode)?;
        let job = Job::create(
            NewJob {
                handler_type: handler_type.to_string(),
                payload_type: payload_type.to_string(),
                payload,
                queue_name: options
                    .queue_name
                    .unwrap_or_else(|| self.config.default_queue.clone()),
                scheduled_at: options.scheduled_at,
            },
            Utc::now(),
        );

        self.storage.store_job(&job).await?;

        if job.status == JobStatus::Queued {
            self.push(job.id);
        }

        debug!(
            job_id = %job.id,
            handler_type,
            status = %job.status,
            scheduled_at = ?job.scheduled_at,
            "Enqueued job"
        );
        Ok(job.id)
    }

    /// Read a job straight from storage.
    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>, JobError> {
        Ok(self.storage.get_job(id).await?)
    }

    fn push(&self, id: Uuid) {
        if self.intake_tx.send(id).is_err() {
            warn!(job_id = %id, "Intake queue is closed, job will be recovered on next start");
        }
    }

    /// Run the engine until `cancel` fires, then wait for in-flight jobs.
    ///
    /// May be called once per engine.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), JobError> {
        let mut intake = self
            .intake_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| JobError::Configuration("Job engine has already been run".into()))?;

        info!(
            max_degree_of_parallelism = self.config.max_degree_of_parallelism,
            polling_batch_size = self.config.polling_batch_size,
            poll_interval_ms = self.config.poll_interval_ms,
            storage = self.storage.provider_type(),
            middlewares = ?self.processor.middleware_names(),
            "Job engine starting"
        );

        self.recover().await;

        let poller_cancel = cancel.child_token();
        let poller = SchedulePoller {
            storage: Arc::clone(&self.storage),
            intake: self.intake_tx.clone(),
            batch_size: self.config.polling_batch_size,
            interval: self.config.poll_interval(),
            retention: self.config.completed_retention(),
        };
        let poller_handle = tokio::spawn(poller.run(poller_cancel.clone()));

        let semaphore = Arc::new(Semaphore::new(self.config.max_degree_of_parallelism));
        let in_flight: Arc<DashSet<Uuid>> = Arc::new(DashSet::new());
        let mut workers = JoinSet::new();

        loop {
            let id = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = intake.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };

            if !in_flight.insert(id) {
                debug!(job_id = %id, "Job is already in flight, dropping duplicate id");
                continue;
            }
            let guard = InFlightGuard {
                ids: Arc::clone(&in_flight),
                id,
            };

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            while let Some(finished) = workers.try_join_next() {
                log_worker_exit(finished);
            }

            let storage = Arc::clone(&self.storage);
            let processor = Arc::clone(&self.processor);
            let worker_cancel = cancel.clone();
            workers.spawn(
                async move {
                    let _permit = permit;
                    let _guard = guard;
                    execute_job(storage, processor, id, worker_cancel).await;
                }
                .instrument(info_span!("job", job_id = %id)),
            );
        }

        poller_cancel.cancel();
        if let Err(e) = poller_handle.await {
            error!(error = %e, "Scheduler poller task failed");
        }

        info!(in_flight = workers.len(), "Job engine draining in-flight jobs");
        while let Some(finished) = workers.join_next().await {
            log_worker_exit(finished);
        }

        info!("Job engine stopped");
        Ok(())
    }

    /// Spawn [`Self::run`] in the background.
    pub fn start(self: Arc<Self>) -> EngineHandle {
        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();
        let handle = tokio::spawn(async move { self.run(token).await });

        EngineHandle {
            handle,
            cancellation_token,
        }
    }

    /// Queue jobs left `Queued`, `Running`, or `Retrying` by a previous run.
    async fn recover(&self) {
        match self
            .storage
            .get_running_jobs(self.config.polling_batch_size)
            .await
        {
            Ok(jobs) => {
                let count = jobs.len();
                for job in jobs {
                    self.push(job.id);
                }
                if count > 0 {
                    info!(count, "Recovered unfinished jobs");
                }
            }
            Err(e) => error!(error = %e, "Recovery pass failed, continuing startup"),
        }
    }
}

/// Load, process, and log one dispatched job.
async fn execute_job(
    storage: Arc<dyn JobStorage>,
    processor: Arc<JobProcessor>,
    id: Uuid,
    cancel: CancellationToken,
) {
    let mut job = match storage.get_job(id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            warn!("Dispatched job no longer exists in storage");
            return;
        }
        Err(e) => {
            error!(error = %e, "Failed to load dispatched job");
            return;
        }
    };

    if job.status.is_terminal() || job.status == JobStatus::Scheduled {
        debug!(status = %job.status, "Skipping job that is not ready to run");
        return;
    }

    match processor.process(&mut job, &cancel).await {
        Ok(()) => debug!(status = %job.status, "Job processing finished"),
        Err(e) if e.is_cancellation() => info!("Job interrupted by shutdown"),
        Err(e) => debug!(status = %job.status, error = %e, "Job processing ended with error"),
    }
}

fn log_worker_exit(result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Job worker task panicked");
    }
}

/// Removes a job id from the in-flight set when its worker ends.
struct InFlightGuard {
    ids: Arc<DashSet<Uuid>>,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids.remove(&self.id);
    }
}

/// Promotes due scheduled jobs and optionally purges finished ones.
struct SchedulePoller {
    storage: Arc<dyn JobStorage>,
    intake: mpsc::UnboundedSender<Uuid>,
    batch_size: usize,
    interval: Duration,
    retention: Option<Duration>,
}

impl SchedulePoller {
    async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Scheduler poller tick failed");
            }
        }

        debug!("Scheduler poller stopped");
    }

    async fn tick(&self) -> AppResult<()> {
        let now = Utc::now();
        let due = self
            .storage
            .get_pending_scheduled_jobs(now, self.batch_size)
            .await?;

        for mut job in due {
            job.promote();
            if let Err(e) = self.storage.update_job(&job).await {
                error!(job_id = %job.id, error = %e, "Failed to promote scheduled job");
                continue;
            }
            if self.intake.send(job.id).is_err() {
                warn!(job_id = %job.id, "Intake queue is closed, promoted job left queued");
            }
            debug!(job_id = %job.id, "Promoted scheduled job");
        }

        if let Some(retention) = self.retention {
            let retention = chrono::Duration::from_std(retention)
                .map_err(|e| AppError::configuration(format!("Invalid retention: {e}")))?;
            if let Some(cutoff) = now.checked_sub_signed(retention) {
                let removed = self.storage.delete_old_jobs(cutoff).await?;
                if removed > 0 {
                    info!(removed, "Purged finished jobs past retention");
                }
            }
        }

        Ok(())
    }
}

/// Handle to an engine started with [`JobEngine::start`].
#[derive(Debug)]
pub struct EngineHandle {
    handle: JoinHandle<Result<(), JobError>>,
    cancellation_token: CancellationToken,
}

impl EngineHandle {
    /// Stop accepting work and wait for in-flight jobs to finish.
    pub async fn shutdown(self) -> Result<(), JobError> {
        info!("Job engine shutdown requested");
        self.cancellation_token.cancel();
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(JobError::Execution(Box::new(e))),
        }
    }
}
