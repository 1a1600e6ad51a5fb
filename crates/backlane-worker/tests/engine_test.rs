//! End-to-end tests for the job engine.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use backlane_core::config::engine::EngineConfig;
use backlane_entity::{EnqueueOptions, Job, JobStatus, NewJob};
use backlane_storage::JobStorage;
use backlane_storage::providers::{JsonFileJobStorage, MemoryJobStorage};
use backlane_worker::handler::payload_type_of;
use backlane_worker::{JobEngine, JobError, JobHandler, RetryPolicy};

use helpers::*;

#[tokio::test]
async fn test_enqueued_job_succeeds() {
    let handler = SendEmailHandler::default();
    let engine = Arc::new(
        JobEngine::builder(Arc::new(MemoryJobStorage::new()))
            .config(fast_config(2))
            .handler(handler.clone())
            .build()
            .unwrap(),
    );
    let running = Arc::clone(&engine).start();

    let id = engine
        .enqueue::<SendEmailHandler>(
            EmailPayload {
                email: "a@b.com".into(),
            },
            EnqueueOptions::now(),
        )
        .await
        .unwrap();

    let job = wait_for_terminal(&engine, id).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.completed_at.is_some());
    assert!(job.last_error.is_none());
    assert_eq!(job.queue_name, "default");
    assert_eq!(job.payload, serde_json::json!({"email": "a@b.com"}));
    assert_eq!(*handler.sent.lock().unwrap(), vec!["a@b.com".to_string()]);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_scheduled_job_waits_for_its_time() {
    let handler = SendEmailHandler::default();
    let engine = Arc::new(
        JobEngine::builder(Arc::new(MemoryJobStorage::new()))
            .config(fast_config(2))
            .handler(handler.clone())
            .build()
            .unwrap(),
    );
    let running = Arc::clone(&engine).start();

    let options = EnqueueOptions::delay(Duration::from_millis(300)).queue("mail");
    let due_at = options.scheduled_at.unwrap();
    let id = engine
        .enqueue::<SendEmailHandler>(
            EmailPayload {
                email: "later@b.com".into(),
            },
            options,
        )
        .await
        .unwrap();

    let pending = engine.get_job(id).await.unwrap().unwrap();
    assert_eq!(pending.status, JobStatus::Scheduled);
    assert_eq!(pending.scheduled_at, Some(due_at));
    assert_eq!(pending.queue_name, "mail");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        engine.get_job(id).await.unwrap().unwrap().status,
        JobStatus::Scheduled
    );
    assert!(handler.sent.lock().unwrap().is_empty());

    let job = wait_for_terminal(&engine, id).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.scheduled_at.is_none());
    assert!(job.completed_at.unwrap() >= due_at);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let probe = ProbeHandler::default();
    let engine = Arc::new(
        JobEngine::builder(Arc::new(MemoryJobStorage::new()))
            .config(fast_config(2))
            .handler(probe.clone())
            .build()
            .unwrap(),
    );
    let running = Arc::clone(&engine).start();

    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(
            engine
                .enqueue::<ProbeHandler>(40, EnqueueOptions::now())
                .await
                .unwrap(),
        );
    }
    for id in ids {
        let job = wait_for_terminal(&engine, id).await;
        assert_eq!(job.status, JobStatus::Succeeded);
    }

    assert_eq!(probe.completed.load(Ordering::SeqCst), 8);
    let peak = probe.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency was {peak}");

    running.shutdown().await.unwrap();
}

fn seeded_job(label: &str, status: JobStatus) -> Job {
    let mut job = Job::create(
        NewJob {
            handler_type: LabelHandler::handler_type().to_string(),
            payload_type: payload_type_of::<LabelHandler>().to_string(),
            payload: serde_json::json!(label),
            queue_name: "default".to_string(),
            scheduled_at: None,
        },
        Utc::now(),
    );
    match status {
        JobStatus::Succeeded => job.mark_succeeded(Utc::now()),
        JobStatus::Running => job.mark_running(),
        JobStatus::Retrying => job.mark_retrying("interrupted during backoff"),
        _ => {}
    }
    job
}

#[tokio::test]
async fn test_recovery_redispatches_unfinished_jobs_once() {
    let storage = Arc::new(MemoryJobStorage::new());
    let running_job = seeded_job("running", JobStatus::Running);
    let queued_job = seeded_job("queued", JobStatus::Queued);
    let retrying_job = seeded_job("retrying", JobStatus::Retrying);
    let done_job = seeded_job("done", JobStatus::Succeeded);
    for job in [&running_job, &queued_job, &retrying_job, &done_job] {
        storage.store_job(job).await.unwrap();
    }

    let handler = LabelHandler::default();
    let engine = Arc::new(
        JobEngine::builder(storage.clone())
            .config(fast_config(4))
            .handler(handler.clone())
            .build()
            .unwrap(),
    );
    let running = Arc::clone(&engine).start();

    for job in [&running_job, &queued_job, &retrying_job] {
        let finished = wait_for_terminal(&engine, job.id).await;
        assert_eq!(finished.status, JobStatus::Succeeded);
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(handler.count("running"), 1);
    assert_eq!(handler.count("queued"), 1);
    assert_eq!(handler.count("retrying"), 1);
    assert_eq!(handler.count("done"), 0);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_job_enqueued_before_start_runs_once() {
    let handler = LabelHandler::default();
    let engine = Arc::new(
        JobEngine::builder(Arc::new(MemoryJobStorage::new()))
            .config(fast_config(2))
            .handler(handler.clone())
            .build()
            .unwrap(),
    );

    let id = engine
        .enqueue::<LabelHandler>("early".to_string(), EnqueueOptions::now())
        .await
        .unwrap();
    let running = Arc::clone(&engine).start();

    wait_for_status(&engine, id, JobStatus::Succeeded).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.count("early"), 1);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unregistered_handler_is_rejected() {
    let storage = Arc::new(MemoryJobStorage::new());
    let engine = JobEngine::builder(storage.clone())
        .handler(SendEmailHandler::default())
        .build()
        .unwrap();

    let err = engine
        .enqueue::<UnregisteredHandler>((), EnqueueOptions::now())
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Configuration(_)));
    assert!(storage.is_empty());
}

#[tokio::test]
async fn test_failing_handler_without_resilience_fails() {
    let handler = FlakyHandler {
        failures: 1,
        ..FlakyHandler::default()
    };
    let engine = Arc::new(
        JobEngine::builder(Arc::new(MemoryJobStorage::new()))
            .config(fast_config(1))
            .handler(handler.clone())
            .build()
            .unwrap(),
    );
    let running = Arc::clone(&engine).start();

    let id = engine
        .enqueue::<FlakyHandler>((), EnqueueOptions::now())
        .await
        .unwrap();
    let job = wait_for_terminal(&engine, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.last_error.as_deref(), Some("attempt 1 failed"));
    assert_eq!(job.retry_count, 0);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resilience_retries_in_place() {
    let handler = FlakyHandler {
        failures: 2,
        ..FlakyHandler::default()
    };
    let engine = Arc::new(
        JobEngine::builder(Arc::new(MemoryJobStorage::new()))
            .config(fast_config(1))
            .handler(handler.clone())
            .retry_policy(RetryPolicy {
                max_attempts: 3,
                timeout: Duration::from_secs(5),
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                jitter: true,
            })
            .build()
            .unwrap(),
    );
    let running = Arc::clone(&engine).start();

    let id = engine
        .enqueue::<FlakyHandler>((), EnqueueOptions::now())
        .await
        .unwrap();
    let job = wait_for_terminal(&engine, id).await;

    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.retry_count, 2);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_jobs() {
    let probe = ProbeHandler::default();
    let engine = Arc::new(
        JobEngine::builder(Arc::new(MemoryJobStorage::new()))
            .config(fast_config(2))
            .handler(probe.clone())
            .build()
            .unwrap(),
    );
    let running = Arc::clone(&engine).start();

    let id = engine
        .enqueue::<ProbeHandler>(200, EnqueueOptions::now())
        .await
        .unwrap();
    wait_for_status(&engine, id, JobStatus::Running).await;

    running.shutdown().await.unwrap();

    let job = engine.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(probe.completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_job_stays_running_for_recovery() {
    let engine = Arc::new(
        JobEngine::builder(Arc::new(MemoryJobStorage::new()))
            .config(fast_config(1))
            .handler(WaitForShutdownHandler)
            .build()
            .unwrap(),
    );
    let running = Arc::clone(&engine).start();

    let id = engine
        .enqueue::<WaitForShutdownHandler>((), EnqueueOptions::now())
        .await
        .unwrap();
    wait_for_status(&engine, id, JobStatus::Running).await;

    running.shutdown().await.unwrap();

    let job = engine.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.completed_at.is_none());
    assert!(job.last_error.is_none());
}

#[tokio::test]
async fn test_engine_runs_only_once() {
    let engine = Arc::new(
        JobEngine::builder(Arc::new(MemoryJobStorage::new()))
            .config(fast_config(1))
            .build()
            .unwrap(),
    );
    let running = Arc::clone(&engine).start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = engine.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, JobError::Configuration(_)));

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restart_recovers_from_json_storage() {
    let tmp = tempfile::tempdir().unwrap();
    let handler = LabelHandler::default();

    let id = {
        let storage = Arc::new(JsonFileJobStorage::new(tmp.path()).await.unwrap());
        let engine = JobEngine::builder(storage)
            .config(fast_config(1))
            .handler(handler.clone())
            .build()
            .unwrap();
        engine
            .enqueue::<LabelHandler>("persisted".to_string(), EnqueueOptions::now())
            .await
            .unwrap()
    };
    assert_eq!(handler.count("persisted"), 0);

    let storage = Arc::new(JsonFileJobStorage::new(tmp.path()).await.unwrap());
    let engine = Arc::new(
        JobEngine::builder(storage)
            .config(fast_config(1))
            .handler(handler.clone())
            .build()
            .unwrap(),
    );
    let running = Arc::clone(&engine).start();

    let job = wait_for_terminal(&engine, id).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(handler.count("persisted"), 1);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retention_purges_finished_jobs() {
    let engine = Arc::new(
        JobEngine::builder(Arc::new(MemoryJobStorage::new()))
            .config(EngineConfig {
                completed_retention_seconds: Some(0),
                ..fast_config(1)
            })
            .handler(SendEmailHandler::default())
            .build()
            .unwrap(),
    );
    let running = Arc::clone(&engine).start();

    let id = engine
        .enqueue::<SendEmailHandler>(
            EmailPayload {
                email: "gone@b.com".into(),
            },
            EnqueueOptions::now(),
        )
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while engine.get_job(id).await.unwrap().is_some() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "finished job was never purged"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_storage_errors_do_not_stall_the_engine() {
    let storage = Arc::new(FaultyStorage {
        fail_recovery: true,
        scheduled_failures: 5,
        ..FaultyStorage::default()
    });
    let handler = SendEmailHandler::default();
    let engine = Arc::new(
        JobEngine::builder(storage.clone())
            .config(fast_config(2))
            .handler(handler.clone())
            .build()
            .unwrap(),
    );

    let later_id = engine
        .enqueue::<SendEmailHandler>(
            EmailPayload {
                email: "later@b.com".into(),
            },
            EnqueueOptions::delay(Duration::from_millis(30)),
        )
        .await
        .unwrap();
    let running = Arc::clone(&engine).start();

    let now_id = engine
        .enqueue::<SendEmailHandler>(
            EmailPayload {
                email: "now@b.com".into(),
            },
            EnqueueOptions::now(),
        )
        .await
        .unwrap();
    let job = wait_for_terminal(&engine, now_id).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(storage.recovery_calls.load(Ordering::SeqCst), 1);

    let job = wait_for_terminal(&engine, later_id).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(storage.scheduled_calls.load(Ordering::SeqCst) > 5);
    assert_eq!(handler.sent.lock().unwrap().len(), 2);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_promotion_does_not_block_the_batch() {
    let storage = Arc::new(FaultyStorage::default());
    let handler = LabelHandler::default();
    let engine = Arc::new(
        JobEngine::builder(storage.clone())
            .config(fast_config(2))
            .handler(handler.clone())
            .build()
            .unwrap(),
    );

    let stuck = engine
        .enqueue::<LabelHandler>(
            "stuck".to_string(),
            EnqueueOptions::delay(Duration::from_millis(30)),
        )
        .await
        .unwrap();
    storage.reject_updates_for(stuck);
    let behind = engine
        .enqueue::<LabelHandler>(
            "behind".to_string(),
            EnqueueOptions::delay(Duration::from_millis(60)),
        )
        .await
        .unwrap();
    let running = Arc::clone(&engine).start();

    let job = wait_for_terminal(&engine, behind).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(handler.count("behind"), 1);

    let stuck = engine.get_job(stuck).await.unwrap().unwrap();
    assert_eq!(stuck.status, JobStatus::Scheduled);
    assert_eq!(handler.count("stuck"), 0);

    running.shutdown().await.unwrap();
}
