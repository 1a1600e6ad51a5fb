//! Backlane demo host
//!
//! Wires storage and the job engine together, enqueues a couple of demo
//! jobs, and runs until Ctrl-C.

mod jobs;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

use backlane_core::config::AppConfig;
use backlane_core::config::logging::LogFormat;
use backlane_core::error::AppError;
use backlane_entity::EnqueueOptions;
use backlane_storage::StorageManager;
use backlane_worker::JobEngine;

use crate::jobs::{SendWelcomeEmailHandler, WelcomeEmail};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Backlane demo error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from `config/` and the environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("BACKLANE_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        LogFormat::Pretty => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting Backlane demo v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Job storage ──────────────────────────────────────
    let storage = Arc::new(StorageManager::new(&config.storage).await?);

    // ── Step 2: Engine ───────────────────────────────────────────
    let engine = JobEngine::builder(storage)
        .app_config(&config)
        .handler(SendWelcomeEmailHandler)
        .build()
        .map_err(|e| AppError::configuration(e.to_string()))?;
    let engine = Arc::new(engine);
    let handle = Arc::clone(&engine).start();

    // ── Step 3: Demo jobs ────────────────────────────────────────
    let now_id = engine
        .enqueue::<SendWelcomeEmailHandler>(
            WelcomeEmail {
                email: "ada@example.com".to_string(),
                name: "Ada".to_string(),
            },
            EnqueueOptions::now(),
        )
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    let later_id = engine
        .enqueue::<SendWelcomeEmailHandler>(
            WelcomeEmail {
                email: "grace@example.com".to_string(),
                name: "Grace".to_string(),
            },
            EnqueueOptions::delay(Duration::from_secs(10)).queue("email"),
        )
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    tracing::info!(%now_id, %later_id, "Demo jobs enqueued, press Ctrl-C to stop");

    // ── Step 4: Wait for shutdown ────────────────────────────────
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
    }

    tracing::info!("Shutting down...");
    handle
        .shutdown()
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    for id in [now_id, later_id] {
        if let Ok(Some(job)) = engine.get_job(id).await {
            tracing::info!(job_id = %id, status = %job.status, "Final job status");
        }
    }

    tracing::info!("Backlane demo stopped");
    Ok(())
}
