//! Storage manager that dispatches to the configured job storage provider.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use backlane_core::config::storage::StorageConfig;
use backlane_core::error::AppError;
use backlane_core::result::AppResult;
use backlane_entity::{Job, JobStatus};

use crate::traits::JobStorage;

/// Storage manager that wraps the configured job storage provider.
///
/// The provider is selected at construction time based on configuration.
#[derive(Debug, Clone)]
pub struct StorageManager {
    /// The inner storage provider.
    inner: Arc<dyn JobStorage>,
}

impl StorageManager {
    /// Create a new storage manager from configuration.
    pub async fn new(config: &StorageConfig) -> AppResult<Self> {
        let inner: Arc<dyn JobStorage> = match config.provider.as_str() {
            #[cfg(feature = "memory")]
            "memory" => {
                info!("Initializing in-memory job storage");
                Arc::new(crate::providers::MemoryJobStorage::new())
            }
            #[cfg(feature = "json")]
            "json" => {
                info!(path = %config.json.path, "Initializing JSON file job storage");
                Arc::new(crate::providers::JsonFileJobStorage::new(&config.json.path).await?)
            }
            other => {
                return Err(AppError::configuration(format!(
                    "Unknown storage provider: '{other}'. Supported: memory, json"
                )));
            }
        };

        Ok(Self { inner })
    }

    /// Create a storage manager from an existing provider (for testing).
    pub fn from_provider(provider: Arc<dyn JobStorage>) -> Self {
        Self { inner: provider }
    }
}

#[async_trait]
impl JobStorage for StorageManager {
    fn provider_type(&self) -> &str {
        self.inner.provider_type()
    }

    async fn store_job(&self, job: &Job) -> AppResult<()> {
        self.inner.store_job(job).await
    }

    async fn get_job(&self, id: Uuid) -> AppResult<Option<Job>> {
        self.inner.get_job(id).await
    }

    async fn update_job(&self, job: &Job) -> AppResult<()> {
        self.inner.update_job(job).await
    }

    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> AppResult<()> {
        self.inner.update_job_status(id, status, error).await
    }

    async fn get_running_jobs(&self, batch_size: usize) -> AppResult<Vec<Job>> {
        self.inner.get_running_jobs(batch_size).await
    }

    async fn get_pending_scheduled_jobs(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> AppResult<Vec<Job>> {
        self.inner.get_pending_scheduled_jobs(now, batch_size).await
    }

    async fn delete_old_jobs(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        self.inner.delete_old_jobs(older_than).await
    }
}
