//! JSON flat-file job storage provider.
//!
//! Each job lives in `<root>/<id>.json`. New records are written to a
//! temporary file and hard-linked into place; updates are written to a
//! sibling temporary file and renamed. Readers never observe a partially
//! written record.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use backlane_core::error::{AppError, ErrorKind};
use backlane_core::result::AppResult;
use backlane_entity::{Job, JobStatus};

use crate::traits::{JobStorage, is_expired};

/// Job storage that keeps one pretty-printed JSON document per job.
#[derive(Debug, Clone)]
pub struct JsonFileJobStorage {
    /// Directory holding the job documents.
    root: PathBuf,
}

impl JsonFileJobStorage {
    /// Create a provider rooted at `root_path`, creating the directory.
    pub async fn new(root_path: impl AsRef<Path>) -> AppResult<Self> {
        let root = root_path.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to create job directory: {}", root.display()),
                e,
            )
        })?;
        Ok(Self { root })
    }

    fn job_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn read_job(path: &Path) -> AppResult<Job> {
        let data = fs::read(path).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Load every readable job document, skipping files that fail to parse.
    async fn scan(&self) -> AppResult<Vec<(PathBuf, Job)>> {
        let mut entries = fs::read_dir(&self.root).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to list job directory: {}", self.root.display()),
                e,
            )
        })?;

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match Self::read_job(&path).await {
                Ok(job) => jobs.push((path, job)),
                // Removed between listing and reading.
                Err(e) if e.kind == ErrorKind::Storage && !path.exists() => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable job file"),
            }
        }
        Ok(jobs)
    }

    async fn select<F>(&self, batch_size: usize, mut filter: F) -> AppResult<Vec<Job>>
    where
        F: FnMut(&Job) -> bool + Send,
    {
        let mut matched: Vec<Job> = self
            .scan()
            .await?
            .into_iter()
            .map(|(_, job)| job)
            .filter(|job| filter(job))
            .collect();
        matched.sort_by_key(|job| (job.scheduled_at, job.created_at));
        matched.truncate(batch_size);
        Ok(matched)
    }
}

#[async_trait]
impl JobStorage for JsonFileJobStorage {
    fn provider_type(&self) -> &str {
        "json"
    }

    async fn store_job(&self, job: &Job) -> AppResult<()> {
        let path = self.job_path(job.id);
        let data = serde_json::to_vec_pretty(job)?;

        // Fully written first, then linked: the link fails atomically if the
        // id is taken and readers never see a partial document.
        let tmp = self
            .root
            .join(format!("{}.json.{}.tmp", job.id, Uuid::new_v4()));
        let linked = match fs::write(&tmp, &data).await {
            Ok(()) => fs::hard_link(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = fs::remove_file(&tmp).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %e, "Failed to remove temporary job file");
            }
        }

        linked.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                AppError::conflict(format!("Job {} already exists", job.id))
            } else {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to create job file: {}", path.display()),
                    e,
                )
            }
        })?;

        debug!(job_id = %job.id, "Stored job file");
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> AppResult<Option<Job>> {
        match fs::read(self.job_path(id)).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to read job {id}"),
                e,
            )),
        }
    }

    async fn update_job(&self, job: &Job) -> AppResult<()> {
        let path = self.job_path(job.id);
        if !fs::try_exists(&path).await? {
            return Err(AppError::not_found(format!("Job {} not found", job.id)));
        }

        let tmp = self.root.join(format!("{}.json.tmp", job.id));
        fs::write(&tmp, serde_json::to_vec_pretty(job)?).await?;
        fs::rename(&tmp, &path).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to replace job file: {}", path.display()),
                e,
            )
        })?;
        Ok(())
    }

    async fn get_running_jobs(&self, batch_size: usize) -> AppResult<Vec<Job>> {
        self.select(batch_size, |job| job.status.is_recoverable())
            .await
    }

    async fn get_pending_scheduled_jobs(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> AppResult<Vec<Job>> {
        self.select(batch_size, |job| {
            job.status == JobStatus::Scheduled && job.is_due(now)
        })
        .await
    }

    async fn delete_old_jobs(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let mut removed = 0u64;
        for (path, job) in self.scan().await? {
            if !is_expired(&job, older_than) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        debug!(removed, "Purged finished job files");
        Ok(removed)
    }
}
