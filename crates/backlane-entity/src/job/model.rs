//! Job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::JobStatus;

/// A background job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// Key of the registered handler that executes this job.
    pub handler_type: String,
    /// Type name of the payload the handler expects.
    pub payload_type: String,
    /// Serialized handler input.
    pub payload: serde_json::Value,
    /// Current job status.
    pub status: JobStatus,
    /// Queue label (informational only).
    pub queue_name: String,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// Deferred execution time, present until the job is promoted.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Number of attempts beyond the first.
    pub retry_count: u32,
    /// Most recent failure description.
    pub last_error: Option<String>,
    /// When the job reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Data required to create a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Handler key.
    pub handler_type: String,
    /// Payload type name.
    pub payload_type: String,
    /// Serialized payload.
    pub payload: serde_json::Value,
    /// Queue label.
    pub queue_name: String,
    /// Requested execution time.
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a fresh job record.
    ///
    /// A schedule in the future yields [`JobStatus::Scheduled`]; a missing or
    /// already-due schedule yields [`JobStatus::Queued`] with no `scheduled_at`.
    pub fn create(data: NewJob, now: DateTime<Utc>) -> Self {
        let scheduled_at = data.scheduled_at.filter(|at| *at > now);
        let status = if scheduled_at.is_some() {
            JobStatus::Scheduled
        } else {
            JobStatus::Queued
        };

        Self {
            id: Uuid::now_v7(),
            handler_type: data.handler_type,
            payload_type: data.payload_type,
            payload: data.payload,
            status,
            queue_name: data.queue_name,
            created_at: now,
            scheduled_at,
            retry_count: 0,
            last_error: None,
            completed_at: None,
        }
    }

    /// Whether a scheduled job may be promoted at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Scheduled && self.scheduled_at.is_none_or(|at| at <= now)
    }

    /// `Scheduled` -> `Queued`.
    pub fn promote(&mut self) {
        self.status = JobStatus::Queued;
        self.scheduled_at = None;
    }

    /// Enter `Running` for a new attempt.
    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.completed_at = None;
    }

    /// Enter `Succeeded`.
    pub fn mark_succeeded(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Succeeded;
        self.last_error = None;
        self.completed_at = Some(now);
    }

    /// Enter `Failed`.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.last_error = Some(error.into());
        self.completed_at = Some(now);
    }

    /// Record a failed attempt that will be retried.
    pub fn mark_retrying(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Retrying;
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.completed_at = None;
    }
}
