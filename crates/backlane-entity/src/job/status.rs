//! Job lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the intake queue for a worker slot.
    Queued,
    /// Deferred until its `scheduled_at` time.
    Scheduled,
    /// Currently being processed by a worker.
    Running,
    /// Completed without error.
    Succeeded,
    /// Failed and will not be attempted again.
    Failed,
    /// Failed an attempt; the resilience policy will try again.
    Retrying,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Check if a job with this status must be re-dispatched after a restart.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Queued | Self::Running | Self::Retrying)
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
