//! Options accepted when enqueuing a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-job enqueue settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Defer execution until this instant.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Informational queue label.
    pub queue_name: Option<String>,
}

impl EnqueueOptions {
    /// Run as soon as a worker slot is free.
    pub fn now() -> Self {
        Self::default()
    }

    /// Run no earlier than `delay` from now.
    pub fn delay(delay: std::time::Duration) -> Self {
        let delay =
            chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::weeks(5_200));
        Self {
            scheduled_at: Some(Utc::now() + delay),
            queue_name: None,
        }
    }

    /// Run no earlier than `at`.
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at: Some(at),
            queue_name: None,
        }
    }

    /// Attach a queue label.
    pub fn queue(mut self, name: impl Into<String>) -> Self {
        self.queue_name = Some(name.into());
        self
    }
}
