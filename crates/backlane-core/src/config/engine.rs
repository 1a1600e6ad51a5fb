//! Job engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Job engine configuration.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of jobs executing concurrently.
    #[serde(default = "default_parallelism")]
    #[validate(range(min = 1))]
    pub max_degree_of_parallelism: usize,
    /// Cap on how many jobs a single recovery pass or poller tick fetches.
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1))]
    pub polling_batch_size: usize,
    /// Interval in milliseconds between scheduler poller ticks.
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,
    /// Queue label applied when a job is enqueued without one.
    #[serde(default = "default_queue")]
    pub default_queue: String,
    /// Purge finished jobs older than this many seconds on each poller tick.
    #[serde(default)]
    pub completed_retention_seconds: Option<u64>,
}

impl EngineConfig {
    /// Poller interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Retention window for finished jobs, if purging is enabled.
    pub fn completed_retention(&self) -> Option<Duration> {
        self.completed_retention_seconds.map(Duration::from_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_degree_of_parallelism: default_parallelism(),
            polling_batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval(),
            default_queue: default_queue(),
            completed_retention_seconds: None,
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_batch_size() -> usize {
    100
}

fn default_poll_interval() -> u64 {
    5_000
}

fn default_queue() -> String {
    "default".to_string()
}
