//! Retry and timeout policy configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Resilience policy applied around each job attempt.
///
/// The defaults allow a 15 minute window per attempt and three retries
/// with exponential backoff starting at two seconds.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Whether the resilience middleware is installed.
    #[serde(default)]
    pub enabled: bool,
    /// Timeout in seconds for a single attempt.
    #[serde(default = "default_timeout")]
    #[validate(range(min = 1))]
    pub timeout_seconds: u64,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retry_attempts")]
    #[validate(range(max = 100))]
    pub max_retry_attempts: u32,
    /// Backoff delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay, in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Randomize each delay by up to 20% in either direction.
    #[serde(default = "default_true")]
    pub use_jitter: bool,
}

impl ResilienceConfig {
    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retry_attempts.saturating_add(1)
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_seconds: default_timeout(),
            max_retry_attempts: default_max_retry_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            use_jitter: default_true(),
        }
    }
}

fn default_timeout() -> u64 {
    15 * 60
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    2_000
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}
