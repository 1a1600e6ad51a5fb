//! Job execution error taxonomy.

use std::time::Duration;

use backlane_core::error::AppError;

/// Boxed error returned by handler code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while enqueuing, resolving, or executing a job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The engine or a handler binding is misconfigured.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No usable binding exists for the stored handler type.
    #[error("Cannot resolve handler '{handler_type}': {reason}")]
    HandlerResolution {
        /// Handler key stored on the job.
        handler_type: String,
        /// What went wrong.
        reason: String,
    },

    /// The payload could not be serialized at enqueue time.
    #[error("Failed to encode payload: {0}")]
    PayloadEncode(#[source] serde_json::Error),

    /// The stored payload does not decode as the handler's payload type.
    #[error("Failed to decode payload as '{payload_type}': {source}")]
    PayloadDecode {
        /// Expected payload type.
        payload_type: String,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// The handler itself returned an error.
    #[error("{0}")]
    Execution(BoxError),

    /// A single attempt exceeded the configured window.
    #[error("Job attempt timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// The window that elapsed.
        timeout: Duration,
    },

    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] AppError),

    /// Execution stopped because shutdown was requested.
    #[error("Job execution was cancelled")]
    Cancelled,
}

impl JobError {
    /// Whether this error reports cooperative cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Execution(_) | Self::Timeout { .. } | Self::Storage(_)
        )
    }
}
