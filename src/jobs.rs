//! Demo job handlers.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use backlane_worker::{BoxError, JobHandler};

/// Input for [`SendWelcomeEmailHandler`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeEmail {
    /// Recipient address.
    pub email: String,
    /// Display name used in the greeting.
    pub name: String,
}

/// Pretends to deliver a welcome email.
#[derive(Debug, Default)]
pub struct SendWelcomeEmailHandler;

#[async_trait]
impl JobHandler for SendWelcomeEmailHandler {
    type Payload = WelcomeEmail;

    fn handler_type() -> &'static str {
        "send_welcome_email"
    }

    async fn execute(&self, payload: WelcomeEmail, cancel: CancellationToken) -> Result<(), BoxError> {
        if !payload.email.contains('@') {
            return Err(format!("invalid recipient address '{}'", payload.email).into());
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err("delivery interrupted".into()),
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }

        tracing::info!(email = %payload.email, name = %payload.name, "Welcome email sent");
        Ok(())
    }
}
