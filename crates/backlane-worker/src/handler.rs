//! The handler contract implemented by job code.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;

/// Logic bound to one payload type.
///
/// ```ignore
/// #[derive(Debug, Serialize, Deserialize)]
/// struct WelcomeEmail { email: String }
///
/// struct SendWelcomeEmail;
///
/// #[async_trait]
/// impl JobHandler for SendWelcomeEmail {
///     type Payload = WelcomeEmail;
///
///     fn handler_type() -> &'static str { "send_welcome_email" }
///
///     async fn execute(&self, payload: WelcomeEmail, cancel: CancellationToken) -> Result<(), BoxError> {
///         mailer::send(&payload.email).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Input decoded from the stored job payload.
    type Payload: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Stable key stored on each job and used for dispatch.
    ///
    /// Defaults to the Rust type name, which changes when the type is moved
    /// or renamed. Override it when jobs must survive such refactors.
    fn handler_type() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Run the job. Long-running work should observe `cancel`.
    async fn execute(&self, payload: Self::Payload, cancel: CancellationToken)
    -> Result<(), BoxError>;
}

/// Type identifier recorded for a handler's payload.
pub fn payload_type_of<H: JobHandler>() -> &'static str {
    std::any::type_name::<H::Payload>()
}
