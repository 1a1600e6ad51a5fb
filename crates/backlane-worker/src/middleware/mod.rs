//! Middleware wrapped around every job attempt.
//!
//! The chain is an ordered slice. The first middleware is outermost: it
//! enters first and observes the result last. Calling [`Next::run`] hands
//! control to the remainder of the chain, ending with the handler itself.

pub mod logging;
pub mod resilience;
pub mod status;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use backlane_entity::Job;

use crate::error::JobError;
use crate::registry::HandlerRegistry;

pub use logging::LoggingMiddleware;
pub use resilience::{ResilienceMiddleware, RetryPolicy};
pub use status::StatusMiddleware;

/// A wrapper around job execution.
///
/// Implementations call `next.run(job, cancel)` to continue the chain, or
/// return without calling it to short-circuit. They may mutate `job` and
/// may replace or swallow the error returned by `next`.
#[async_trait]
pub trait JobMiddleware: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Handle one pass through the chain.
    async fn handle(
        &self,
        job: &mut Job,
        next: Next<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), JobError>;
}

/// The remainder of a middleware chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn JobMiddleware>],
    registry: &'a HandlerRegistry,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        middlewares: &'a [Arc<dyn JobMiddleware>],
        registry: &'a HandlerRegistry,
    ) -> Self {
        Self {
            middlewares,
            registry,
        }
    }

    /// Run the rest of the chain.
    ///
    /// `Next` is `Copy`, so a middleware that retries may call this more
    /// than once.
    pub fn run<'b>(
        self,
        job: &'b mut Job,
        cancel: &'b CancellationToken,
    ) -> BoxFuture<'b, Result<(), JobError>>
    where
        'a: 'b,
    {
        async move {
            match self.middlewares.split_first() {
                Some((current, rest)) => {
                    let next = Next {
                        middlewares: rest,
                        registry: self.registry,
                    };
                    current.handle(job, next, cancel).await
                }
                None => invoke_handler(self.registry, job, cancel).await,
            }
        }
        .boxed()
    }
}

tokio::task_local! {
    static RETRY_PENDING: bool;
}

/// Whether an outer middleware will retry the current attempt if it fails
/// with a retryable error.
///
/// Middleware further in uses this to avoid persisting a terminal status
/// for an attempt that is not the last one.
pub fn retry_pending() -> bool {
    RETRY_PENDING.try_with(|pending| *pending).unwrap_or(false)
}

/// Run `attempt` with [`retry_pending`] reporting `pending`.
pub(crate) async fn with_retry_pending<F: Future>(pending: bool, attempt: F) -> F::Output {
    RETRY_PENDING.scope(pending, attempt).await
}

/// Terminal step: resolve the binding, decode the payload, run the handler.
async fn invoke_handler(
    registry: &HandlerRegistry,
    job: &mut Job,
    cancel: &CancellationToken,
) -> Result<(), JobError> {
    let binding = registry.resolve(&job.handler_type)?;
    if binding.payload_type() != job.payload_type {
        return Err(JobError::HandlerResolution {
            handler_type: job.handler_type.clone(),
            reason: format!(
                "handler accepts '{}' but the job carries '{}'",
                binding.payload_type(),
                job.payload_type
            ),
        });
    }

    let payload = binding.decode(job.payload.clone())?;
    match binding.invoke(payload, cancel.clone()).await {
        Err(JobError::Execution(_)) if cancel.is_cancelled() => Err(JobError::Cancelled),
        outcome => outcome,
    }
}
