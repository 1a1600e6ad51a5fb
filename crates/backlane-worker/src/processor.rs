//! Job processor: runs one job through the middleware chain.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use backlane_entity::Job;

use crate::error::JobError;
use crate::middleware::{JobMiddleware, Next};
use crate::registry::HandlerRegistry;

/// Composes the registered middleware around the handler invocation.
///
/// Errors pass through untouched; classifying them is the middleware's job.
pub struct JobProcessor {
    middlewares: Vec<Arc<dyn JobMiddleware>>,
    registry: Arc<HandlerRegistry>,
}

impl JobProcessor {
    /// Create a processor. `middlewares[0]` is the outermost wrapper.
    pub fn new(registry: Arc<HandlerRegistry>, middlewares: Vec<Arc<dyn JobMiddleware>>) -> Self {
        Self {
            middlewares,
            registry,
        }
    }

    /// Execute `job` through the full chain.
    pub async fn process(&self, job: &mut Job, cancel: &CancellationToken) -> Result<(), JobError> {
        Next::new(&self.middlewares, &self.registry)
            .run(job, cancel)
            .await
    }

    /// Middleware names, outermost first.
    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// The handler registry consulted by the terminal step.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }
}

impl fmt::Debug for JobProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobProcessor")
            .field("middlewares", &self.middleware_names())
            .field("registry", &self.registry)
            .finish()
    }
}
