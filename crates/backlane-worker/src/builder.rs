//! Fluent construction of a [`JobEngine`].

use std::sync::Arc;

use validator::Validate;

use backlane_core::config::AppConfig;
use backlane_core::config::engine::EngineConfig;
use backlane_core::config::resilience::ResilienceConfig;
use backlane_storage::JobStorage;

use crate::engine::JobEngine;
use crate::error::JobError;
use crate::handler::JobHandler;
use crate::middleware::{
    JobMiddleware, LoggingMiddleware, ResilienceMiddleware, RetryPolicy, StatusMiddleware,
};
use crate::processor::JobProcessor;
use crate::registry::HandlerRegistry;

/// Collects handlers, middleware, and settings for a [`JobEngine`].
///
/// The finished chain is, outermost first: resilience (if configured),
/// logging, status, then custom middleware in registration order.
pub struct EngineBuilder {
    storage: Arc<dyn JobStorage>,
    config: EngineConfig,
    registry: HandlerRegistry,
    middlewares: Vec<Arc<dyn JobMiddleware>>,
    retry_policy: Option<RetryPolicy>,
    first_error: Option<JobError>,
}

impl EngineBuilder {
    /// Start a builder backed by `storage` with default settings.
    pub fn new(storage: Arc<dyn JobStorage>) -> Self {
        Self {
            storage,
            config: EngineConfig::default(),
            registry: HandlerRegistry::new(),
            middlewares: Vec::new(),
            retry_policy: None,
            first_error: None,
        }
    }

    /// Use these engine settings.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Apply the engine and resilience sections of a loaded configuration.
    pub fn app_config(self, config: &AppConfig) -> Self {
        self.config(config.engine.clone())
            .resilience(config.resilience.clone())
    }

    /// Register a handler. Duplicate or empty keys fail [`Self::build`].
    pub fn handler<H: JobHandler>(mut self, handler: H) -> Self {
        if let Err(e) = self.registry.register(handler) {
            self.first_error.get_or_insert(e);
        }
        self
    }

    /// Append a custom middleware inside the built-in ones.
    pub fn middleware<M: JobMiddleware>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Append `middleware` only when `condition` holds.
    pub fn middleware_if<M: JobMiddleware>(self, condition: bool, middleware: M) -> Self {
        if condition {
            self.middleware(middleware)
        } else {
            self
        }
    }

    /// Install the resilience middleware when `config.enabled` is set.
    pub fn resilience(mut self, config: ResilienceConfig) -> Self {
        self.retry_policy = config
            .enabled
            .then(|| RetryPolicy::from_config(&config));
        self
    }

    /// Install the resilience middleware with an explicit policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Assemble the engine.
    pub fn build(self) -> Result<JobEngine, JobError> {
        if let Some(err) = self.first_error {
            return Err(err);
        }
        self.config
            .validate()
            .map_err(|e| JobError::Configuration(format!("Invalid engine configuration: {e}")))?;

        let mut chain: Vec<Arc<dyn JobMiddleware>> = Vec::with_capacity(self.middlewares.len() + 3);
        if let Some(policy) = self.retry_policy {
            chain.push(Arc::new(ResilienceMiddleware::new(
                Arc::clone(&self.storage),
                policy,
            )));
        }
        chain.push(Arc::new(LoggingMiddleware));
        chain.push(Arc::new(StatusMiddleware::new(Arc::clone(&self.storage))));
        chain.extend(self.middlewares);

        let processor = JobProcessor::new(Arc::new(self.registry), chain);
        Ok(JobEngine::new(self.storage, processor, self.config))
    }
}
