//! Background job execution for Backlane.
//!
//! This crate provides:
//! - A job engine that persists, dispatches, recovers, and schedules jobs
//! - A handler registry binding string keys to typed handlers
//! - A middleware pipeline with logging, status, and resilience stages
//! - A builder that wires all of the above together

pub mod builder;
pub mod engine;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod processor;
pub mod registry;

pub use builder::EngineBuilder;
pub use engine::{EngineHandle, JobEngine};
pub use error::{BoxError, JobError};
pub use handler::JobHandler;
pub use middleware::{JobMiddleware, Next, RetryPolicy};
pub use processor::JobProcessor;
pub use registry::HandlerRegistry;
