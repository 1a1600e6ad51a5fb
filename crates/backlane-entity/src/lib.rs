//! # backlane-entity
//!
//! Domain entities for Backlane: the persisted [`Job`] record, its
//! lifecycle [`JobStatus`], and the [`EnqueueOptions`] accepted at
//! creation time.

pub mod job;

pub use job::{EnqueueOptions, Job, JobStatus, NewJob};
