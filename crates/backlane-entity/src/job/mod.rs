//! Background job domain entities.

pub mod model;
pub mod options;
pub mod status;

pub use model::{Job, NewJob};
pub use options::EnqueueOptions;
pub use status::JobStatus;
