//! # backlane-storage
//!
//! The [`JobStorage`] contract consumed by the job engine, plus two
//! providers:
//!
//! - **memory**: process-local map, lost on restart
//! - **json**: one JSON document per job in a directory
//!
//! The provider is selected at runtime based on configuration through
//! [`StorageManager`].

pub mod manager;
pub mod providers;
pub mod traits;

pub use manager::StorageManager;
pub use traits::JobStorage;
