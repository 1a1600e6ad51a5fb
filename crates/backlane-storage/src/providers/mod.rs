//! Job storage provider implementations.

#[cfg(feature = "json")]
pub mod json_file;
#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "json")]
pub use json_file::JsonFileJobStorage;
#[cfg(feature = "memory")]
pub use memory::MemoryJobStorage;
