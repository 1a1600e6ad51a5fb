//! Convenience result type alias for Backlane.

use crate::error::AppError;

/// A specialized `Result` type for Backlane operations.
pub type AppResult<T> = Result<T, AppError>;
