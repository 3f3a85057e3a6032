//! Result type aliases for Conductor.

use crate::ConductorError;

/// A specialized `Result` type for Conductor operations.
pub type ConductorResult<T> = Result<T, ConductorError>;
