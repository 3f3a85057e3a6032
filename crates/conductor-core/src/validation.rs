//! Validation utilities.

use crate::ConductorError;
use validator::Validate;

/// Extension trait for validation.
pub trait ValidateExt: Validate {
    /// Validates the struct and returns a `ConductorError` on failure.
    fn validate_request(&self) -> Result<(), ConductorError> {
        self.validate().map_err(ConductorError::from)
    }
}

impl<T: Validate> ValidateExt for T {}

/// Common validation functions.
pub mod rules {
    use validator::ValidationError;

    /// Validates that a string is not blank (not empty after trimming).
    pub fn not_blank(value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            let mut error = ValidationError::new("not_blank");
            error.message = Some("must not be blank".into());
            return Err(error);
        }
        Ok(())
    }
}
