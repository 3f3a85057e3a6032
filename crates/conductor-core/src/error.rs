//! Unified error types shared by every Conductor crate.

use crate::JobStatus;
use std::fmt::Debug;
use thiserror::Error;

/// Unified error type for Conductor.
///
/// Covers domain errors (including lifecycle violations) and the
/// infrastructure failures surfaced by the stores the core talks to.
#[derive(Error, Debug)]
pub enum ConductorError {
    // ============ Domain Errors ============
    /// Resource not found
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict error (e.g., duplicate entry)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A job lifecycle transition outside the allowed graph was attempted.
    #[error("Illegal job transition: {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    // ============ Infrastructure Errors ============
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Redis error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Work queue error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConductorError {
    /// Returns the HTTP status code an outer API layer should map this error to.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Validation(_) => 400,
            Self::Conflict(_) | Self::IllegalTransition { .. } => 409,
            Self::Timeout(_) => 503,
            Self::Database(_)
            | Self::Configuration(_)
            | Self::Cache(_)
            | Self::Queue(_)
            | Self::Internal(_)
            | Self::Other(_) => 500,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a not found error for a resource.
    #[must_use]
    pub fn not_found<T: ToString>(resource_type: &'static str, id: T) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict<T: Into<String>>(message: T) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if this error is transient infrastructure trouble.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Cache(_) | Self::Queue(_) | Self::Timeout(_)
        )
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for ConductorError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound {
                resource_type: "database_row",
                id: "unknown".to_string(),
            },
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    if code == "23000" || code == "1062" {
                        return Self::Conflict(db_err.message().to_string());
                    }
                }
                Self::Database(err.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ConductorError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .iter()
            .map(|(field, errors)| {
                let details: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map_or_else(|| e.code.to_string(), ToString::to_string)
                    })
                    .collect();
                format!("{}: {}", field, details.join(", "))
            })
            .collect();

        Self::Validation(messages.join("; "))
    }
}

impl From<serde_json::Error> for ConductorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {err}"))
    }
}
