//! # Conductor Core
//!
//! Core types, the job state machine, and error definitions shared by every
//! Conductor crate.

pub mod domain;
pub mod error;
pub mod id;
pub mod pagination;
pub mod result;
pub mod telemetry;
pub mod validation;

pub use domain::*;
pub use error::*;
pub use id::*;
pub use pagination::*;
pub use result::*;
pub use validation::*;

// Re-export shaku for dependency injection
pub use shaku::Interface;
