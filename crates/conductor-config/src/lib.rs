//! # Conductor Config
//!
//! Configuration management for Conductor.
//! Supports layered configuration from files and environment variables.

mod app_config;
mod loader;
mod role;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use role::*;
pub use validation::*;
