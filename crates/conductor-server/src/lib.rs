//! # Conductor Server Library
//!
//! Wiring for the Conductor process: dependency injection, role-based
//! start-up of the orchestration loops and the built-in task
//! implementations.

pub mod app;
pub mod di;
pub mod startup;
pub mod tasks;
