//! Configuration model for qmaster.
//!
//! This module defines the Config struct that represents the qmaster YAML
//! configuration file. It supports forward-compatible YAML parsing (unknown
//! fields are ignored), sensible defaults for every field, and validation.

mod model;
mod operations;

#[cfg(test)]
mod tests;

// Re-export public API
pub use model::{Config, RunnerClass};
pub use operations::DEFAULT_CONFIG_PATH;
