//! Configuration management for the attendance service
//!
//! This module handles configuration loading from TOML files and environment
//! variables, validation, and default values.

pub mod admission;
pub mod app;

// Re-export commonly used types
pub use admission::AdmissionSettings;
pub use app::{validate_config, AmqpSettings, AppConfig, ServiceSettings};
