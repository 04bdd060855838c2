//! Error types for the coach_core library.
//!
//! Only genuine external-world failures live here (files, serialization,
//! delivery). Misusing the session state machine is never an error: those
//! operations quietly do nothing.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for coach_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Workout plan could not be read
    #[error("Plan error: {0}")]
    Plan(String),

    /// Saved progress or pending queue could not be persisted
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Completion report could not be delivered
    #[error("Delivery failed: {0}")]
    Delivery(String),
}
