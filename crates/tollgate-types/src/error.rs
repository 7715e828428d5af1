//! Error hierarchy for Tollgate.

use thiserror::Error;

/// Errors surfacing from the wrapped agent runtime.
///
/// Any of these ends the current turn with a single terminal error event;
/// retrying is left to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Failed to start agent runtime: {0}")]
    Spawn(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed runtime stream: {0}")]
    StreamParse(String),

    #[error("Agent runtime terminated: {0}")]
    Terminated(String),
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
