//! Error types for the Hearth runtime core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering tool dispatch, persistent memory, preferences, and configuration.

use crate::permissions::Capability;
use std::path::PathBuf;

/// Top-level error type for the Hearth core library.
#[derive(Debug, thiserror::Error)]
pub enum HearthError {
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Preference error: {0}")]
    Preference(#[from] PreferenceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from tool registration and invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Permission denied for tool '{name}': missing capability '{capability}'")]
    PermissionDenied { name: String, capability: Capability },

    #[error("Invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("Invalid input schema for tool '{name}': {reason}")]
    InvalidSchema { name: String, reason: String },

    #[error("Tool '{name}' execution failed: {message}")]
    ExecutionFailed { name: String, message: String },
}

impl ToolError {
    /// Stable machine-readable class name, used by hosts to branch on failures.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::NotFound { .. } => "ToolNotFound",
            ToolError::PermissionDenied { .. } => "PermissionDenied",
            ToolError::InvalidArguments { .. } => "InvalidArgs",
            ToolError::InvalidSchema { .. } => "InvalidSchema",
            ToolError::ExecutionFailed { .. } => "ToolExecutionFailed",
        }
    }
}

/// Errors from the persistent memory store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open memory store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Failed to create memory store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Memory store read failed ({operation}): {source}")]
    Read {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Memory store write failed ({operation}): {source}")]
    Write {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Memory store lock poisoned")]
    Poisoned,
}

/// Errors from the durable preference store.
///
/// These are only ever logged: preference persistence is best-effort.
#[derive(Debug, thiserror::Error)]
pub enum PreferenceError {
    #[error("Failed to read preferences from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write preferences to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Configuration parse error: {0}")]
    Parse(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// A type alias for results using the top-level `HearthError`.
pub type Result<T> = std::result::Result<T, HearthError>;

/// Render an error and its `source()` chain, one cause per line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut lines = vec![err.to_string()];
    let mut current = err.source();
    while let Some(cause) = current {
        lines.push(format!("caused by: {}", cause));
        current = cause.source();
    }
    lines.join("\n")
}
