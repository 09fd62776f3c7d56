//! Agent-specific error types.

use hearth_core::error::{StoreError, ToolError};

/// Errors at the envelope and transport layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {reason}")]
    Malformed { reason: String },

    #[error("Unknown envelope type: {kind}")]
    UnknownType { kind: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A failure inside a request handler, reported to the host as `agent:error`.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Persistence failure: {0}")]
    Store(#[from] StoreError),

    #[error("Handler task failed: {message}")]
    Task { message: String },
}

impl HandlerError {
    /// Machine-readable class carried in the `kind` field of `agent:error`.
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::Tool(e) => e.kind(),
            HandlerError::Store(StoreError::Read { .. }) => "PersistenceReadFailure",
            HandlerError::Store(_) => "PersistenceWriteFailure",
            HandlerError::Task { .. } => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_is_transparent() {
        let err = HandlerError::from(ToolError::NotFound {
            name: "nonexistent".into(),
        });
        assert_eq!(err.to_string(), "Tool not found: nonexistent");
        assert_eq!(err.kind(), "ToolNotFound");
    }

    #[test]
    fn test_store_error_kind() {
        let err = HandlerError::from(StoreError::Poisoned);
        assert_eq!(err.kind(), "PersistenceWriteFailure");
        assert!(err.to_string().starts_with("Persistence failure"));
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::UnknownType {
            kind: "agent:dance".into(),
        };
        assert_eq!(err.to_string(), "Unknown envelope type: agent:dance");
    }
}
