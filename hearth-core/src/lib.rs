//! # Hearth Core
//!
//! Core library for the Hearth local agent runtime.
//! Provides the permission model, tool context, persistent memory store,
//! session memory, durable preferences, configuration, and error types.

pub mod config;
pub mod error;
pub mod permissions;
pub mod persistence;
pub mod preferences;
pub mod session;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root.
pub use config::{HearthConfig, load_config};
pub use error::{
    ConfigError, HearthError, PreferenceError, Result, StoreError, ToolError, error_chain,
};
pub use permissions::{Capability, CapabilitySet, has_capability};
pub use preferences::{PreferenceDocument, PreferenceStore, WorkspaceEntry};
pub use session::{SessionMemory, SessionSnapshot, SharedSession};
pub use store::{Conversation, Event, KvEntry, MemoryStore, StoredMessage};
pub use types::{Role, ToolContext, ToolDefinition};
