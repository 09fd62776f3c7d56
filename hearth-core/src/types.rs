//! Core types shared across the Hearth runtime.
//!
//! Defines the per-request tool context, the catalog entry advertised to the
//! host, and the conversational roles stored in memory.

use crate::permissions::{Capability, CapabilitySet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Execution context handed to every tool invocation.
///
/// The agent keeps one base context and clones it per inbound envelope, so
/// concurrent handlers never observe each other's `conversation_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContext {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub granted_capabilities: CapabilitySet,
}

impl ToolContext {
    pub fn new(conversation_id: impl Into<String>, granted: CapabilitySet) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            working_directory: None,
            user_id: None,
            granted_capabilities: granted,
        }
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Copy of this context bound to another conversation.
    pub fn for_conversation(&self, conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            ..self.clone()
        }
    }
}

/// Catalog entry describing a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub required_capabilities: Vec<Capability>,
}

/// Author of a stored conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_conversation_keeps_grants() {
        let base = ToolContext::new("default", CapabilitySet::all())
            .with_working_directory("/tmp")
            .with_user_id("u-1");
        let scoped = base.for_conversation("c-42");
        assert_eq!(scoped.conversation_id, "c-42");
        assert_eq!(scoped.granted_capabilities, base.granted_capabilities);
        assert_eq!(scoped.working_directory, Some(PathBuf::from("/tmp")));
        assert_eq!(base.conversation_id, "default");
    }

    #[test]
    fn test_tool_definition_wire_names() {
        let def = ToolDefinition {
            name: "memory:get".into(),
            description: "Read a value".into(),
            input_schema: serde_json::json!({"type": "object"}),
            required_capabilities: vec![Capability::Filesystem],
        };
        let json = serde_json::to_value(&def).unwrap();
        assert!(json.get("inputSchema").is_some());
        assert_eq!(json["requiredCapabilities"], serde_json::json!(["filesystem"]));
    }

    #[test]
    fn test_role_roundtrip_db_str() {
        assert_eq!(Role::from_db_str(Role::Assistant.as_str()), Role::Assistant);
        assert_eq!(Role::from_db_str("user"), Role::User);
        assert_eq!(Role::User.to_string(), "user");
    }
}
