//! Tools over in-process state: recent session history and command aliases.

use crate::memory::required_str;
use crate::registry::Tool;
use async_trait::async_trait;
use hearth_core::error::ToolError;
use hearth_core::preferences::PreferenceStore;
use hearth_core::session::SharedSession;
use hearth_core::types::ToolContext;
use serde_json::{Value, json};
use std::sync::{Arc, PoisonError};

const DEFAULT_SESSION_LIMIT: usize = 10;

/// Recent commands and outputs from this process's session memory.
pub struct SessionRecentTool {
    session: SharedSession,
}

impl SessionRecentTool {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for SessionRecentTool {
    fn name(&self) -> &str {
        "session:recent"
    }

    fn description(&self) -> &str {
        "List the most recent shell commands and outputs of this session, newest first."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "minimum": 1, "maximum": 100 }
            }
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let limit = args["limit"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_SESSION_LIMIT);
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let commands: Vec<String> = session.get_recent_commands().into_iter().take(limit).collect();
        let outputs: Vec<String> = session.get_recent_outputs().into_iter().take(limit).collect();
        Ok(json!({ "commands": commands, "outputs": outputs }))
    }
}

/// Read or define a command alias used by `shell:run`.
pub struct PrefsAliasTool {
    preferences: Arc<PreferenceStore>,
}

impl PrefsAliasTool {
    pub fn new(preferences: Arc<PreferenceStore>) -> Self {
        Self { preferences }
    }
}

#[async_trait]
impl Tool for PrefsAliasTool {
    fn name(&self) -> &str {
        "prefs:alias"
    }

    fn description(&self) -> &str {
        "Define a shell alias when 'command' is given, otherwise look the alias up."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "alias": { "type": "string", "minLength": 1, "pattern": "^\\S+$" },
                "command": { "type": "string", "minLength": 1 }
            },
            "required": ["alias"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let alias = required_str(self.name(), &args, "alias")?;
        match args["command"].as_str() {
            Some(command) => {
                self.preferences.set_alias(alias.clone(), command);
                Ok(json!({ "alias": alias, "command": command, "stored": true }))
            }
            None => {
                let command = self.preferences.get_alias(&alias);
                Ok(json!({ "alias": alias, "command": command }))
            }
        }
    }
}
