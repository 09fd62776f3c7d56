//! `shell:run`: execute a command line through the sandbox.
//!
//! Before running, an exact-match alias from the preference store is
//! expanded. Afterwards the command and a summary of its output are pushed
//! into session memory. The command's frequency counter and the workspace
//! history are then updated in one preference write off the async workers.

use crate::memory::required_str;
use crate::registry::Tool;
use crate::sandbox::{CommandResult, CommandSandbox};
use async_trait::async_trait;
use hearth_core::error::ToolError;
use hearth_core::permissions::Capability;
use hearth_core::preferences::PreferenceStore;
use hearth_core::session::SharedSession;
use hearth_core::types::ToolContext;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest output summary kept in session memory, in characters.
const OUTPUT_SUMMARY_CHARS: usize = 2000;

pub struct ShellRunTool {
    sandbox: CommandSandbox,
    session: SharedSession,
    preferences: Arc<PreferenceStore>,
}

impl ShellRunTool {
    pub fn new(
        sandbox: CommandSandbox,
        session: SharedSession,
        preferences: Arc<PreferenceStore>,
    ) -> Self {
        Self {
            sandbox,
            session,
            preferences,
        }
    }

    /// Push the run into session memory, then update the preference
    /// document on the blocking pool since it rewrites a file.
    async fn record(&self, command: &str, cwd: Option<PathBuf>, result: &CommandResult) {
        {
            let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            session.add_command(command);
            session.add_output(summarize(result));
        }
        let preferences = self.preferences.clone();
        let command = command.to_string();
        let recorded = tokio::task::spawn_blocking(move || {
            let workspace = cwd
                .or_else(|| std::env::current_dir().ok())
                .map(|dir| dir.to_string_lossy().into_owned());
            preferences.record_command(&command, workspace);
        })
        .await;
        if let Err(e) = recorded {
            warn!(error = %e, "Failed to record command usage");
        }
    }
}

#[async_trait]
impl Tool for ShellRunTool {
    fn name(&self) -> &str {
        "shell:run"
    }

    fn description(&self) -> &str {
        "Run a shell command. Returns ok, exitCode, stdout, stderr, timedOut and durationMs. \
         Commands are killed once timeoutMs (default 15000) elapses."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Command line or alias to execute"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory. Defaults to the session's directory."
                },
                "timeoutMs": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Kill the command after this many milliseconds"
                }
            },
            "required": ["command"]
        })
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::Shell]
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let command = required_str(self.name(), &args, "command")?;
        let expanded = self
            .preferences
            .get_alias(command.trim())
            .unwrap_or_else(|| command.clone());
        if expanded != command {
            debug!(alias = %command, command = %expanded, "Expanded alias");
        }

        let cwd = args["cwd"]
            .as_str()
            .map(PathBuf::from)
            .or_else(|| ctx.working_directory.clone());
        let timeout = args["timeoutMs"].as_u64().map(Duration::from_millis);

        let result = self.sandbox.run(&expanded, cwd.as_deref(), timeout).await;
        self.record(&command, cwd, &result).await;

        serde_json::to_value(&result).map_err(|e| ToolError::ExecutionFailed {
            name: self.name().to_string(),
            message: e.to_string(),
        })
    }
}

fn summarize(result: &CommandResult) -> String {
    let body = if result.stdout.is_empty() {
        &result.stderr
    } else {
        &result.stdout
    };
    let mut summary: String = body.chars().take(OUTPUT_SUMMARY_CHARS).collect();
    if result.timed_out {
        summary.push_str("\n[timed out]");
    }
    summary
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use hearth_core::permissions::CapabilitySet;
    use hearth_core::session::SessionMemory;
    use tempfile::TempDir;

    fn tool() -> (ShellRunTool, SharedSession, Arc<PreferenceStore>) {
        let session = SessionMemory::default().shared();
        let prefs = Arc::new(PreferenceStore::in_memory());
        let tool = ShellRunTool::new(CommandSandbox::default(), session.clone(), prefs.clone());
        (tool, session, prefs)
    }

    fn ctx() -> ToolContext {
        ToolContext::new("c1", CapabilitySet::all())
    }

    #[tokio::test]
    async fn test_run_records_history() {
        let (tool, session, prefs) = tool();
        let dir = TempDir::new().unwrap();
        let result = tool
            .execute(
                json!({"command": "echo hi", "cwd": dir.path().to_str().unwrap()}),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(result["exitCode"], 0);
        assert_eq!(result["stdout"].as_str().unwrap().trim(), "hi");

        let session = session.lock().unwrap();
        assert_eq!(session.get_recent_commands(), vec!["echo hi"]);
        assert_eq!(session.get_recent_outputs()[0].trim(), "hi");
        assert_eq!(prefs.get_top_commands(1), vec![("echo hi".to_string(), 1)]);
        assert_eq!(
            prefs.get_workspace_history()[0].path,
            dir.path().to_string_lossy()
        );
    }

    #[tokio::test]
    async fn test_usage_reaches_the_preference_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        let tool = ShellRunTool::new(
            CommandSandbox::default(),
            SessionMemory::default().shared(),
            Arc::new(PreferenceStore::load(&path)),
        );
        let ctx = ctx().with_working_directory(dir.path());
        for _ in 0..2 {
            tool.execute(json!({"command": "true"}), &ctx).await.unwrap();
        }

        let reloaded = PreferenceStore::load(&path);
        assert_eq!(reloaded.get_top_commands(5), vec![("true".to_string(), 2)]);
        let history = reloaded.get_workspace_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].path, dir.path().to_string_lossy());
    }

    #[tokio::test]
    async fn test_alias_is_expanded() {
        let (tool, session, prefs) = tool();
        prefs.set_alias("greet", "echo expanded");
        let result = tool
            .execute(json!({"command": "greet"}), &ctx())
            .await
            .unwrap();
        assert_eq!(result["stdout"].as_str().unwrap().trim(), "expanded");
        // history keeps what the user typed
        assert_eq!(session.lock().unwrap().get_recent_commands(), vec!["greet"]);
    }

    #[tokio::test]
    async fn test_exit_code_and_timeout() {
        let (tool, _, _) = tool();
        let result = tool
            .execute(json!({"command": "exit 1"}), &ctx())
            .await
            .unwrap();
        assert_eq!(result["ok"], false);
        assert_eq!(result["exitCode"], 1);
        assert_eq!(result["timedOut"], false);

        let result = tool
            .execute(json!({"command": "sleep 10", "timeoutMs": 100}), &ctx())
            .await
            .unwrap();
        assert_eq!(result["ok"], false);
        assert_eq!(result["exitCode"], -1);
        assert_eq!(result["timedOut"], true);
    }

    #[tokio::test]
    async fn test_context_directory_is_default_cwd() {
        let (tool, _, _) = tool();
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("here.txt"), "").unwrap();
        let ctx = ctx().with_working_directory(dir.path());
        let result = tool.execute(json!({"command": "ls"}), &ctx).await.unwrap();
        assert!(result["stdout"].as_str().unwrap().contains("here.txt"));
    }
}
