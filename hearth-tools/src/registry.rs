//! Tool Registry: tool registration, permission checks, argument
//! validation, and dispatch.
//!
//! Tools are registered once at startup. Each registration compiles the
//! tool's JSON Schema so invocations can be validated before the handler
//! runs. The registry does not impose a timeout of its own; long-running
//! work (shell commands) bounds itself.

use async_trait::async_trait;
use hearth_core::error::ToolError;
use hearth_core::permissions::{Capability, has_capability};
use hearth_core::types::{ToolContext, ToolDefinition};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Trait that all tools must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool, e.g. `memory:get`.
    fn name(&self) -> &str;

    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments.
    fn input_schema(&self) -> serde_json::Value;

    /// Capabilities the session must hold for this tool to run.
    fn required_capabilities(&self) -> &[Capability] {
        &[]
    }

    /// Execute the tool with already-validated arguments.
    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError>;
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: jsonschema::Validator,
}

/// The tool registry holds all registered tools and handles invocation.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any previous tool with the same name.
    ///
    /// Fails with `InvalidSchema` when the input schema does not compile,
    /// leaving the catalog unchanged.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        let validator =
            jsonschema::validator_for(&tool.input_schema()).map_err(|e| {
                ToolError::InvalidSchema {
                    name: name.clone(),
                    reason: e.to_string(),
                }
            })?;
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "Replacing previously registered tool");
        } else {
            debug!(tool = %name, "Registering tool");
        }
        self.tools.insert(name, RegisteredTool { tool, validator });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| entry.tool.clone())
    }

    /// Catalog of all tools, sorted by name.
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|entry| ToolDefinition {
                name: entry.tool.name().to_string(),
                description: entry.tool.description().to_string(),
                input_schema: entry.tool.input_schema(),
                required_capabilities: entry.tool.required_capabilities().to_vec(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up, authorize, validate, and run a tool.
    pub async fn invoke(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let entry = self.tools.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;

        if let Some(missing) = entry
            .tool
            .required_capabilities()
            .iter()
            .copied()
            .find(|cap| !has_capability(ctx, *cap))
        {
            return Err(ToolError::PermissionDenied {
                name: name.to_string(),
                capability: missing,
            });
        }

        let violations: Vec<String> = entry
            .validator
            .iter_errors(&args)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect();
        if !violations.is_empty() {
            return Err(ToolError::InvalidArguments {
                name: name.to_string(),
                reason: violations.join("; "),
            });
        }

        info!(tool = %name, conversation = %ctx.conversation_id, "Invoking tool");
        match entry.tool.execute(args, ctx).await {
            Ok(value) => Ok(value),
            Err(e @ (ToolError::InvalidArguments { .. } | ToolError::ExecutionFailed { .. })) => {
                Err(e)
            }
            Err(other) => Err(ToolError::ExecutionFailed {
                name: name.to_string(),
                message: other.to_string(),
            }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
