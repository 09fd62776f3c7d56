//! Heuristic chat router.
//!
//! Picks a reply strategy from keywords in the lowercased message and, for
//! some routes, gathers live data to enrich the reply. Commands run here go
//! straight to the sandbox so they never show up in the user's shell history.

use crate::error::HandlerError;
use crate::handlers::on_store;
use hearth_core::error::ToolError;
use hearth_core::permissions::{Capability, has_capability};
use hearth_core::store::MemoryStore;
use hearth_core::types::ToolContext;
use hearth_tools::{CommandResult, CommandSandbox, ToolRegistry};
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Memory,
    Git,
    System,
    Fallback,
}

impl Route {
    /// First matching keyword group wins.
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("memory") || lower.contains("remember") {
            Route::Memory
        } else if lower.contains("git") {
            Route::Git
        } else if lower.contains("system") || lower.contains("info") {
            Route::System
        } else {
            Route::Fallback
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Memory => "memory",
            Route::Git => "git",
            Route::System => "system",
            Route::Fallback => "fallback",
        }
    }
}

pub(crate) async fn compose_reply(
    route: Route,
    registry: &ToolRegistry,
    store: &MemoryStore,
    sandbox: &CommandSandbox,
    ctx: &ToolContext,
) -> Result<String, HandlerError> {
    match route {
        Route::Memory => {
            let convo = ctx.conversation_id.clone();
            let count = on_store(store, move |s| s.message_count(&convo)).await?;
            Ok(format!(
                "I keep a persistent memory. Use memory:put to store a value under a key, \
                 memory:get to recall it, and memory:recent to review this conversation \
                 ({count} messages so far)."
            ))
        }
        Route::Git => Ok(git_reply(sandbox, ctx).await),
        Route::System => system_reply(registry, ctx).await,
        Route::Fallback => Ok(format!(
            "I can run these tools for you: {}. Ask me about memory, git status, or system info.",
            registry.names().join(", ")
        )),
    }
}

async fn git_reply(sandbox: &CommandSandbox, ctx: &ToolContext) -> String {
    if !(has_capability(ctx, Capability::Shell) && has_capability(ctx, Capability::SourceControl)) {
        return "Checking git status needs the shell and source-control permissions, \
                which this session does not have."
            .to_string();
    }
    let result = sandbox
        .run("git status --short", ctx.working_directory.as_deref(), None)
        .await;
    describe_git_status(&result)
}

fn describe_git_status(result: &CommandResult) -> String {
    let stdout = result.stdout.trim_end();
    if result.ok {
        if stdout.is_empty() {
            "Git status: the working tree is clean.".to_string()
        } else {
            format!("Git status:\n{stdout}")
        }
    } else if result.timed_out {
        "git status did not finish in time.".to_string()
    } else {
        format!(
            "git status failed (exit code {}): {}",
            result.exit_code,
            result.stderr.trim_end()
        )
    }
}

async fn system_reply(registry: &ToolRegistry, ctx: &ToolContext) -> Result<String, HandlerError> {
    match registry.invoke("system:info", json!({}), ctx).await {
        Ok(info) => Ok(describe_system(&info)),
        Err(ToolError::PermissionDenied { capability, .. }) => Ok(format!(
            "Reading system information needs the {capability} permission, which this session does not have."
        )),
        Err(e) => Err(e.into()),
    }
}

fn describe_system(info: &Value) -> String {
    let mut reply = format!(
        "Running on {} ({}) with {} CPUs",
        info["platform"].as_str().unwrap_or("unknown"),
        info["arch"].as_str().unwrap_or("unknown"),
        info["cpus"]
    );
    if let Some(bytes) = info["totalMemory"].as_u64() {
        reply.push_str(&format!(", {:.1} GiB memory", bytes as f64 / (1u64 << 30) as f64));
    }
    if let Some(secs) = info["uptimeSecs"].as_u64() {
        reply.push_str(&format!(", up {}h {}m", secs / 3600, (secs % 3600) / 60));
    }
    if let Some(host) = info["hostname"].as_str() {
        reply.push_str(&format!(", host {host}"));
    }
    reply.push('.');
    reply
}
