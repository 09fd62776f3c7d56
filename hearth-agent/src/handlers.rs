//! Envelope dispatch.
//!
//! [`Dispatcher`] turns one decoded inbound envelope into the envelopes sent
//! back to the host. It is shared by every handler task; each request works
//! on its own copy of the base [`ToolContext`].

use crate::chat::{self, Route};
use crate::error::HandlerError;
use crate::protocol::{ChatRequest, Inbound, Outbound, ToolRunRequest};
use chrono::Utc;
use hearth_core::error::StoreError;
use hearth_core::store::MemoryStore;
use hearth_core::types::{Role, ToolContext};
use hearth_tools::{CommandSandbox, ToolRegistry};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    store: MemoryStore,
    /// Runs commands the agent issues on its own behalf, outside `shell:run`.
    sandbox: CommandSandbox,
    base_context: ToolContext,
    default_conversation: String,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        store: MemoryStore,
        sandbox: CommandSandbox,
        base_context: ToolContext,
        default_conversation: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            store,
            sandbox,
            base_context,
            default_conversation: default_conversation.into(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Handle one envelope, returning the replies in send order.
    pub async fn handle(&self, inbound: Inbound) -> Vec<Outbound> {
        match inbound {
            Inbound::Ping { request_id } => vec![Outbound::Pong {
                ts: Utc::now().timestamp_millis(),
                pid: std::process::id(),
                request_id,
            }],
            Inbound::ToolsList { request_id } => vec![Outbound::ToolsListResult {
                tools: self.registry.list(),
                request_id,
            }],
            Inbound::ToolRun(request) => self.handle_tool_run(request).await,
            Inbound::Chat(request) => self.handle_chat(request).await,
            Inbound::Unknown => Vec::new(),
        }
    }

    /// Per-request copy of the base context.
    fn context_for(&self, convo_id: Option<&str>, cwd: Option<&str>) -> ToolContext {
        let convo = convo_id
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.default_conversation);
        let ctx = self.base_context.for_conversation(convo);
        match cwd {
            Some(dir) => ctx.with_working_directory(dir),
            None => ctx,
        }
    }

    async fn handle_tool_run(&self, request: ToolRunRequest) -> Vec<Outbound> {
        let ToolRunRequest {
            request_id,
            tool,
            args,
            convo_id,
            cwd,
        } = request;
        let ctx = self.context_for(convo_id.as_deref(), cwd.as_deref());
        let args = if args.is_null() { json!({}) } else { args };
        debug!(tool = %tool, convo_id = %ctx.conversation_id, request_id = ?request_id, "Tool run requested");

        let result = match self.registry.invoke(&tool, args.clone(), &ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %tool, error = %e, "Tool invocation failed");
                return vec![Outbound::error(&HandlerError::from(e), request_id)];
            }
        };

        let mut replies = vec![Outbound::ToolResult {
            request_id: request_id.clone(),
            ok: true,
            tool: tool.clone(),
            result,
        }];
        let event = json!({ "tool": tool, "args": args, "convoId": ctx.conversation_id });
        if let Err(e) = on_store(&self.store, move |s| s.log_event("tool_used", &event)).await {
            warn!(tool = %tool, error = %e, "Failed to record tool_used event");
            replies.push(Outbound::error(&e, request_id));
        }
        replies
    }

    async fn handle_chat(&self, request: ChatRequest) -> Vec<Outbound> {
        let ctx = self.context_for(request.convo_id.as_deref(), request.cwd.as_deref());
        match self.chat_turn(&ctx, &request.text).await {
            Ok(text) => vec![Outbound::ChatResult {
                convo_id: ctx.conversation_id,
                text,
                request_id: request.request_id,
            }],
            Err(e) => {
                warn!(convo_id = %ctx.conversation_id, error = %e, "Chat turn failed");
                vec![Outbound::error(&e, request.request_id)]
            }
        }
    }

    /// Store the user message, compose a reply, store it, and log the turn.
    async fn chat_turn(&self, ctx: &ToolContext, text: &str) -> Result<String, HandlerError> {
        let convo = ctx.conversation_id.clone();
        let user_text = text.to_string();
        {
            let convo = convo.clone();
            on_store(&self.store, move |s| {
                s.add_message(&convo, Role::User, &user_text, None)
            })
            .await?;
        }

        let route = Route::classify(text);
        let reply = chat::compose_reply(route, &self.registry, &self.store, &self.sandbox, ctx).await?;
        info!(convo_id = %convo, route = route.as_str(), "Chat reply composed");

        let assistant_text = reply.clone();
        let meta = json!({ "route": route.as_str() });
        let event = json!({ "convoId": convo, "route": route.as_str(), "chars": reply.chars().count() });
        on_store(&self.store, move |s| {
            s.add_message(&convo, Role::Assistant, &assistant_text, Some(&meta))?;
            s.log_event("chat_response", &event)
        })
        .await?;
        Ok(reply)
    }
}

/// Run a store operation on the blocking pool.
pub(crate) async fn on_store<T, F>(store: &MemoryStore, op: F) -> Result<T, HandlerError>
where
    T: Send + 'static,
    F: FnOnce(&MemoryStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| HandlerError::Task {
            message: e.to_string(),
        })?
        .map_err(HandlerError::from)
}
