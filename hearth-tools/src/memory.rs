//! Tools over the persistent memory store: key/value access and the
//! recent window of a conversation.

use crate::registry::Tool;
use async_trait::async_trait;
use hearth_core::error::{StoreError, ToolError};
use hearth_core::store::{DEFAULT_RECENT_LIMIT, MemoryStore};
use hearth_core::types::ToolContext;
use serde_json::{Value, json};

/// Upper bound for `memory:recent`'s `limit`.
pub const MAX_RECENT_LIMIT: u64 = 500;

/// Run a store operation on the blocking pool, mapping failures to
/// `ExecutionFailed` for `tool`.
pub(crate) async fn with_store<T, F>(tool: &str, store: &MemoryStore, op: F) -> Result<T, ToolError>
where
    T: Send + 'static,
    F: FnOnce(&MemoryStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            name: tool.to_string(),
            message: format!("store task failed: {e}"),
        })?
        .map_err(|e| ToolError::ExecutionFailed {
            name: tool.to_string(),
            message: e.to_string(),
        })
}

/// Read a value from the key/value collection.
pub struct MemoryGetTool {
    store: MemoryStore,
}

impl MemoryGetTool {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryGetTool {
    fn name(&self) -> &str {
        "memory:get"
    }

    fn description(&self) -> &str {
        "Read a value from persistent memory. Returns null when the key is unset."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "minLength": 1, "description": "Key to read" }
            },
            "required": ["key"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let key = required_str(self.name(), &args, "key")?;
        let value = with_store(self.name(), &self.store, move |s| s.kv_get(&key)).await?;
        Ok(value.map(Value::String).unwrap_or(Value::Null))
    }
}

/// Write a value to the key/value collection and record a `memory_put` event.
pub struct MemoryPutTool {
    store: MemoryStore,
}

impl MemoryPutTool {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryPutTool {
    fn name(&self) -> &str {
        "memory:put"
    }

    fn description(&self) -> &str {
        "Store a value in persistent memory under a key. Non-string values are stored as JSON text."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "minLength": 1, "description": "Key to write" },
                "value": { "description": "Value to store" }
            },
            "required": ["key", "value"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let key = required_str(self.name(), &args, "key")?;
        let value = match &args["value"] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let event = json!({ "key": key, "convoId": ctx.conversation_id });
        let stored_key = key.clone();
        with_store(self.name(), &self.store, move |s| {
            s.kv_set(&stored_key, &value)?;
            s.log_event("memory_put", &event)?;
            Ok(())
        })
        .await?;
        Ok(json!({ "key": key, "stored": true }))
    }
}

/// The most recent messages of a conversation, oldest first.
pub struct MemoryRecentTool {
    store: MemoryStore,
}

impl MemoryRecentTool {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryRecentTool {
    fn name(&self) -> &str {
        "memory:recent"
    }

    fn description(&self) -> &str {
        "Fetch the most recent messages of a conversation in chronological order. Defaults to the current conversation."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "convoId": { "type": "string", "minLength": 1 },
                "limit": { "type": "integer", "minimum": 1, "maximum": MAX_RECENT_LIMIT }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let convo = args["convoId"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| ctx.conversation_id.clone());
        let limit = args["limit"]
            .as_u64()
            .map(|n| n.min(MAX_RECENT_LIMIT) as usize)
            .unwrap_or(DEFAULT_RECENT_LIMIT);
        let messages = with_store(self.name(), &self.store, move |s| {
            s.get_recent_messages(&convo, limit)
        })
        .await?;
        serde_json::to_value(messages).map_err(|e| ToolError::ExecutionFailed {
            name: self.name().to_string(),
            message: e.to_string(),
        })
    }
}

pub(crate) fn required_str(tool: &str, args: &Value, field: &str) -> Result<String, ToolError> {
    args[field]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments {
            name: tool.to_string(),
            reason: format!("'{field}' must be a string"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::permissions::CapabilitySet;
    use hearth_core::types::Role;

    fn ctx() -> ToolContext {
        ToolContext::new("c1", CapabilitySet::none())
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryStore::open_in_memory().unwrap();
        let put = MemoryPutTool::new(store.clone());
        let get = MemoryGetTool::new(store.clone());

        let result = put
            .execute(json!({"key": "theme", "value": "dark"}), &ctx())
            .await
            .unwrap();
        assert_eq!(result, json!({"key": "theme", "stored": true}));

        let value = get.execute(json!({"key": "theme"}), &ctx()).await.unwrap();
        assert_eq!(value, json!("dark"));

        let events = store.recent_events(10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "memory_put");
    }

    #[tokio::test]
    async fn test_get_missing_is_null() {
        let store = MemoryStore::open_in_memory().unwrap();
        let get = MemoryGetTool::new(store);
        let value = get.execute(json!({"key": "absent"}), &ctx()).await.unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn test_put_non_string_stores_json_text() {
        let store = MemoryStore::open_in_memory().unwrap();
        let put = MemoryPutTool::new(store.clone());
        put.execute(json!({"key": "n", "value": {"a": 1}}), &ctx())
            .await
            .unwrap();
        assert_eq!(store.kv_get("n").unwrap().as_deref(), Some(r#"{"a":1}"#));
    }

    #[tokio::test]
    async fn test_recent_defaults_to_context_conversation() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.add_message("c1", Role::User, "hi", None).unwrap();
        store.add_message("c1", Role::Assistant, "hello", None).unwrap();
        store.add_message("other", Role::User, "elsewhere", None).unwrap();

        let tool = MemoryRecentTool::new(store);
        let result = tool.execute(json!({}), &ctx()).await.unwrap();
        let messages = result.as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], "hi");
        assert_eq!(messages[1]["role"], "assistant");

        let result = tool
            .execute(json!({"convoId": "other", "limit": 1}), &ctx())
            .await
            .unwrap();
        assert_eq!(result[0]["content"], "elsewhere");
    }
}
