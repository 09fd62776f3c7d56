//! End-to-end tests of the envelope protocol over the channel transport.

use hearth_agent::AgentProcess;
use hearth_agent::transport::{HostEnd, channel};
use hearth_core::config::HearthConfig;
use hearth_core::permissions::Capability;
use hearth_core::preferences::PreferenceStore;
use hearth_core::store::MemoryStore;
use hearth_core::types::Role;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::task::JoinHandle;

struct Harness {
    host: HostEnd,
    store: MemoryStore,
    db_path: PathBuf,
    agent: JoinHandle<Result<(), hearth_agent::error::ProtocolError>>,
    _dir: TempDir,
}

impl Harness {
    fn start(config: HearthConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("memory.db");
        let store = MemoryStore::open(&db_path, Duration::from_secs(5)).unwrap();
        let prefs = Arc::new(PreferenceStore::load(dir.path().join("preferences.json")));
        let agent = AgentProcess::new(&config, store.clone(), prefs, Some(dir.path().to_path_buf()));
        let (source, sink, host) = channel(64);
        let agent = tokio::spawn(agent.run(source, sink));
        Self {
            host,
            store,
            db_path,
            agent,
            _dir: dir,
        }
    }

    /// Drop a table behind the agent's back through a second connection.
    fn drop_table(&self, table: &str) {
        let conn = rusqlite::Connection::open(&self.db_path).unwrap();
        conn.execute_batch(&format!("DROP TABLE {table}")).unwrap();
    }

    async fn send(&self, envelope: Value) {
        self.host.to_agent.send(envelope.to_string()).await.unwrap();
    }

    async fn send_raw(&self, line: &str) {
        self.host.to_agent.send(line.to_string()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(10), self.host.from_agent.recv())
            .await
            .expect("timed out waiting for the agent")
            .expect("agent closed its output");
        serde_json::from_str(&line).unwrap()
    }

    /// Read the handshake that opens every session.
    async fn ready(&mut self) -> Value {
        let ready = self.recv().await;
        assert_eq!(ready["type"], "agent:ready");
        ready
    }
}

#[tokio::test]
async fn test_ready_handshake_lists_tools() {
    let mut h = Harness::start(HearthConfig::default());
    let ready = h.ready().await;
    assert_eq!(ready["pid"], std::process::id());
    assert_eq!(ready["version"], env!("CARGO_PKG_VERSION"));
    let names: Vec<&str> = ready["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    for expected in ["memory:get", "memory:put", "memory:recent", "shell:run", "system:info"] {
        assert!(names.contains(&expected), "missing {expected}");
    }
}

#[tokio::test]
async fn test_ping_pong() {
    let mut h = Harness::start(HearthConfig::default());
    h.ready().await;
    h.send(json!({"type": "agent:ping"})).await;
    let pong = h.recv().await;
    assert_eq!(pong["type"], "agent:pong");
    assert_eq!(pong["pid"], std::process::id());
    assert!(pong["ts"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_tools_list() {
    let mut h = Harness::start(HearthConfig::default());
    let ready = h.ready().await;
    h.send(json!({"type": "agent:tools:list"})).await;
    let list = h.recv().await;
    assert_eq!(list["type"], "agent:tools:list:result");
    assert_eq!(list["tools"], ready["tools"]);
}

#[tokio::test]
async fn test_memory_put_then_get() {
    let mut h = Harness::start(HearthConfig::default());
    h.ready().await;

    h.send(json!({
        "type": "agent:tool:run",
        "requestId": "r1",
        "tool": "memory:put",
        "args": {"key": "theme", "value": "dark"},
        "convoId": "c1"
    }))
    .await;
    let put = h.recv().await;
    assert_eq!(put["type"], "agent:tool:result");
    assert_eq!(put["requestId"], "r1");
    assert_eq!(put["ok"], true);
    assert_eq!(put["tool"], "memory:put");

    h.send(json!({
        "type": "agent:tool:run",
        "requestId": 2,
        "tool": "memory:get",
        "args": {"key": "theme"},
        "convoId": "c1"
    }))
    .await;
    let get = h.recv().await;
    assert_eq!(get["requestId"], 2);
    assert_eq!(get["result"], "dark");

    let kinds: Vec<String> = h
        .store
        .recent_events(10)
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert!(kinds.contains(&"memory_put".to_string()));
    assert_eq!(kinds.iter().filter(|k| *k == "tool_used").count(), 2);
}

#[tokio::test]
async fn test_chat_stores_both_messages() {
    let mut h = Harness::start(HearthConfig::default());
    h.ready().await;
    h.send(json!({"type": "agent:chat", "convoId": "c1", "text": "check my memory for theme"}))
        .await;
    let reply = h.recv().await;
    assert_eq!(reply["type"], "agent:chat:result");
    assert_eq!(reply["convoId"], "c1");
    let text = reply["text"].as_str().unwrap();
    assert!(text.contains("memory"), "reply: {text}");

    let messages = h.store.get_recent_messages("c1", 30).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "check my memory for theme");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].meta, Some(json!({"route": "memory"})));
    assert_eq!(h.store.recent_events(1).unwrap()[0].kind, "chat_response");
}

#[tokio::test]
async fn test_chat_fallback_lists_tools() {
    let mut h = Harness::start(HearthConfig::default());
    h.ready().await;
    h.send(json!({"type": "agent:chat", "text": "hello"})).await;
    let reply = h.recv().await;
    assert_eq!(reply["convoId"], "default");
    assert!(reply["text"].as_str().unwrap().contains("shell:run"));
}

#[tokio::test]
async fn test_chat_git_without_permission_explains() {
    let mut config = HearthConfig::default();
    config.permissions.granted = vec![Capability::Shell];
    let mut h = Harness::start(config);
    h.ready().await;
    h.send(json!({"type": "agent:chat", "convoId": "g", "text": "git status please"}))
        .await;
    let reply = h.recv().await;
    assert!(reply["text"].as_str().unwrap().contains("source-control"));
    // the shell was never touched
    assert!(h.store.recent_events(10).unwrap().iter().all(|e| e.kind != "tool_used"));
}

#[tokio::test]
async fn test_unknown_tool_reports_error_and_keeps_serving() {
    let mut h = Harness::start(HearthConfig::default());
    h.ready().await;
    h.send(json!({
        "type": "agent:tool:run",
        "requestId": "x",
        "tool": "nonexistent",
        "args": {}
    }))
    .await;
    let err = h.recv().await;
    assert_eq!(err["type"], "agent:error");
    assert_eq!(err["kind"], "ToolNotFound");
    assert_eq!(err["requestId"], "x");
    assert!(err["message"].as_str().unwrap().contains("nonexistent"));
    assert!(err["stack"].is_string());

    h.send(json!({"type": "agent:ping"})).await;
    assert_eq!(h.recv().await["type"], "agent:pong");
}

#[tokio::test]
async fn test_malformed_and_unknown_envelopes_are_ignored() {
    let mut h = Harness::start(HearthConfig::default());
    h.ready().await;
    h.send_raw("this is not json").await;
    h.send_raw("").await;
    h.send(json!({"no": "type"})).await;
    h.send(json!({"type": "agent:dance"})).await;
    h.send(json!({"type": "agent:chat", "convoId": "c1"})).await;
    h.send(json!({"type": "agent:ping", "requestId": "after"})).await;

    // the first reply after the junk is the pong
    let pong = h.recv().await;
    assert_eq!(pong["type"], "agent:pong");
    assert_eq!(pong["requestId"], "after");
}

#[tokio::test]
async fn test_permission_denied_for_shell() {
    let mut config = HearthConfig::default();
    config.permissions.granted = vec![Capability::Process];
    let mut h = Harness::start(config);
    h.ready().await;
    h.send(json!({
        "type": "agent:tool:run",
        "requestId": 1,
        "tool": "shell:run",
        "args": {"command": "echo hi"}
    }))
    .await;
    let err = h.recv().await;
    assert_eq!(err["type"], "agent:error");
    assert_eq!(err["kind"], "PermissionDenied");
    assert!(err["message"].as_str().unwrap().contains("shell"));
}

#[tokio::test]
async fn test_invalid_arguments_are_reported() {
    let mut h = Harness::start(HearthConfig::default());
    h.ready().await;
    h.send(json!({
        "type": "agent:tool:run",
        "tool": "memory:get",
        "args": {"key": 42}
    }))
    .await;
    let err = h.recv().await;
    assert_eq!(err["kind"], "InvalidArgs");
    assert!(err.get("requestId").is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_shell_run_timeout_over_protocol() {
    let mut h = Harness::start(HearthConfig::default());
    h.ready().await;
    h.send(json!({
        "type": "agent:tool:run",
        "requestId": "slow",
        "tool": "shell:run",
        "args": {"command": "sleep 10", "timeoutMs": 100}
    }))
    .await;
    let reply = h.recv().await;
    assert_eq!(reply["type"], "agent:tool:result");
    assert_eq!(reply["result"]["timedOut"], true);
    assert_eq!(reply["result"]["exitCode"], -1);
    assert_eq!(reply["result"]["ok"], false);
}

#[cfg(unix)]
#[tokio::test]
async fn test_slow_request_does_not_block_others() {
    let mut h = Harness::start(HearthConfig::default());
    h.ready().await;
    h.send(json!({
        "type": "agent:tool:run",
        "requestId": "slow",
        "tool": "shell:run",
        "args": {"command": "sleep 1"}
    }))
    .await;
    h.send(json!({"type": "agent:ping", "requestId": "fast"})).await;

    let first = h.recv().await;
    assert_eq!(first["requestId"], "fast");
    let second = h.recv().await;
    assert_eq!(second["requestId"], "slow");
}

#[tokio::test]
async fn test_eof_drains_in_flight_requests() {
    let mut h = Harness::start(HearthConfig::default());
    h.ready().await;
    h.send(json!({
        "type": "agent:tool:run",
        "requestId": "last",
        "tool": "memory:put",
        "args": {"key": "k", "value": "v"}
    }))
    .await;

    let Harness {
        host, agent, store, ..
    } = h;
    let HostEnd {
        to_agent,
        mut from_agent,
    } = host;
    drop(to_agent);

    let result = tokio::time::timeout(Duration::from_secs(10), agent)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());

    let line = from_agent.recv().await.unwrap();
    let reply: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(reply["requestId"], "last");
    assert!(from_agent.recv().await.is_none());
    assert_eq!(store.kv_get("k").unwrap().as_deref(), Some("v"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_ping_answered_while_tool_slots_are_busy() {
    let mut config = HearthConfig::default();
    config.agent.max_in_flight = 2;
    let mut h = Harness::start(config);
    h.ready().await;
    for id in ["s1", "s2", "s3"] {
        h.send(json!({
            "type": "agent:tool:run",
            "requestId": id,
            "tool": "shell:run",
            "args": {"command": "sleep 2"}
        }))
        .await;
    }
    // let both slots fill
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = Instant::now();
    h.send(json!({"type": "agent:ping", "requestId": "live"})).await;
    let pong = h.recv().await;
    assert_eq!(pong["type"], "agent:pong");
    assert_eq!(pong["requestId"], "live");
    assert!(sent.elapsed() < Duration::from_millis(500), "pong took {:?}", sent.elapsed());

    h.send(json!({"type": "agent:tools:list"})).await;
    assert_eq!(h.recv().await["type"], "agent:tools:list:result");
    assert!(sent.elapsed() < Duration::from_millis(500));

    let mut finished: Vec<String> = Vec::new();
    for _ in 0..3 {
        let reply = h.recv().await;
        assert_eq!(reply["type"], "agent:tool:result");
        finished.push(reply["requestId"].as_str().unwrap().to_string());
    }
    finished.sort();
    assert_eq!(finished, vec!["s1", "s2", "s3"]);
}

#[tokio::test]
async fn test_chat_store_failure_is_reported() {
    let mut h = Harness::start(HearthConfig::default());
    h.ready().await;
    h.drop_table("messages");

    h.send(json!({"type": "agent:chat", "requestId": "c", "convoId": "c1", "text": "hello"}))
        .await;
    let err = h.recv().await;
    assert_eq!(err["type"], "agent:error");
    assert_eq!(err["kind"], "PersistenceWriteFailure");
    assert_eq!(err["requestId"], "c");
    assert!(err["stack"].as_str().unwrap().contains("messages"));

    h.send(json!({"type": "agent:ping"})).await;
    assert_eq!(h.recv().await["type"], "agent:pong");
}

#[tokio::test]
async fn test_tool_used_failure_follows_the_result() {
    let mut h = Harness::start(HearthConfig::default());
    h.ready().await;
    h.send(json!({
        "type": "agent:tool:run",
        "tool": "memory:put",
        "args": {"key": "theme", "value": "dark"}
    }))
    .await;
    assert_eq!(h.recv().await["ok"], true);

    h.drop_table("events");
    h.send(json!({
        "type": "agent:tool:run",
        "requestId": "g",
        "tool": "memory:get",
        "args": {"key": "theme"}
    }))
    .await;
    let result = h.recv().await;
    assert_eq!(result["type"], "agent:tool:result");
    assert_eq!(result["requestId"], "g");
    assert_eq!(result["result"], "dark");
    let err = h.recv().await;
    assert_eq!(err["type"], "agent:error");
    assert_eq!(err["kind"], "PersistenceWriteFailure");
    assert_eq!(err["requestId"], "g");

    h.send(json!({"type": "agent:ping"})).await;
    assert_eq!(h.recv().await["type"], "agent:pong");
}
