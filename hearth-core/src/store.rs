//! Persistent memory store backed by SQLite.
//!
//! Four independent collections share one connection:
//!
//! - `kv`: upsert-only key/value entries, last write wins.
//! - `events`: append-only operational log with monotonic ids.
//! - `conversations`: created lazily on the first message.
//! - `messages`: append-only conversation history.
//!
//! The database runs in WAL mode and the single connection sits behind a
//! mutex, so writes are serialized by the store itself no matter how many
//! handlers call into it concurrently.

use crate::error::StoreError;
use crate::types::Role;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS events (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    ts      INTEGER NOT NULL,
    kind    TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS conversations (
    id         TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    title      TEXT
);
CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    ts              INTEGER NOT NULL,
    role            TEXT NOT NULL,
    content         TEXT NOT NULL,
    meta            TEXT
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, id);
CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
"#;

/// Default window for [`MemoryStore::get_recent_messages`].
pub const DEFAULT_RECENT_LIMIT: usize = 30;

/// A single key/value entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvEntry {
    pub key: String,
    pub value: String,
    pub updated_at: i64,
}

/// An entry of the operational event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub timestamp: i64,
    pub kind: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A stored conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: String,
    pub timestamp: i64,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Durable store for key/value data, events, and conversation history.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
    location: Option<PathBuf>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("location", &self.location)
            .finish()
    }
}

impl MemoryStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let open_err = |source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path).map_err(open_err)?;
        conn.busy_timeout(busy_timeout).map_err(open_err)?;
        // journal_mode answers with the resulting mode, so it must be queried
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .map_err(open_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(open_err)?;
        Self::init(conn, Some(path.to_path_buf())).map_err(open_err)
    }

    /// A private in-memory database, used by tests and as a fallback.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::init(conn, None).map_err(|source| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })
    }

    /// Open the database at `path`, falling back to an empty in-memory
    /// database when the file cannot be opened or is corrupt.
    pub fn open_or_fallback(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        match Self::open(path, busy_timeout) {
            Ok(store) => Ok(store),
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "Memory store unreadable, continuing with a non-durable in-memory store"
                );
                Self::open_in_memory()
            }
        }
    }

    fn init(conn: Connection, location: Option<PathBuf>) -> rusqlite::Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        match &location {
            Some(path) => info!(path = %path.display(), "Memory store opened"),
            None => debug!("In-memory store opened"),
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }

    /// File backing this store, `None` for in-memory stores.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // -- key/value ---------------------------------------------------------

    pub fn kv_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|source| StoreError::Read {
            operation: "kv_get",
            source,
        })
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_millis()],
        )
        .map_err(|source| StoreError::Write {
            operation: "kv_set",
            source,
        })?;
        Ok(())
    }

    /// Returns whether a row was removed.
    pub fn kv_delete(&self, key: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|source| StoreError::Write {
                operation: "kv_delete",
                source,
            })?;
        Ok(removed > 0)
    }

    pub fn kv_entry(&self, key: &str) -> Result<Option<KvEntry>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT key, value, updated_at FROM kv WHERE key = ?1",
            params![key],
            |row| {
                Ok(KvEntry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|source| StoreError::Read {
            operation: "kv_entry",
            source,
        })
    }

    // -- events ------------------------------------------------------------

    /// Append an event; returns its id.
    pub fn log_event(&self, kind: &str, payload: &serde_json::Value) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO events (ts, kind, payload) VALUES (?1, ?2, ?3)",
            params![now_millis(), kind, payload.to_string()],
        )
        .map_err(|source| StoreError::Write {
            operation: "log_event",
            source,
        })?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent events, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        let read_err = |source| StoreError::Read {
            operation: "recent_events",
            source,
        };
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, ts, kind, payload FROM events ORDER BY id DESC LIMIT ?1")
            .map_err(read_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(Event {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    kind: row.get(2)?,
                    payload: row.get(3)?,
                })
            })
            .map_err(read_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(read_err)
    }

    // -- conversations -----------------------------------------------------

    /// Append a message, creating the conversation on first use and bumping
    /// its `updated_at`. Returns the new message id.
    pub fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        meta: Option<&serde_json::Value>,
    ) -> Result<i64, StoreError> {
        let write_err = |source| StoreError::Write {
            operation: "add_message",
            source,
        };
        let mut conn = self.lock()?;
        let now = now_millis();
        let tx = conn.transaction().map_err(write_err)?;
        tx.execute(
            "INSERT INTO conversations (id, created_at, updated_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
            params![conversation_id, now],
        )
        .map_err(write_err)?;
        tx.execute(
            "INSERT INTO messages (conversation_id, ts, role, content, meta)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                now,
                role.as_str(),
                content,
                meta.map(|m| m.to_string())
            ],
        )
        .map_err(write_err)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(write_err)?;
        Ok(id)
    }

    /// The most recent `limit` messages of a conversation, in chronological
    /// (ascending) order.
    pub fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let read_err = |source| StoreError::Read {
            operation: "get_recent_messages",
            source,
        };
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, conversation_id, ts, role, content, meta FROM messages
                 WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(read_err)?;
        let rows = stmt
            .query_map(params![conversation_id, limit as i64], |row| {
                let role: String = row.get(3)?;
                let meta: Option<String> = row.get(5)?;
                Ok(StoredMessage {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    timestamp: row.get(2)?,
                    role: Role::from_db_str(&role),
                    content: row.get(4)?,
                    meta: meta.and_then(|m| serde_json::from_str(&m).ok()),
                })
            })
            .map_err(read_err)?;
        let mut messages = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_err)?;
        messages.reverse();
        Ok(messages)
    }

    pub fn message_count(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .map_err(|source| StoreError::Read {
                operation: "message_count",
                source,
            })?;
        Ok(count as usize)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, created_at, updated_at, title FROM conversations WHERE id = ?1",
            params![id],
            map_conversation,
        )
        .optional()
        .map_err(|source| StoreError::Read {
            operation: "get_conversation",
            source,
        })
    }

    /// Conversations ordered by most recent activity.
    pub fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>, StoreError> {
        let read_err = |source| StoreError::Read {
            operation: "list_conversations",
            source,
        };
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, created_at, updated_at, title FROM conversations
                 ORDER BY updated_at DESC, id ASC LIMIT ?1",
            )
            .map_err(read_err)?;
        let rows = stmt
            .query_map(params![limit as i64], map_conversation)
            .map_err(read_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(read_err)
    }

    /// Returns false when the conversation does not exist.
    pub fn set_conversation_title(&self, id: &str, title: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE conversations SET title = ?2 WHERE id = ?1",
                params![id, title],
            )
            .map_err(|source| StoreError::Write {
                operation: "set_conversation_title",
                source,
            })?;
        Ok(changed > 0)
    }
}

fn map_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        created_at: row.get(1)?,
        updated_at: row.get(2)?,
        title: row.get(3)?,
    })
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> MemoryStore {
        MemoryStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_kv_roundtrip_and_upsert() {
        let store = store();
        assert_eq!(store.kv_get("theme").unwrap(), None);

        store.kv_set("theme", "dark").unwrap();
        assert_eq!(store.kv_get("theme").unwrap().as_deref(), Some("dark"));

        store.kv_set("theme", "light").unwrap();
        assert_eq!(store.kv_get("theme").unwrap().as_deref(), Some("light"));

        let entry = store.kv_entry("theme").unwrap().unwrap();
        assert_eq!(entry.value, "light");
        assert!(entry.updated_at > 0);
    }

    #[test]
    fn test_kv_delete() {
        let store = store();
        store.kv_set("k", "v").unwrap();
        assert!(store.kv_delete("k").unwrap());
        assert!(!store.kv_delete("k").unwrap());
        assert_eq!(store.kv_get("k").unwrap(), None);
    }

    #[test]
    fn test_event_ids_are_monotonic() {
        let store = store();
        let a = store.log_event("tool_used", &json!({"tool": "a"})).unwrap();
        let b = store.log_event("tool_used", &json!({"tool": "b"})).unwrap();
        assert!(b > a);

        let events = store.recent_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, b);
        assert_eq!(events[0].kind, "tool_used");
        let payload: serde_json::Value = serde_json::from_str(&events[1].payload).unwrap();
        assert_eq!(payload["tool"], "a");
    }

    #[test]
    fn test_add_message_creates_conversation_lazily() {
        let store = store();
        assert!(store.get_conversation("c1").unwrap().is_none());

        store.add_message("c1", Role::User, "hello", None).unwrap();
        let convo = store.get_conversation("c1").unwrap().unwrap();
        assert_eq!(convo.created_at, convo.updated_at);
        assert!(convo.title.is_none());

        store
            .add_message("c1", Role::Assistant, "hi", Some(&json!({"route": "fallback"})))
            .unwrap();
        let after = store.get_conversation("c1").unwrap().unwrap();
        assert!(after.updated_at >= convo.updated_at);
        assert_eq!(after.created_at, convo.created_at);
        assert_eq!(store.message_count("c1").unwrap(), 2);
    }

    #[test]
    fn test_recent_messages_are_chronological_tail() {
        let store = store();
        for i in 0..10 {
            store
                .add_message("c1", Role::User, &format!("m{i}"), None)
                .unwrap();
        }
        store.add_message("other", Role::User, "noise", None).unwrap();

        let recent = store.get_recent_messages("c1", 3).unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m7", "m8", "m9"]);
        assert!(recent.iter().all(|m| m.conversation_id == "c1"));
    }

    #[test]
    fn test_message_meta_roundtrip() {
        let store = store();
        store
            .add_message("c1", Role::Assistant, "ok", Some(&json!({"route": "memory"})))
            .unwrap();
        let msgs = store.get_recent_messages("c1", DEFAULT_RECENT_LIMIT).unwrap();
        assert_eq!(msgs[0].role, Role::Assistant);
        assert_eq!(msgs[0].meta, Some(json!({"route": "memory"})));
    }

    #[test]
    fn test_conversation_title_and_listing() {
        let store = store();
        store.add_message("a", Role::User, "1", None).unwrap();
        store.add_message("b", Role::User, "2", None).unwrap();
        assert!(store.set_conversation_title("a", "First").unwrap());
        assert!(!store.set_conversation_title("missing", "x").unwrap());

        let convos = store.list_conversations(10).unwrap();
        assert_eq!(convos.len(), 2);
        let a = convos.iter().find(|c| c.id == "a").unwrap();
        assert_eq!(a.title.as_deref(), Some("First"));
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        {
            let store = MemoryStore::open(&path, Duration::from_secs(1)).unwrap();
            store.kv_set("theme", "dark").unwrap();
            store.add_message("c1", Role::User, "hello", None).unwrap();
        }
        let store = MemoryStore::open(&path, Duration::from_secs(1)).unwrap();
        assert_eq!(store.location(), Some(path.as_path()));
        assert_eq!(store.kv_get("theme").unwrap().as_deref(), Some("dark"));
        assert_eq!(store.get_recent_messages("c1", 30).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.db");
        std::fs::write(&path, vec![0x5au8; 8192]).unwrap();

        assert!(MemoryStore::open(&path, Duration::from_millis(100)).is_err());
        let store = MemoryStore::open_or_fallback(&path, Duration::from_millis(100)).unwrap();
        assert!(store.location().is_none());
        store.kv_set("k", "v").unwrap();
        assert_eq!(store.kv_get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_clones_share_state() {
        let store = store();
        let clone = store.clone();
        clone.kv_set("shared", "yes").unwrap();
        assert_eq!(store.kv_get("shared").unwrap().as_deref(), Some("yes"));
    }
}
