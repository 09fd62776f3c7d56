//! Durable preference store.
//!
//! A single JSON document holding user preferences, the most-recently-used
//! workspace list, command frequency counters, and command aliases. Every
//! mutation rewrites the whole document. Writes are best-effort: a failure
//! is logged and the in-memory copy stays authoritative for the session.

use crate::error::PreferenceError;
use crate::persistence::{atomic_write_json, load_json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Maximum number of remembered workspaces.
pub const WORKSPACE_HISTORY_CAP: usize = 20;
/// Default number of entries returned by [`PreferenceStore::get_top_commands`].
pub const DEFAULT_TOP_COMMANDS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    pub path: String,
    /// Last use, in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// The persisted preference document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferenceDocument {
    pub user_preferences: BTreeMap<String, serde_json::Value>,
    pub workspace_history: Vec<WorkspaceEntry>,
    #[serde(with = "ordered_counts")]
    pub command_patterns: Vec<(String, u64)>,
    pub aliases: BTreeMap<String, String>,
}

impl PreferenceDocument {
    fn push_workspace(&mut self, path: String) {
        self.workspace_history.retain(|entry| entry.path != path);
        self.workspace_history.insert(
            0,
            WorkspaceEntry {
                path,
                timestamp: Utc::now().timestamp_millis(),
            },
        );
        self.workspace_history.truncate(WORKSPACE_HISTORY_CAP);
    }

    fn bump_pattern(&mut self, command: &str) {
        match self.command_patterns.iter_mut().find(|(c, _)| c == command) {
            Some((_, count)) => *count += 1,
            None => self.command_patterns.push((command.to_string(), 1)),
        }
    }
}

/// Thread-safe handle over the preference document.
#[derive(Debug)]
pub struct PreferenceStore {
    path: Option<PathBuf>,
    doc: Mutex<PreferenceDocument>,
}

impl PreferenceStore {
    /// Load the document at `path`, starting empty if it is absent or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = match read_document(&path) {
            Ok(Some(doc)) => doc,
            Ok(None) => PreferenceDocument::default(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Preferences unreadable, starting from defaults"
                );
                PreferenceDocument::default()
            }
        };
        Self {
            path: Some(path),
            doc: Mutex::new(doc),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: Mutex::new(PreferenceDocument::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn document(&self) -> PreferenceDocument {
        self.lock().clone()
    }

    pub fn set_user_preference(&self, key: impl Into<String>, value: serde_json::Value) {
        self.mutate(|doc| {
            doc.user_preferences.insert(key.into(), value);
        });
    }

    pub fn get_user_preference(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().user_preferences.get(key).cloned()
    }

    pub fn all_preferences(&self) -> BTreeMap<String, serde_json::Value> {
        self.lock().user_preferences.clone()
    }

    /// Record `path` as the most recently used workspace.
    pub fn add_workspace(&self, path: impl Into<String>) {
        let path = path.into();
        self.mutate(|doc| doc.push_workspace(path));
    }

    /// Workspaces, most recent first.
    pub fn get_workspace_history(&self) -> Vec<WorkspaceEntry> {
        self.lock().workspace_history.clone()
    }

    pub fn increment_command_pattern(&self, command: &str) {
        self.mutate(|doc| doc.bump_pattern(command));
    }

    /// Count a run of `command` and, when given, move `workspace` to the
    /// front of the history. One document write covers both.
    pub fn record_command(&self, command: &str, workspace: Option<String>) {
        self.mutate(|doc| {
            doc.bump_pattern(command);
            if let Some(path) = workspace {
                doc.push_workspace(path);
            }
        });
    }

    /// Most frequent commands, highest count first; ties keep first-seen order.
    pub fn get_top_commands(&self, limit: usize) -> Vec<(String, u64)> {
        let mut patterns = self.lock().command_patterns.clone();
        // stable sort preserves insertion order among equal counts
        patterns.sort_by(|a, b| b.1.cmp(&a.1));
        patterns.truncate(limit);
        patterns
    }

    pub fn set_alias(&self, alias: impl Into<String>, command: impl Into<String>) {
        self.mutate(|doc| {
            doc.aliases.insert(alias.into(), command.into());
        });
    }

    pub fn get_alias(&self, alias: &str) -> Option<String> {
        self.lock().aliases.get(alias).cloned()
    }

    /// Returns whether the alias existed.
    pub fn remove_alias(&self, alias: &str) -> bool {
        let mut removed = false;
        self.mutate(|doc| removed = doc.aliases.remove(alias).is_some());
        removed
    }

    pub fn get_all_aliases(&self) -> BTreeMap<String, String> {
        self.lock().aliases.clone()
    }

    /// Reset to an empty document and persist it.
    pub fn clear(&self) {
        self.mutate(|doc| *doc = PreferenceDocument::default());
    }

    fn lock(&self) -> MutexGuard<'_, PreferenceDocument> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` and rewrite the document while still holding the lock, so
    /// concurrent mutations land on disk in the order they were applied.
    fn mutate(&self, f: impl FnOnce(&mut PreferenceDocument)) {
        let mut doc = self.lock();
        f(&mut doc);
        if let Some(path) = &self.path {
            if let Err(e) = write_document(path, &doc) {
                tracing::warn!(error = %e, "Failed to persist preferences");
            }
        }
    }
}

fn read_document(path: &Path) -> Result<Option<PreferenceDocument>, PreferenceError> {
    load_json(path).map_err(|source| PreferenceError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write_document(path: &Path, doc: &PreferenceDocument) -> Result<(), PreferenceError> {
    atomic_write_json(path, doc).map_err(|source| PreferenceError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Serializes `Vec<(String, u64)>` as a JSON object whose key order is the
/// vector order, and reads it back in document order.
mod ordered_counts {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(counts: &[(String, u64)], serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(counts.len()))?;
        for (command, count) in counts {
            map.serialize_entry(command, count)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<(String, u64)>, D::Error> {
        struct CountsVisitor;

        impl<'de> Visitor<'de> for CountsVisitor {
            type Value = Vec<(String, u64)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of command to count")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut counts: Vec<(String, u64)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((command, count)) = access.next_entry::<String, u64>()? {
                    match counts.iter_mut().find(|(c, _)| *c == command) {
                        Some(existing) => existing.1 = count,
                        None => counts.push((command, count)),
                    }
                }
                Ok(counts)
            }
        }

        deserializer.deserialize_map(CountsVisitor)
    }
}
