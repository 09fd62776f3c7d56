//! Ephemeral session memory.
//!
//! Newest-first ring buffers of recent commands and outputs, a scratch
//! key/value map, and a text buffer for accumulating streamed output.
//! Nothing here survives a process restart.

use crate::config::SessionConfig;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Session memory shared between the agent and its tools.
pub type SharedSession = Arc<Mutex<SessionMemory>>;

#[derive(Debug, Clone)]
pub struct SessionMemory {
    recent_commands: VecDeque<String>,
    recent_outputs: VecDeque<String>,
    values: HashMap<String, serde_json::Value>,
    buffer: String,
    commands_cap: usize,
    outputs_cap: usize,
}

/// Counts describing the current session contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub commands: usize,
    pub outputs: usize,
    pub values: usize,
    pub buffer_len: usize,
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

impl SessionMemory {
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_caps(config.recent_commands_cap, config.recent_outputs_cap)
    }

    pub fn with_caps(commands_cap: usize, outputs_cap: usize) -> Self {
        Self {
            recent_commands: VecDeque::with_capacity(commands_cap),
            recent_outputs: VecDeque::with_capacity(outputs_cap),
            values: HashMap::new(),
            buffer: String::new(),
            commands_cap,
            outputs_cap,
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn add_command(&mut self, command: impl Into<String>) {
        push_front_capped(&mut self.recent_commands, command.into(), self.commands_cap);
    }

    /// Recent commands, newest first.
    pub fn get_recent_commands(&self) -> Vec<String> {
        self.recent_commands.iter().cloned().collect()
    }

    pub fn add_output(&mut self, output: impl Into<String>) {
        push_front_capped(&mut self.recent_outputs, output.into(), self.outputs_cap);
    }

    /// Recent outputs, newest first.
    pub fn get_recent_outputs(&self) -> Vec<String> {
        self.recent_outputs.iter().cloned().collect()
    }

    pub fn set_session_value(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get_session_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Drop the scratch key/value map only.
    pub fn clear_session(&mut self) {
        self.values.clear();
    }

    pub fn add_to_buffer(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    pub fn get_buffer(&self) -> &str {
        &self.buffer
    }

    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Reset everything, keeping the configured capacities.
    pub fn clear(&mut self) {
        self.recent_commands.clear();
        self.recent_outputs.clear();
        self.values.clear();
        self.buffer.clear();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            commands: self.recent_commands.len(),
            outputs: self.recent_outputs.len(),
            values: self.values.len(),
            buffer_len: self.buffer.len(),
        }
    }
}

fn push_front_capped(ring: &mut VecDeque<String>, item: String, cap: usize) {
    ring.push_front(item);
    ring.truncate(cap);
}
