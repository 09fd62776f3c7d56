//! Configuration system for Hearth.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! explicit config file -> environment -> CLI overrides. The user file lives
//! at `<config_dir>/hearth/config.toml`.

use crate::error::ConfigError;
use crate::permissions::{Capability, CapabilitySet};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the agent runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HearthConfig {
    pub agent: AgentSettings,
    pub storage: StorageConfig,
    pub shell: ShellConfig,
    pub session: SessionConfig,
    pub permissions: PermissionsConfig,
    pub logging: LoggingConfig,
}

/// Agent process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Version tag advertised in the ready handshake.
    pub version: String,
    /// Maximum number of envelope handlers running at once.
    pub max_in_flight: usize,
    /// Capacity of the outbound reply queue.
    pub outbound_queue: usize,
    /// Conversation used when an envelope carries no `convoId`.
    pub default_conversation: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            max_in_flight: 32,
            outbound_queue: 256,
            default_conversation: "default".to_string(),
        }
    }
}

/// Where the persistent stores live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory; defaults to the per-user data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// File name of the SQLite memory database.
    pub memory_db: String,
    /// File name of the preference document.
    pub preferences_file: String,
    /// How long a writer waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            memory_db: "memory.db".to_string(),
            preferences_file: "preferences.json".to_string(),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Command sandbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub default_timeout_ms: u64,
    /// Per-stream capture cap; further output is discarded.
    pub max_output_bytes: usize,
    /// Shell interpreter used to run commands.
    pub program: String,
    /// Time allowed to drain pipes after a timed-out child is killed.
    pub kill_grace_ms: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 15_000,
            max_output_bytes: 2 * 1024 * 1024,
            program: default_shell_program().to_string(),
            kill_grace_ms: 250,
        }
    }
}

fn default_shell_program() -> &'static str {
    if cfg!(windows) { "cmd" } else { "sh" }
}

/// Ephemeral session memory capacities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub recent_commands_cap: usize,
    pub recent_outputs_cap: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recent_commands_cap: 50,
            recent_outputs_cap: 100,
        }
    }
}

/// Capabilities granted to the session at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub granted: Vec<Capability>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            granted: Capability::ALL.to_vec(),
        }
    }
}

impl PermissionsConfig {
    pub fn capability_set(&self) -> CapabilitySet {
        self.granted.iter().copied().collect()
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write JSON logs to a daily-rolling file.
    pub file_logging: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_logging: true,
            log_dir: None,
        }
    }
}

impl HearthConfig {
    /// Resolved base data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .or_else(|| project_dirs().map(|d| d.data_dir().to_path_buf()))
            .unwrap_or_else(|| PathBuf::from(".hearth"))
    }

    pub fn memory_db_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.memory_db)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.preferences_file)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.logging
            .log_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("logs"))
    }

    /// Reject settings the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.agent.max_in_flight == 0 {
            problems.push("agent.max_in_flight must be at least 1");
        }
        if self.agent.outbound_queue == 0 {
            problems.push("agent.outbound_queue must be at least 1");
        }
        if self.shell.default_timeout_ms == 0 {
            problems.push("shell.default_timeout_ms must be positive");
        }
        if self.shell.program.trim().is_empty() {
            problems.push("shell.program must not be empty");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                message: problems.join("; "),
            })
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "hearth", "hearth")
}

/// Path of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `HEARTH_`, nested with `__`)
/// 3. Explicit config file (`--config`)
/// 4. User config (`<config_dir>/hearth/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    config_file: Option<&Path>,
    overrides: Option<&HearthConfig>,
) -> Result<HearthConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(HearthConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // HEARTH_SHELL__DEFAULT_TIMEOUT_MS, HEARTH_STORAGE__DATA_DIR, ...
    figment = figment.merge(Env::prefixed("HEARTH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: HearthConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
