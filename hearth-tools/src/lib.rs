//! # Hearth Tools
//!
//! The tool registry, the command execution sandbox, and the built-in tools
//! the agent exposes: persistent memory access, host information, process
//! and network inspection, shell execution, session history, and command
//! aliases.

pub mod memory;
pub mod network;
pub mod process;
pub mod registry;
pub mod sandbox;
pub mod session;
pub mod shell;
pub mod system;

use hearth_core::config::HearthConfig;
use hearth_core::preferences::PreferenceStore;
use hearth_core::session::{SessionMemory, SharedSession};
use hearth_core::store::MemoryStore;
use std::sync::Arc;

pub use registry::{Tool, ToolRegistry};
pub use sandbox::{CommandResult, CommandSandbox};

/// State the built-in tools operate on.
#[derive(Clone)]
pub struct BuiltinServices {
    pub store: MemoryStore,
    pub session: SharedSession,
    pub preferences: Arc<PreferenceStore>,
    pub sandbox: CommandSandbox,
}

impl BuiltinServices {
    /// Fresh session memory and a sandbox configured from `config`.
    pub fn new(store: MemoryStore, preferences: Arc<PreferenceStore>, config: &HearthConfig) -> Self {
        Self {
            store,
            session: SessionMemory::new(&config.session).shared(),
            preferences,
            sandbox: CommandSandbox::new(&config.shell),
        }
    }
}

/// Register all built-in tools.
pub fn register_builtin_tools(registry: &mut ToolRegistry, services: &BuiltinServices) {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(memory::MemoryGetTool::new(services.store.clone())),
        Arc::new(memory::MemoryPutTool::new(services.store.clone())),
        Arc::new(memory::MemoryRecentTool::new(services.store.clone())),
        Arc::new(system::SystemInfoTool),
        Arc::new(process::ProcessListTool::new(services.sandbox.clone())),
        Arc::new(process::ProcessInfoTool::new(services.sandbox.clone())),
        Arc::new(process::ProcessKillTool::new(services.sandbox.clone())),
        Arc::new(network::NetworkConnectionsTool::new(services.sandbox.clone())),
        Arc::new(network::PortCheckTool),
        Arc::new(shell::ShellRunTool::new(
            services.sandbox.clone(),
            services.session.clone(),
            services.preferences.clone(),
        )),
        Arc::new(session::SessionRecentTool::new(services.session.clone())),
        Arc::new(session::PrefsAliasTool::new(services.preferences.clone())),
    ];

    for tool in tools {
        if let Err(e) = registry.register(tool) {
            tracing::warn!("Failed to register tool: {}", e);
        }
    }
}
