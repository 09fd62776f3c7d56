//! # Hearth Agent
//!
//! The agent process: speaks the NDJSON envelope protocol with its host,
//! dispatches requests to the tool registry and the memory store, and keeps
//! serving until the host closes the connection.
//!
//! ## Architecture
//!
//! ```text
//! Host <-> MessageSource ──> AgentProcess ──> handler task per envelope ──> Dispatcher
//!      <-  MessageSink  <── writer task  <── bounded outbound queue  <──┘   |-- ToolRegistry
//!                                                                          +-- MemoryStore
//! ```

pub mod chat;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod transport;

use error::ProtocolError;
use handlers::Dispatcher;
use hearth_core::config::{AgentSettings, HearthConfig};
use hearth_core::preferences::PreferenceStore;
use hearth_core::store::MemoryStore;
use hearth_core::types::ToolContext;
use hearth_tools::{BuiltinServices, CommandSandbox, ToolRegistry, register_builtin_tools};
use protocol::{Outbound, parse_inbound};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use transport::{MessageSink, MessageSource};

/// The agent process bound to its registry, store, and base context.
pub struct AgentProcess {
    dispatcher: Arc<Dispatcher>,
    settings: AgentSettings,
}

impl AgentProcess {
    /// Build an agent with every built-in tool registered.
    ///
    /// The base context is bound to the default conversation, carries the
    /// configured capabilities, and runs commands in `working_directory`.
    pub fn new(
        config: &HearthConfig,
        store: MemoryStore,
        preferences: Arc<PreferenceStore>,
        working_directory: Option<std::path::PathBuf>,
    ) -> Self {
        let services = BuiltinServices::new(store.clone(), preferences, config);
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, &services);

        let mut base_context = ToolContext::new(
            config.agent.default_conversation.clone(),
            config.permissions.capability_set(),
        );
        if let Some(dir) = working_directory {
            base_context = base_context.with_working_directory(dir);
        }
        Self::from_parts(
            registry,
            store,
            services.sandbox.clone(),
            base_context,
            config.agent.clone(),
        )
    }

    pub fn from_parts(
        registry: ToolRegistry,
        store: MemoryStore,
        sandbox: CommandSandbox,
        base_context: ToolContext,
        settings: AgentSettings,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            store,
            sandbox,
            base_context,
            settings.default_conversation.clone(),
        );
        Self {
            dispatcher: Arc::new(dispatcher),
            settings,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The handshake sent before any other envelope.
    pub fn ready_envelope(&self) -> Outbound {
        Outbound::Ready {
            pid: std::process::id(),
            version: self.settings.version.clone(),
            tools: self.dispatcher.registry().list(),
        }
    }

    /// Serve envelopes until the source reaches EOF.
    ///
    /// `agent:ping` and `agent:tools:list` are answered from the read loop.
    /// Tool runs and chat turns each get their own task; at most
    /// `max_in_flight` of them execute at once and the rest wait for a
    /// permit without blocking the reader. Replies go through a bounded queue to a single writer. At EOF the
    /// agent waits for in-flight handlers and drains the queue before
    /// returning.
    pub async fn run<R, W>(self, mut source: R, sink: W) -> Result<(), ProtocolError>
    where
        R: MessageSource,
        W: MessageSink + 'static,
    {
        let (tx, rx) = mpsc::channel::<Outbound>(self.settings.outbound_queue.max(1));
        let writer = tokio::spawn(write_loop(sink, rx));

        info!(
            pid = std::process::id(),
            version = %self.settings.version,
            tools = self.dispatcher.registry().len(),
            "Agent ready"
        );
        if tx.send(self.ready_envelope()).await.is_err() {
            warn!("Writer stopped before the ready handshake was sent");
        }

        let permits = Arc::new(Semaphore::new(self.settings.max_in_flight.max(1)));
        let mut handlers = JoinSet::new();

        loop {
            let line = match source.read_message().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("Input closed (EOF), draining in-flight requests");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Transport read error");
                    break;
                }
            };

            while let Some(finished) = handlers.try_join_next() {
                log_join_result(finished);
            }

            if line.trim().is_empty() {
                continue;
            }
            let inbound = match parse_inbound(&line) {
                Ok(inbound) => inbound,
                Err(e) => {
                    debug!(error = %e, "Dropping envelope");
                    continue;
                }
            };

            // Liveness and catalog requests never wait behind tool work.
            if inbound.is_control() {
                for reply in self.dispatcher.handle(inbound).await {
                    if tx.send(reply).await.is_err() {
                        warn!("Writer stopped, dropping reply");
                    }
                }
                continue;
            }

            let permits = permits.clone();
            let dispatcher = self.dispatcher.clone();
            let tx = tx.clone();
            handlers.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                for reply in dispatcher.handle(inbound).await {
                    if tx.send(reply).await.is_err() {
                        break;
                    }
                }
            });
        }

        while let Some(finished) = handlers.join_next().await {
            log_join_result(finished);
        }
        drop(tx);

        match writer.await {
            Ok(result) => result,
            Err(e) => Err(ProtocolError::Transport {
                message: format!("writer task failed: {e}"),
            }),
        }
    }
}

async fn write_loop<W: MessageSink>(
    mut sink: W,
    mut rx: mpsc::Receiver<Outbound>,
) -> Result<(), ProtocolError> {
    while let Some(envelope) = rx.recv().await {
        let line = match envelope.to_line() {
            Ok(line) => line,
            Err(e) => {
                error!(kind = envelope.kind(), error = %e, "Failed to encode envelope");
                continue;
            }
        };
        if let Err(e) = sink.write_message(&line).await {
            error!(error = %e, "Failed to write envelope, stopping output");
            return Err(e);
        }
    }
    sink.close().await
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Envelope handler task failed");
    }
}
