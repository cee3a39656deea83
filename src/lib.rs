// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Faber — agent orchestration engine for an autonomous coding assistant.
//!
//! This crate wires the subsystems together: settings, the model stream
//! client, the tool catalogue, the agent loops, the project supervisor, and
//! the file-watch hub.  The HTTP transport, auth, and durable persistence
//! are collaborators supplied by the embedding application; the engine
//! exposes typed streams they serialize.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use faber_config::Settings;
use faber_core::single::ProjectLauncher;
use faber_core::{DualAgent, Persistence, SingleAgent, StreamChunk, TurnRequest};
use faber_model::OpenAiCompatClient;
use faber_project::{
    FileChangeEvent, ProjectEvent, ProjectStatus, Supervisor, WatchHub, WatchSubscription,
};

pub use faber_config::{load as load_settings, Mode};
pub use faber_core::{
    Conversation, MemoryStore, MessageRole, MessageStatus, NewMessage, StoredMessage,
};
pub use faber_model::probe_models;

/// Initialise tracing once for the host process.  Filtering follows
/// `FABER_LOG` (`info` default); output goes to stderr.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("FABER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Everything a subscriber can observe for one project: agent turn chunks,
/// supervisor lifecycle events, and filesystem changes.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Chunk(StreamChunk),
    Project(ProjectEvent),
    FileChange(FileChangeEvent),
}

/// A running turn: its chunk stream plus the cancellation handle.
pub struct TurnStream {
    rx: mpsc::Receiver<StreamChunk>,
    cancel: Option<oneshot::Sender<()>>,
}

impl TurnStream {
    /// Next chunk, `None` after `done`.
    pub async fn next(&mut self) -> Option<StreamChunk> {
        self.rx.recv().await
    }

    /// Abort the turn at its next suspension point.  Files already written
    /// stay written.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        // Dropping the receiver alone would leave the loop running against a
        // dead channel; closing the cancel side ends it promptly.
        self.cancel();
    }
}

pub struct Engine {
    settings: Settings,
    store: Arc<dyn Persistence>,
    supervisor: Arc<Supervisor>,
    watch_hub: Arc<WatchHub>,
}

impl Engine {
    pub fn new(settings: Settings, store: Arc<dyn Persistence>) -> Self {
        Self {
            settings,
            store,
            supervisor: Arc::new(Supervisor::new()),
            watch_hub: Arc::new(WatchHub::new()),
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn watch_hub(&self) -> &Arc<WatchHub> {
        &self.watch_hub
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Connectivity probe against the configured endpoint.
    pub async fn probe(&self) -> anyhow::Result<Vec<String>> {
        probe_models(&self.settings.endpoint_url).await
    }

    /// Start one turn for a conversation.  Chunks arrive on the returned
    /// stream; the loop runs until `done` even if the caller stops reading
    /// mid-way (cancellation is explicit or by dropping the stream).
    pub fn submit_turn(&self, conversation_id: &str, user_text: &str) -> TurnStream {
        let (tx, rx) = mpsc::channel(256);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let req = TurnRequest {
            conversation_id: conversation_id.to_string(),
            user_text: user_text.to_string(),
        };

        let client = Arc::new(OpenAiCompatClient::new(
            &self.settings.endpoint_url,
            self.settings.model_name.clone(),
            self.settings.max_tokens,
            self.settings.temperature,
        ));
        let launcher: Arc<dyn ProjectLauncher> =
            Arc::new(SupervisorLauncher(Arc::clone(&self.supervisor)));
        let single = SingleAgent::new(
            Arc::clone(&self.store),
            Arc::clone(&client) as Arc<dyn faber_model::ModelProvider>,
            self.settings.clone(),
        )
        .with_runtime(Arc::clone(&self.supervisor) as Arc<dyn faber_tools::ProjectRuntime>)
        .with_launcher(launcher)
        .with_review_model(Arc::new(client.with_model(
            self.settings.model_name.clone(),
            0.2,
        )));

        if self.settings.dual_model_enabled {
            let planner = Arc::new(client.with_model(
                self.settings.planner_model().to_string(),
                self.settings.temperature,
            ));
            let coder = Arc::new(client.with_model(
                self.settings.coder_model().to_string(),
                self.settings.temperature,
            ));
            let dual = DualAgent::new(planner, coder, single);
            tokio::spawn(async move {
                if let Err(e) = dual.run_turn(req, tx, cancel_rx).await {
                    warn!("dual turn ended with error: {e:#}");
                }
            });
        } else {
            tokio::spawn(async move {
                if let Err(e) = single.run_turn(req, tx, cancel_rx).await {
                    warn!("turn ended with error: {e:#}");
                }
            });
        }

        TurnStream {
            rx,
            cancel: Some(cancel_tx),
        }
    }

    /// Subscribe to everything happening around one project: supervisor
    /// log/status/port events and coalesced file changes, multiplexed onto a
    /// single ordered-per-source stream.  The watcher reference is released
    /// when the returned receiver is dropped.
    pub fn subscribe_project(&self, project_dir: &Path) -> anyhow::Result<mpsc::Receiver<EngineEvent>> {
        let (tx, rx) = mpsc::channel(256);
        let project: PathBuf = project_dir
            .canonicalize()
            .unwrap_or_else(|_| project_dir.to_path_buf());

        // Supervisor fan-out, filtered to this project.
        let mut sup_rx = self.supervisor.subscribe();
        let sup_tx = tx.clone();
        let sup_project = project.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    received = sup_rx.recv() => match received {
                        Ok(e) => e,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    },
                    // Subscriber went away; stop forwarding.
                    _ = sup_tx.closed() => break,
                };
                let matches = match &event {
                    ProjectEvent::Log { project, .. }
                    | ProjectEvent::Status { project, .. }
                    | ProjectEvent::PortChanged { project, .. } => *project == sup_project,
                };
                if matches && sup_tx.send(EngineEvent::Project(event)).await.is_err() {
                    break;
                }
            }
        });

        // File watcher, refcounted through the hub.
        let mut watch: WatchSubscription = self.watch_hub.subscribe(&project)?;
        let watch_tx = tx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    change = watch.recv() => match change {
                        Some(c) => {
                            if watch_tx.send(EngineEvent::FileChange(c)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = watch_tx.closed() => break,
                }
            }
            // `watch` drops here, releasing the hub reference.
        });

        Ok(rx)
    }
}

/// Adapter giving the core loop start authority over the supervisor.
struct SupervisorLauncher(Arc<Supervisor>);

#[async_trait]
impl ProjectLauncher for SupervisorLauncher {
    async fn ensure_started(&self, project_dir: &Path) -> Result<u16, String> {
        if let Some((status, port)) = self.0.status(project_dir).await {
            if matches!(status, ProjectStatus::Starting | ProjectStatus::Running) {
                return Ok(port);
            }
        }
        self.0.start(project_dir).await.map_err(|e| format!("{e:#}"))
    }
}
