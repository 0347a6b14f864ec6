//! Session worker: one background task per live session.
//!
//! The worker owns the engine subprocess for its session. Everything else
//! talks to it through the handle: commands go in over a channel, agent
//! events come out over the session's point-to-point queue.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};

use crate::engine::{AgentEvent, AuthMode, EngineClient, EngineClientConfig, EngineConfig};
use crate::monitor::Monitor;
use crate::session::models::{Message, WorkerStatus};
use crate::store::SessionStore;

/// Commands accepted by a running worker.
#[derive(Debug)]
pub enum WorkerCommand {
    /// Run one turn with this user message.
    Send(String),
    /// Abort the current turn, if any.
    Interrupt,
    /// Shut the session down.
    Stop,
}

/// Everything a worker needs to bring its engine up.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub engine: EngineConfig,
    pub auth_mode: AuthMode,
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// The engine's working directory.
    pub work_dir: PathBuf,
}

/// Shared handle to a session worker.
pub struct SessionHandle {
    pub session_id: String,
    pub directories: Vec<String>,
    pub auth_mode: AuthMode,
    /// The engine's working directory.
    pub work_dir: PathBuf,
    connected: AtomicBool,
    status: RwLock<WorkerStatus>,
    cmd_tx: mpsc::UnboundedSender<WorkerCommand>,
    event_tx: mpsc::UnboundedSender<AgentEvent>,
    /// Receiving end of the session's event queue. Mutex-guarded so only
    /// one stream drains it at a time.
    events: Arc<Mutex<mpsc::UnboundedReceiver<AgentEvent>>>,
    store: SessionStore,
    monitor: Monitor,
}

impl SessionHandle {
    /// Whether the engine handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> WorkerStatus {
        *self.status.read().await
    }

    /// The session's event queue, for the streaming endpoint.
    pub fn events(&self) -> Arc<Mutex<mpsc::UnboundedReceiver<AgentEvent>>> {
        Arc::clone(&self.events)
    }

    /// Submit a user message for the next turn.
    ///
    /// Fire-and-forget: persistence and dispatch happen here, the turn
    /// itself runs in the worker. If the engine never connected, the
    /// caller finds out on the event stream, not as a request error.
    pub async fn send_message(&self, content: &str) {
        if !self.is_connected() {
            self.push_event(AgentEvent::turn_error(
                "session is not connected to the engine yet",
            ))
            .await;
            return;
        }

        if let Err(e) = self
            .store
            .append_message(&self.session_id, Message::user(content))
            .await
        {
            warn!(
                "Failed to persist user message for {}: {:?}",
                self.session_id, e
            );
        }
        self.monitor
            .upload_chunk(&serde_json::json!({"type": "user", "content": content}));

        if self
            .cmd_tx
            .send(WorkerCommand::Send(content.to_string()))
            .is_err()
        {
            self.push_event(AgentEvent::turn_error("session worker has stopped"))
                .await;
        }
    }

    /// Abort the current turn. No-op while disconnected or idle.
    pub fn interrupt(&self) {
        if self.is_connected() {
            let _ = self.cmd_tx.send(WorkerCommand::Interrupt);
        }
    }

    /// Ask the worker to shut down. Safe to call any number of times.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(WorkerCommand::Stop);
    }

    /// Forward an event to the queue, the monitor, and the transcript.
    async fn push_event(&self, event: AgentEvent) {
        if let Ok(chunk) = serde_json::to_value(&event) {
            self.monitor.upload_chunk(&chunk);
        }

        if let AgentEvent::Assistant { ref content } = event {
            match serde_json::to_value(content) {
                Ok(blocks) => {
                    if let Err(e) = self
                        .store
                        .append_message(&self.session_id, Message::assistant(blocks))
                        .await
                    {
                        warn!(
                            "Failed to persist assistant message for {}: {:?}",
                            self.session_id, e
                        );
                    }
                }
                Err(e) => warn!("Failed to serialize assistant content: {:?}", e),
            }
        }

        // Receiver gone means nobody will ever read this session again
        let _ = self.event_tx.send(event);
    }

    async fn set_status(&self, status: WorkerStatus) {
        *self.status.write().await = status;
    }
}

/// Spawns and runs session workers.
pub struct SessionWorker;

impl SessionWorker {
    /// Spawn the worker task and return its handle immediately.
    ///
    /// Connection happens in the background; callers observe progress
    /// through `status()` / `is_connected()` and the event queue.
    pub fn spawn(
        session_id: &str,
        directories: Vec<String>,
        config: WorkerConfig,
        store: SessionStore,
        monitor: Monitor,
    ) -> Arc<SessionHandle> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let handle = Arc::new(SessionHandle {
            session_id: session_id.to_string(),
            directories,
            auth_mode: config.auth_mode,
            work_dir: config.work_dir.clone(),
            connected: AtomicBool::new(false),
            status: RwLock::new(WorkerStatus::Starting),
            cmd_tx,
            event_tx,
            events: Arc::new(Mutex::new(event_rx)),
            store,
            monitor,
        });

        tokio::spawn(Self::run(Arc::clone(&handle), cmd_rx, config));

        handle
    }

    async fn run(
        handle: Arc<SessionHandle>,
        mut cmd_rx: mpsc::UnboundedReceiver<WorkerCommand>,
        config: WorkerConfig,
    ) {
        handle.set_status(WorkerStatus::Connecting).await;

        let env = config.engine.auth_env(
            config.auth_mode,
            config.api_key.as_deref(),
            &handle.session_id,
        );

        let child = Command::new(&config.engine.executable)
            .current_dir(&config.work_dir)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                Self::fail_connection(
                    &handle,
                    format!("failed to start engine '{}': {}", config.engine.executable, e),
                )
                .await;
                return;
            }
        };

        let client = match EngineClient::new(child, EngineClientConfig::default()) {
            Ok(client) => client,
            Err(e) => {
                Self::fail_connection(&handle, format!("engine setup failed: {}", e)).await;
                return;
            }
        };

        // Subscribe before the handshake so nothing emitted during
        // initialization is lost.
        let mut engine_events = client.subscribe();

        let model = config.model.or_else(|| config.engine.model.clone());
        if let Err(e) = client
            .initialize(model.as_deref(), &handle.directories)
            .await
        {
            Self::fail_connection(&handle, format!("engine handshake failed: {}", e)).await;
            client.shutdown().await;
            return;
        }

        handle.connected.store(true, Ordering::SeqCst);
        handle.set_status(WorkerStatus::Connected).await;
        info!(
            "Session {} connected (auth mode: {})",
            handle.session_id, handle.auth_mode
        );

        // Messages that arrived while a turn was already running
        let mut deferred: VecDeque<String> = VecDeque::new();

        loop {
            let command = match deferred.pop_front() {
                Some(message) => WorkerCommand::Send(message),
                None => match cmd_rx.recv().await {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                WorkerCommand::Send(message) => {
                    let stop = Self::run_turn(
                        &handle,
                        &client,
                        &mut cmd_rx,
                        &mut engine_events,
                        &mut deferred,
                        &message,
                    )
                    .await;
                    if stop {
                        break;
                    }
                }
                WorkerCommand::Interrupt => {
                    // Nothing running, nothing to abort
                    debug!("Interrupt for idle session {} ignored", handle.session_id);
                }
                WorkerCommand::Stop => break,
            }
        }

        handle.set_status(WorkerStatus::Disconnecting).await;
        handle.connected.store(false, Ordering::SeqCst);
        client.shutdown().await;
        handle.set_status(WorkerStatus::Stopped).await;
        info!("Session {} stopped", handle.session_id);
    }

    /// Run one turn. Returns true if the worker should shut down.
    async fn run_turn(
        handle: &SessionHandle,
        client: &EngineClient,
        cmd_rx: &mut mpsc::UnboundedReceiver<WorkerCommand>,
        engine_events: &mut broadcast::Receiver<AgentEvent>,
        deferred: &mut VecDeque<String>,
        message: &str,
    ) -> bool {
        handle.set_status(WorkerStatus::Processing).await;

        match client.prompt(message).await {
            Ok(response) if response.success => {}
            Ok(response) => {
                handle
                    .push_event(AgentEvent::turn_error(format!(
                        "engine rejected prompt: {}",
                        response.error.as_deref().unwrap_or("unknown error")
                    )))
                    .await;
                handle.set_status(WorkerStatus::Connected).await;
                return false;
            }
            Err(e) => {
                handle
                    .push_event(AgentEvent::turn_error(format!("prompt failed: {}", e)))
                    .await;
                handle.set_status(WorkerStatus::Connected).await;
                return false;
            }
        }

        loop {
            tokio::select! {
                event = engine_events.recv() => match event {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        handle.push_event(event).await;
                        if terminal {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            "Session {} dropped {} engine events (slow consumer)",
                            handle.session_id, skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        handle
                            .push_event(AgentEvent::turn_error(
                                "engine event stream closed mid-turn",
                            ))
                            .await;
                        break;
                    }
                },
                command = cmd_rx.recv() => match command {
                    Some(WorkerCommand::Interrupt) => {
                        // The engine emits its own terminal event after an
                        // abort; keep draining until it arrives.
                        if let Err(e) = client.interrupt().await {
                            warn!(
                                "Interrupt for session {} failed: {:?}",
                                handle.session_id, e
                            );
                        }
                    }
                    Some(WorkerCommand::Send(next)) => {
                        deferred.push_back(next);
                    }
                    Some(WorkerCommand::Stop) | None => {
                        let _ = client.interrupt().await;
                        return true;
                    }
                },
            }
        }

        handle.set_status(WorkerStatus::Connected).await;
        false
    }

    async fn fail_connection(handle: &SessionHandle, message: String) {
        warn!("Session {} connection failed: {}", handle.session_id, message);
        handle.push_event(AgentEvent::connection_error(message)).await;
        handle.set_status(WorkerStatus::Stopped).await;
    }
}
