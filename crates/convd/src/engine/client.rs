//! Engine RPC client.
//!
//! Manages communication with an engine subprocess via stdin/stdout.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};

use super::types::*;

/// Configuration for the engine client.
#[derive(Debug, Clone)]
pub struct EngineClientConfig {
    /// Buffer size for the event broadcast channel.
    pub event_buffer_size: usize,
    /// Buffer size for the command channel.
    pub command_buffer_size: usize,
}

impl Default for EngineClientConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 256,
            command_buffer_size: 64,
        }
    }
}

/// Client for communicating with an engine subprocess.
pub struct EngineClient {
    /// Channel to send serialized commands to the engine.
    command_tx: mpsc::Sender<String>,
    /// Broadcast channel for events from the engine.
    event_tx: broadcast::Sender<AgentEvent>,
    /// Pending response receivers (keyed by request ID).
    pending_responses:
        Arc<RwLock<std::collections::HashMap<String, tokio::sync::oneshot::Sender<EngineResponse>>>>,
    /// Counter for generating unique request IDs.
    request_counter: Arc<Mutex<u64>>,
    /// The engine process, kept for the final kill on shutdown.
    child: Mutex<Child>,
    /// Handles to the background tasks.
    _handles: Vec<tokio::task::JoinHandle<()>>,
}

impl EngineClient {
    /// Create a new engine client from a child process.
    ///
    /// Takes ownership of the child's stdin/stdout for communication.
    pub fn new(mut child: Child, config: EngineClientConfig) -> Result<Self> {
        let stdin = child.stdin.take().context("engine process has no stdin")?;
        let stdout = child.stdout.take().context("engine process has no stdout")?;

        let (command_tx, command_rx) = mpsc::channel::<String>(config.command_buffer_size);
        let (event_tx, _) = broadcast::channel::<AgentEvent>(config.event_buffer_size);
        let pending_responses = Arc::new(RwLock::new(std::collections::HashMap::new()));

        let stdin_handle = tokio::spawn(Self::stdin_writer_task(stdin, command_rx));

        let stdout_handle = tokio::spawn(Self::stdout_reader_task(
            stdout,
            event_tx.clone(),
            Arc::clone(&pending_responses),
        ));

        // Stderr is only drained for logging
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(Self::stderr_reader_task(stderr));
        }

        Ok(Self {
            command_tx,
            event_tx,
            pending_responses,
            request_counter: Arc::new(Mutex::new(0)),
            child: Mutex::new(child),
            _handles: vec![stdin_handle, stdout_handle],
        })
    }

    /// Generate a unique request ID.
    async fn next_request_id(&self) -> String {
        let mut counter = self.request_counter.lock().await;
        *counter += 1;
        format!("req-{}", *counter)
    }

    /// Send a command to the engine and wait for its acknowledgement.
    pub async fn send_command(&self, command: EngineCommand) -> Result<EngineResponse> {
        let request_id = self.next_request_id().await;

        let json = serialize_command_with_id(&command, &request_id)?;

        let (response_tx, response_rx) = tokio::sync::oneshot::channel();
        {
            let mut pending = self.pending_responses.write().await;
            pending.insert(request_id.clone(), response_tx);
        }

        self.command_tx
            .send(json)
            .await
            .context("failed to send command to engine")?;

        let response = tokio::time::timeout(std::time::Duration::from_secs(30), response_rx)
            .await
            .context("timeout waiting for engine response")?
            .context("response channel closed")?;

        Ok(response)
    }

    /// Subscribe to events from the engine.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    /// Start the agent loop.
    pub async fn initialize(
        &self,
        model: Option<&str>,
        directories: &[String],
    ) -> Result<EngineResponse> {
        let response = self
            .send_command(EngineCommand::Initialize {
                id: None,
                model: model.map(|m| m.to_string()),
                directories: directories.to_vec(),
            })
            .await?;
        if !response.success {
            anyhow::bail!(
                "engine initialize failed: {}",
                response.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(response)
    }

    /// Send a prompt to the agent.
    pub async fn prompt(&self, message: &str) -> Result<EngineResponse> {
        self.send_command(EngineCommand::Prompt {
            id: None,
            message: message.to_string(),
        })
        .await
    }

    /// Abort the current turn.
    pub async fn interrupt(&self) -> Result<EngineResponse> {
        self.send_command(EngineCommand::Interrupt { id: None }).await
    }

    /// Shut the engine down: ask nicely first, then kill the process.
    pub async fn shutdown(&self) {
        let shutdown = self.send_command(EngineCommand::Shutdown { id: None });
        match tokio::time::timeout(std::time::Duration::from_secs(5), shutdown).await {
            Ok(Ok(_)) => debug!("Engine acknowledged shutdown"),
            Ok(Err(e)) => debug!("Engine shutdown command failed: {:?}", e),
            Err(_) => debug!("Engine shutdown command timed out"),
        }

        let mut child = self.child.lock().await;
        if let Err(e) = child.start_kill() {
            debug!("Killing engine process failed (already gone?): {:?}", e);
        }
        let _ = child.wait().await;
    }

    // ========================================================================
    // Internal tasks
    // ========================================================================

    async fn stdin_writer_task(
        mut stdin: tokio::process::ChildStdin,
        mut command_rx: mpsc::Receiver<String>,
    ) {
        debug!("Engine stdin writer task started");
        while let Some(command) = command_rx.recv().await {
            let line = format!("{}\n", command);
            // Safely truncate for logging, respecting Unicode char boundaries
            let display_cmd: String = command.chars().take(200).collect();
            debug!("Sending to engine: {}", display_cmd);
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                error!("Failed to write to engine stdin: {:?}", e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                error!("Failed to flush engine stdin: {:?}", e);
                break;
            }
        }
        debug!("Engine stdin writer task ended");
    }

    async fn stdout_reader_task(
        stdout: tokio::process::ChildStdout,
        event_tx: broadcast::Sender<AgentEvent>,
        pending_responses: Arc<
            RwLock<std::collections::HashMap<String, tokio::sync::oneshot::Sender<EngineResponse>>>,
        >,
    ) {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();

        debug!("Engine stdout reader task started");

        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }

            match EngineMessage::parse(&line) {
                Ok(EngineMessage::Response(response)) => {
                    if let Some(ref id) = response.id {
                        let mut pending = pending_responses.write().await;
                        if let Some(tx) = pending.remove(id) {
                            let _ = tx.send(response);
                        } else {
                            warn!("Received response for unknown request ID: {}", id);
                        }
                    } else {
                        warn!("Response has no ID: {:?}", response);
                    }
                }
                Ok(EngineMessage::Event(event)) => {
                    // Broadcast to subscribers; nobody listening is fine
                    let _ = event_tx.send(event);
                }
                Err(e) => {
                    // Safely truncate for logging, respecting Unicode char boundaries
                    let display_line: String = line.chars().take(200).collect();
                    warn!("Failed to parse engine message: {:?}, line: {}", e, display_line);
                }
            }
        }
        info!("Engine stdout reader task ended");
    }

    async fn stderr_reader_task(stderr: tokio::process::ChildStderr) {
        let reader = BufReader::new(stderr);
        let mut lines = reader.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                warn!("Engine stderr: {}", line);
            }
        }
        debug!("Engine stderr reader task ended");
    }
}

fn serialize_command_with_id(command: &EngineCommand, id: &str) -> Result<String> {
    // Serialize to Value first, then inject the ID
    let mut value = serde_json::to_value(command).context("failed to serialize command")?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("id".to_string(), serde_json::Value::String(id.to_string()));
    }
    serde_json::to_string(&value).context("failed to stringify command")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_injects_request_id() {
        let cmd = EngineCommand::Interrupt { id: None };
        let json = serialize_command_with_id(&cmd, "req-7").unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "interrupt");
        assert_eq!(value["id"], "req-7");
    }

    #[test]
    fn test_serialize_overrides_existing_id() {
        let cmd = EngineCommand::Prompt {
            id: Some("stale".to_string()),
            message: "hello".to_string(),
        };
        let json = serialize_command_with_id(&cmd, "req-2").unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["id"], "req-2");
    }
}
