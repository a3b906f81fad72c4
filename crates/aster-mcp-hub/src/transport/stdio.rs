//! Stdio transport
//!
//! Spawns the server as a child process and exchanges newline-delimited
//! JSON-RPC messages over its stdin/stdout. Stderr is forwarded to the log.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{broadcast, mpsc};

use super::base::{Transport, TransportEvent, TransportState, EVENT_CHANNEL_CAPACITY};
use super::pending::PendingRequests;
use crate::error::{McpError, McpResult};
use crate::protocol::{McpMessage, McpRequest, McpResponse};
use crate::sync::{AbortController, AbortReason, AbortSignal};
use crate::types::TransportType;

/// Environment variable carrying the caller's session id
pub const SESSION_ENV_VAR: &str = "MCP_SESSION_ID";

const OUTGOING_QUEUE_SIZE: usize = 256;

/// Stdio-specific configuration
#[derive(Debug, Clone)]
pub struct StdioConfig {
    /// Server name, used in log fields
    pub server_name: String,
    pub command: String,
    pub args: Vec<String>,
    /// Variables set on top of the inherited process environment
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// Overrides applied on top of the inherited environment:
/// per-server values, then per-creation values, then the session id.
pub fn merge_environment(
    server_env: &HashMap<String, String>,
    creation_env: &HashMap<String, String>,
    session_id: Option<&str>,
) -> HashMap<String, String> {
    let mut merged = server_env.clone();
    merged.extend(creation_env.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(session_id) = session_id {
        merged.insert(SESSION_ENV_VAR.to_string(), session_id.to_string());
    }
    merged
}

/// Resolve a bare command name to an executable on `PATH`.
///
/// Paths are returned unchanged. On Windows `which` also finds `.cmd`/`.exe`
/// shims through `PATHEXT`, and `python3` falls back to `python`.
pub fn resolve_command(command: &str) -> PathBuf {
    let path = Path::new(command);
    if path.is_absolute() || path.components().count() > 1 {
        return path.to_path_buf();
    }
    if let Ok(found) = which::which(command) {
        return found;
    }
    if cfg!(windows) && command == "python3" {
        if let Ok(found) = which::which("python") {
            return found;
        }
    }
    path.to_path_buf()
}

/// Stdio transport for MCP communication
pub struct StdioTransport {
    config: StdioConfig,
    state: Arc<RwLock<TransportState>>,
    child: tokio::sync::Mutex<Option<Child>>,
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
    pending: Arc<PendingRequests>,
    events: broadcast::Sender<TransportEvent>,
    shutdown: Mutex<Option<AbortController>>,
}

impl StdioTransport {
    pub fn new(config: StdioConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            state: Arc::new(RwLock::new(TransportState::Disconnected)),
            child: tokio::sync::Mutex::new(None),
            outgoing: Mutex::new(None),
            pending: Arc::new(PendingRequests::default()),
            events,
            shutdown: Mutex::new(None),
        }
    }

    fn spawn_error(&self, message: String, source: std::io::Error) -> McpError {
        McpError::stdio_process(
            message,
            &self.config.command,
            &self.config.args,
            Some(Box::new(source)),
        )
    }

    fn start_reader_task(&self, stdout: ChildStdout, shutdown: AbortSignal) {
        let pending = Arc::clone(&self.pending);
        let events = self.events.clone();
        let state = Arc::clone(&self.state);
        let server = self.config.server_name.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() {
                                pending.dispatch_text(trimmed, &events);
                            }
                        }
                        Ok(None) => {
                            tracing::debug!(server = %server, "server process closed stdout");
                            *state.write() = TransportState::Disconnected;
                            pending.cancel_all("process exited");
                            let _ = events.send(TransportEvent::Disconnected {
                                reason: Some("process exited".to_string()),
                            });
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(server = %server, error = %e, "failed reading server stdout");
                            *state.write() = TransportState::Error;
                            pending.cancel_all("read error");
                            let _ = events.send(TransportEvent::Error { error: e.to_string() });
                            break;
                        }
                    },
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    fn start_writer_task(&self, mut stdin: ChildStdin, mut outgoing: mpsc::Receiver<String>) {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();

        tokio::spawn(async move {
            while let Some(message) = outgoing.recv().await {
                let written = async {
                    stdin.write_all(message.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                }
                .await;
                if let Err(e) = written {
                    *state.write() = TransportState::Error;
                    let _ = events.send(TransportEvent::Error {
                        error: e.to_string(),
                    });
                    break;
                }
            }
        });
    }

    fn start_stderr_task(&self, stderr: ChildStderr, shutdown: AbortSignal) {
        let server = self.config.server_name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Ok(Some(line))) = shutdown.race(lines.next_line()).await {
                tracing::debug!(server = %server, "stderr: {}", line);
            }
        });
    }

    fn ensure_connected(&self) -> McpResult<()> {
        if *self.state.read() != TransportState::Connected {
            return Err(McpError::transport(format!(
                "stdio transport for '{}' is not connected",
                self.config.server_name
            )));
        }
        Ok(())
    }

    async fn write_line(&self, line: String) -> McpResult<()> {
        let sender = self
            .outgoing
            .lock()
            .clone()
            .ok_or_else(|| McpError::transport("stdin channel not available"))?;
        sender
            .send(line)
            .await
            .map_err(|e| McpError::transport(format!("failed to queue message: {}", e)))
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Stdio
    }

    fn state(&self) -> TransportState {
        *self.state.read()
    }

    async fn connect(&self) -> McpResult<()> {
        *self.state.write() = TransportState::Connecting;

        let program = resolve_command(&self.config.command);
        let mut cmd = Command::new(&program);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                *self.state.write() = TransportState::Error;
                return Err(self.spawn_error(
                    format!("failed to spawn '{}': {}", program.display(), e),
                    e,
                ));
            }
        };

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                *self.state.write() = TransportState::Error;
                return Err(McpError::stdio_process(
                    "failed to capture stdio of child process",
                    &self.config.command,
                    &self.config.args,
                    None,
                ));
            }
        };

        let shutdown = AbortController::new();
        let signal = shutdown.signal();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE_SIZE);
        let stderr = child.stderr.take();

        *self.child.lock().await = Some(child);
        *self.outgoing.lock() = Some(outgoing_tx);
        *self.shutdown.lock() = Some(shutdown);
        // Connected is published before the reader starts so an early EOF
        // always lands after it.
        *self.state.write() = TransportState::Connected;
        let _ = self.events.send(TransportEvent::Connected);

        self.start_reader_task(stdout, signal.clone());
        self.start_writer_task(stdin, outgoing_rx);
        if let Some(stderr) = stderr {
            self.start_stderr_task(stderr, signal);
        }

        tracing::debug!(
            server = %self.config.server_name,
            command = %self.config.command,
            "stdio transport connected"
        );
        Ok(())
    }

    async fn disconnect(&self) -> McpResult<()> {
        let state = self.state();
        if state == TransportState::Disconnected && self.child.lock().await.is_none() {
            return Ok(());
        }
        *self.state.write() = TransportState::Closing;

        if let Some(shutdown) = self.shutdown.lock().take() {
            shutdown.abort(AbortReason::Shutdown);
        }
        // Dropping the sender closes stdin once the writer drains.
        self.outgoing.lock().take();

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(server = %self.config.server_name, error = %e, "kill failed");
            }
        }

        self.pending.cancel_all("disconnected");
        *self.state.write() = TransportState::Disconnected;
        let _ = self.events.send(TransportEvent::Disconnected {
            reason: Some("disconnected by client".to_string()),
        });
        Ok(())
    }

    async fn send(&self, message: McpMessage) -> McpResult<()> {
        self.ensure_connected()?;
        let json = serde_json::to_string(&message)?;
        self.write_line(json).await
    }

    async fn send_request(&self, request: McpRequest, timeout: Duration) -> McpResult<McpResponse> {
        self.ensure_connected()?;
        let (key, rx) = self.pending.register(&request.id)?;
        let json = serde_json::to_string(&McpMessage::Request(request))?;
        if let Err(e) = self.write_line(json).await {
            self.pending.remove(&key);
            return Err(e);
        }
        self.pending.wait(&key, rx, timeout).await
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("command", &self.config.command)
            .field("args", &self.config.args)
            .field("state", &self.state())
            .finish()
    }
}
