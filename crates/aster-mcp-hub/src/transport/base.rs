//! Transport trait and shared transport types
//!
//! The transport layer hides three wire mechanisms behind one trait:
//!
//! - **Stdio**: subprocess communication via stdin/stdout
//! - **HTTP**: streamable HTTP, one POST per message
//! - **SSE**: an event stream for server messages plus POSTs for client messages
//!
//! Transports take `&self` so a single connection can carry concurrent
//! requests; implementations keep their state behind interior locks.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use url::Url;

use crate::error::{McpError, McpResult};
use crate::protocol::{McpMessage, McpRequest, McpResponse};
use crate::types::{ServerConfig, TransportType};

/// Transport-specific settings, built from a validated [`ServerConfig`]
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<PathBuf>,
    },
    Http {
        url: Url,
        headers: HashMap<String, String>,
    },
    Sse {
        url: Url,
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    pub fn transport_type(&self) -> TransportType {
        match self {
            TransportConfig::Stdio { .. } => TransportType::Stdio,
            TransportConfig::Http { .. } => TransportType::Http,
            TransportConfig::Sse { .. } => TransportType::Sse,
        }
    }

    /// Extract the transport settings from a server config, failing with a
    /// configuration error when a required field is missing or malformed
    pub fn from_server_config(config: &ServerConfig) -> McpResult<Self> {
        match config.transport_type {
            TransportType::Stdio => {
                let command = config
                    .command
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| {
                        McpError::configuration_field(
                            &config.name,
                            "command",
                            "stdio transport requires a non-empty command",
                        )
                    })?;
                Ok(TransportConfig::Stdio {
                    command: command.to_string(),
                    args: config.args.clone(),
                    env: config.env.clone(),
                    cwd: config.cwd.clone(),
                })
            }
            TransportType::Http => Ok(TransportConfig::Http {
                url: parse_endpoint(&config.name, config.url.as_deref())?,
                headers: config.headers.clone(),
            }),
            TransportType::Sse => Ok(TransportConfig::Sse {
                url: parse_endpoint(&config.name, config.url.as_deref())?,
                headers: config.headers.clone(),
            }),
        }
    }
}

/// Parse an http(s) endpoint URL for server `server_name`
pub(crate) fn parse_endpoint(server_name: &str, url: Option<&str>) -> McpResult<Url> {
    let raw = url.map(str::trim).filter(|u| !u.is_empty()).ok_or_else(|| {
        McpError::configuration_field(server_name, "url", "http/sse transport requires a url")
    })?;
    let parsed = Url::parse(raw).map_err(|e| {
        McpError::configuration_field(server_name, "url", format!("invalid url '{}': {}", raw, e))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(McpError::configuration_field(
            server_name,
            "url",
            format!("unsupported url scheme '{}'", other),
        )),
    }
}

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Error,
}

/// Transport event for monitoring state changes and server-initiated messages
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: Option<String> },
    Error { error: String },
    /// A notification or request sent by the server
    MessageReceived(McpMessage),
}

/// Capacity of the per-transport event channel
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Transport trait for MCP communication
#[async_trait]
pub trait Transport: Send + Sync {
    fn transport_type(&self) -> TransportType;

    fn state(&self) -> TransportState;

    /// Establish the underlying channel (spawn process, open stream)
    async fn connect(&self) -> McpResult<()>;

    /// Close the underlying channel. Calling it twice is not an error.
    async fn disconnect(&self) -> McpResult<()>;

    /// Send a message that expects no response
    async fn send(&self, message: McpMessage) -> McpResult<()>;

    /// Send a request and wait at most `timeout` for the matching response
    async fn send_request(&self, request: McpRequest, timeout: Duration) -> McpResult<McpResponse>;

    /// Subscribe to transport events
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }
}

/// Boxed transport type for dynamic dispatch
pub type BoxedTransport = Box<dyn Transport>;

/// Arc-wrapped transport for shared ownership
pub type SharedTransport = Arc<dyn Transport>;
