//! Error types for the MCP hub
//!
//! Every failure surfaced by the hub is an [`McpError`]. Each variant carries a
//! JSON-RPC style numeric code and a human-readable message, so errors can be
//! forwarded to upstream callers unchanged through [`StructuredError`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Error codes following JSON-RPC 2.0 and the MCP extension range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpErrorCode {
    // Standard JSON-RPC errors
    /// Invalid JSON was received
    ParseError = -32700,
    /// The JSON sent is not a valid Request object
    InvalidRequest = -32600,
    /// The method does not exist / is not available
    MethodNotFound = -32601,
    /// Invalid method parameter(s)
    InvalidParams = -32602,
    /// Internal JSON-RPC error
    InternalError = -32603,

    // MCP-specific errors (-32000 to -32099)
    /// Connecting to a server failed
    ConnectionError = -32000,
    /// Transport layer errors
    TransportError = -32001,
    /// Protocol negotiation or message format errors
    ProtocolError = -32002,
    /// Operation exceeded its time bound
    TimeoutError = -32003,
    /// Operation was cancelled through an abort signal
    CancelledError = -32004,
    /// Validation errors
    ValidationError = -32005,
    /// Bad or missing server configuration
    ConfigError = -32006,
    /// Item could not be found on any server
    NotFound = -32009,
    /// The owning server is not connected
    ServerUnavailable = -32011,
    /// A bare name is claimed by more than one server
    AmbiguousName = -32012,
}

impl McpErrorCode {
    /// Returns the numeric code value
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Returns a human-readable description of the error code
    pub fn description(&self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ConnectionError => "Connection error",
            Self::TransportError => "Transport error",
            Self::ProtocolError => "Protocol error",
            Self::TimeoutError => "Timeout error",
            Self::CancelledError => "Cancelled",
            Self::ValidationError => "Validation error",
            Self::ConfigError => "Configuration error",
            Self::NotFound => "Not found",
            Self::ServerUnavailable => "Server unavailable",
            Self::AmbiguousName => "Ambiguous name",
        }
    }
}

/// Hub error type with structured code and message.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server configuration field is missing or invalid
    #[error("Configuration error: {message}")]
    Configuration {
        code: i32,
        message: String,
        /// Server the configuration belongs to
        server_name: Option<String>,
        /// Offending field
        field: Option<String>,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Generic transport failure
    #[error("Transport error: {message}")]
    Transport {
        code: i32,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Spawning or talking to a stdio server process failed
    #[error("Stdio process error ({command}): {message}")]
    StdioProcess {
        code: i32,
        message: String,
        command: String,
        args: Vec<String>,
        #[source]
        source: Option<BoxedSource>,
    },

    /// HTTP streaming transport failure
    #[error("HTTP transport error ({url}): {message}")]
    HttpTransport {
        code: i32,
        message: String,
        url: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// SSE transport failure
    #[error("SSE transport error ({url}): {message}")]
    SseTransport {
        code: i32,
        message: String,
        url: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Protocol errors (handshake, message format)
    #[error("Protocol error: {message}")]
    Protocol { code: i32, message: String },

    /// Operation exceeded its bound
    #[error("Timeout after {duration:?}: {message}")]
    Timeout {
        code: i32,
        message: String,
        duration: Duration,
    },

    /// An abort signal fired while waiting
    #[error("Cancelled: {message}")]
    Cancelled {
        code: i32,
        message: String,
        reason: Option<String>,
    },

    /// Error returned by an MCP server
    #[error("Server error: code={code}, message={message}")]
    Server {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The server owning an item is not connected
    #[error("Server unavailable: {message}")]
    ServerUnavailable {
        code: i32,
        message: String,
        server_name: String,
    },

    /// No server owns the requested item
    #[error("Not found: {message}")]
    NotFound {
        code: i32,
        message: String,
        name: String,
    },

    /// A bare name matched several servers
    #[error("Ambiguous name: {message}")]
    Ambiguous {
        code: i32,
        message: String,
        candidates: Vec<String>,
    },

    /// Validation errors (names, arguments)
    #[error("Validation error: {message}")]
    Validation {
        code: i32,
        message: String,
        errors: Vec<String>,
    },

    /// IO errors
    #[error("IO error: {message}")]
    Io {
        code: i32,
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        code: i32,
        message: String,
        #[source]
        source: serde_json::Error,
    },
}

impl McpError {
    /// Returns the error code
    pub fn code(&self) -> i32 {
        match self {
            Self::Configuration { code, .. }
            | Self::Transport { code, .. }
            | Self::StdioProcess { code, .. }
            | Self::HttpTransport { code, .. }
            | Self::SseTransport { code, .. }
            | Self::Protocol { code, .. }
            | Self::Timeout { code, .. }
            | Self::Cancelled { code, .. }
            | Self::Server { code, .. }
            | Self::ServerUnavailable { code, .. }
            | Self::NotFound { code, .. }
            | Self::Ambiguous { code, .. }
            | Self::Validation { code, .. }
            | Self::Io { code, .. }
            | Self::Serialization { code, .. } => *code,
        }
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Configuration { message, .. }
            | Self::Transport { message, .. }
            | Self::StdioProcess { message, .. }
            | Self::HttpTransport { message, .. }
            | Self::SseTransport { message, .. }
            | Self::Protocol { message, .. }
            | Self::Timeout { message, .. }
            | Self::Cancelled { message, .. }
            | Self::Server { message, .. }
            | Self::ServerUnavailable { message, .. }
            | Self::NotFound { message, .. }
            | Self::Ambiguous { message, .. }
            | Self::Validation { message, .. }
            | Self::Io { message, .. }
            | Self::Serialization { message, .. } => message,
        }
    }

    /// True for errors produced by an elapsed time bound
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True for errors produced by an abort signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// True for configuration errors. Retrying these never helps.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            code: McpErrorCode::ConfigError.code(),
            message: message.into(),
            server_name: None,
            field: None,
            source: None,
        }
    }

    /// Configuration error pinned to one field of one server
    pub fn configuration_field(
        server_name: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            code: McpErrorCode::ConfigError.code(),
            message: message.into(),
            server_name: Some(server_name.into()),
            field: Some(field.into()),
            source: None,
        }
    }

    pub fn configuration_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Configuration {
            code: McpErrorCode::ConfigError.code(),
            message: message.into(),
            server_name: None,
            field: None,
            source: Some(Box::new(source)),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            code: McpErrorCode::TransportError.code(),
            message: message.into(),
            source: None,
        }
    }

    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            code: McpErrorCode::TransportError.code(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a stdio process error carrying the command line
    pub fn stdio_process(
        message: impl Into<String>,
        command: impl Into<String>,
        args: &[String],
        source: Option<BoxedSource>,
    ) -> Self {
        Self::StdioProcess {
            code: McpErrorCode::ConnectionError.code(),
            message: message.into(),
            command: command.into(),
            args: args.to_vec(),
            source,
        }
    }

    /// Create an HTTP transport error carrying the endpoint URL
    pub fn http_transport(
        message: impl Into<String>,
        url: impl Into<String>,
        source: Option<BoxedSource>,
    ) -> Self {
        Self::HttpTransport {
            code: McpErrorCode::ConnectionError.code(),
            message: message.into(),
            url: url.into(),
            source,
        }
    }

    /// Create an SSE transport error carrying the stream URL
    pub fn sse_transport(
        message: impl Into<String>,
        url: impl Into<String>,
        source: Option<BoxedSource>,
    ) -> Self {
        Self::SseTransport {
            code: McpErrorCode::ConnectionError.code(),
            message: message.into(),
            url: url.into(),
            source,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            code: McpErrorCode::ProtocolError.code(),
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            code: McpErrorCode::TimeoutError.code(),
            message: message.into(),
            duration,
        }
    }

    pub fn cancelled(message: impl Into<String>, reason: Option<String>) -> Self {
        Self::Cancelled {
            code: McpErrorCode::CancelledError.code(),
            message: message.into(),
            reason,
        }
    }

    pub fn server(code: i32, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::Server {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn server_unavailable(server_name: impl Into<String>) -> Self {
        let server_name = server_name.into();
        Self::ServerUnavailable {
            code: McpErrorCode::ServerUnavailable.code(),
            message: format!("server '{}' is not connected", server_name),
            server_name,
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::NotFound {
            code: McpErrorCode::NotFound.code(),
            message: format!("no server provides '{}'", name),
            name,
        }
    }

    pub fn ambiguous(name: &str, candidates: Vec<String>) -> Self {
        Self::Ambiguous {
            code: McpErrorCode::AmbiguousName.code(),
            message: format!(
                "'{}' is provided by several servers: {}",
                name,
                candidates.join(", ")
            ),
            candidates,
        }
    }

    pub fn validation(message: impl Into<String>, errors: Vec<String>) -> Self {
        Self::Validation {
            code: McpErrorCode::ValidationError.code(),
            message: message.into(),
            errors,
        }
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            code: McpErrorCode::InternalError.code(),
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            code: McpErrorCode::ParseError.code(),
            message: err.to_string(),
            source: err,
        }
    }
}

/// Result type alias for hub operations
pub type McpResult<T> = Result<T, McpError>;

/// JSON-serializable view of an [`McpError`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<&McpError> for StructuredError {
    fn from(err: &McpError) -> Self {
        let data = match err {
            McpError::Configuration {
                server_name, field, ..
            } => Some(serde_json::json!({ "server_name": server_name, "field": field })),
            McpError::StdioProcess { command, args, .. } => {
                Some(serde_json::json!({ "command": command, "args": args }))
            }
            McpError::HttpTransport { url, .. } | McpError::SseTransport { url, .. } => {
                Some(serde_json::json!({ "url": url }))
            }
            McpError::Timeout { duration, .. } => {
                Some(serde_json::json!({ "duration_ms": duration.as_millis() }))
            }
            McpError::Cancelled { reason, .. } => {
                reason.as_ref().map(|r| serde_json::json!({ "reason": r }))
            }
            McpError::Server { data, .. } => data.clone(),
            McpError::ServerUnavailable { server_name, .. } => {
                Some(serde_json::json!({ "server_name": server_name }))
            }
            McpError::Ambiguous { candidates, .. } => {
                Some(serde_json::json!({ "candidates": candidates }))
            }
            McpError::Validation { errors, .. } => Some(serde_json::json!({ "errors": errors })),
            _ => None,
        };

        Self {
            code: err.code(),
            message: err.message().to_string(),
            data,
        }
    }
}

impl From<McpError> for StructuredError {
    fn from(err: McpError) -> Self {
        StructuredError::from(&err)
    }
}
