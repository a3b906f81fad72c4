//! Core types shared across hub components

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// JSON object as used for tool arguments and schemas
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Wire transport used to reach a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// Spawned child process speaking over stdin/stdout
    #[default]
    Stdio,
    /// Streamable HTTP
    Http,
    /// Server-sent events with an HTTP POST back-channel
    Sse,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Stdio => write!(f, "stdio"),
            TransportType::Http => write!(f, "http"),
            TransportType::Sse => write!(f, "sse"),
        }
    }
}

/// How long a server's connection is kept open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// One connection held open until disconnect
    #[default]
    Persistent,
    /// A fresh connection per unit of work
    Temporary,
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionMode::Persistent => write!(f, "persistent"),
            ConnectionMode::Temporary => write!(f, "temporary"),
        }
    }
}

/// Declarative description of one MCP server.
///
/// Instances are treated as immutable once accepted by the registry;
/// updating a server replaces its config with a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Unique server name, also used as the namespace prefix.
    /// Filled from the map key when loaded from a config file.
    #[serde(default)]
    pub name: String,
    /// Transport type
    #[serde(default, alias = "type")]
    pub transport_type: TransportType,
    /// Command to execute (stdio)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Command arguments (stdio)
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables (stdio)
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory (stdio)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Endpoint URL (http, sse)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// HTTP headers (http, sse)
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Whether the server is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Request timeout
    #[serde(with = "duration_ms", default = "default_timeout")]
    pub timeout: Duration,
    /// Attempts allowed when creating the transport
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Connection lifetime strategy
    #[serde(default)]
    pub connection_mode: ConnectionMode,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retries() -> u32 {
    3
}

impl ServerConfig {
    /// Stdio server running `command` with `args`
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport_type: TransportType::Stdio,
            command: Some(command.into()),
            args,
            ..Self::default()
        }
    }

    /// Streamable HTTP server at `url`
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport_type: TransportType::Http,
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// SSE server at `url`
    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport_type: TransportType::Sse,
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_connection_mode(mut self, mode: ConnectionMode) -> Self {
        self.connection_mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            transport_type: TransportType::default(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            url: None,
            headers: HashMap::new(),
            enabled: default_enabled(),
            timeout: default_timeout(),
            retries: default_retries(),
            connection_mode: ConnectionMode::default(),
        }
    }
}

/// One problem found while validating a server config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFieldError {
    pub server_name: String,
    pub field: String,
    pub value: Option<String>,
    pub message: String,
}

impl ConfigFieldError {
    pub fn new(
        server_name: impl Into<String>,
        field: impl Into<String>,
        value: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            field: field.into(),
            value,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigFieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}: {}", self.server_name, self.field, self.message)
    }
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the configuration is valid
    pub valid: bool,
    /// Problems that block acceptance
    pub errors: Vec<ConfigFieldError>,
    /// Problems worth reporting that do not block acceptance
    pub warnings: Vec<ConfigFieldError>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::valid()
    }
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: ConfigFieldError) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ConfigFieldError) {
        self.warnings.push(warning);
    }

    /// Fold another result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Error messages, one line per problem
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

/// Serializes a `Duration` as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
