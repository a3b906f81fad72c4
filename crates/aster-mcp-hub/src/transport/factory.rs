//! Transport construction
//!
//! [`TransportFactory`] turns a [`ServerConfig`] into a connected,
//! initialized [`TransportInstance`]. Strategies hold the factory as a trait
//! object so tests can substitute an in-memory one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::base::{BoxedTransport, SharedTransport, TransportConfig};
use super::http::{HttpConfig, HttpTransport};
use super::instance::{TransportInstance, TransportMetadata};
use super::sse::{SseConfig, SseTransport};
use super::stdio::{merge_environment, StdioConfig, StdioTransport};
use crate::error::{McpError, McpResult};
use crate::types::{duration_ms, ServerConfig};

/// Per-creation parameters layered on top of the server config
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportCreation {
    pub server_name: String,
    pub session_id: Option<String>,
    /// 1-based ordinal of this attempt
    pub connection_attempts: u32,
    /// Overrides the server's configured timeout
    pub timeout: Option<Duration>,
    pub headers: HashMap<String, String>,
    pub env: HashMap<String, String>,
}

impl TransportCreation {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            connection_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn with_attempt(mut self, attempt: u32) -> Self {
        self.connection_attempts = attempt;
        self
    }

    /// Metadata recorded on the instance this creation produces
    pub fn metadata(&self) -> TransportMetadata {
        TransportMetadata {
            session_id: self.session_id.clone(),
            connection_attempts: self.connection_attempts.max(1),
            ..TransportMetadata::new(&self.server_name)
        }
    }
}

/// Backoff policy for [`TransportFactory::create_transport_with_retry`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOptions {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(with = "duration_ms", default = "default_base_delay")]
    pub base_delay: Duration,
    #[serde(with = "duration_ms", default = "default_max_delay")]
    pub max_delay: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

impl RetryOptions {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before the retry following failed attempt `attempt` (0-based):
    /// `base * 2^attempt`, capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        let delay_ms = base.saturating_mul(1u64 << attempt.min(10));
        Duration::from_millis(delay_ms.min(max))
    }
}

/// Builds connected transport instances
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Build, connect and initialize one transport for `config`
    async fn create_transport(
        &self,
        config: &ServerConfig,
        creation: TransportCreation,
    ) -> McpResult<TransportInstance>;

    /// [`create_transport`](Self::create_transport) with exponential backoff.
    /// Configuration errors fail immediately.
    async fn create_transport_with_retry(
        &self,
        config: &ServerConfig,
        creation: TransportCreation,
        retry: &RetryOptions,
    ) -> McpResult<TransportInstance> {
        let max_attempts = retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(retry.delay_for(attempt - 2)).await;
            }
            let creation = creation.clone().with_attempt(attempt);
            match self.create_transport(config, creation).await {
                Ok(instance) => {
                    if attempt > 1 {
                        tracing::info!(server = %config.name, attempt, "transport created after retry");
                    }
                    return Ok(instance);
                }
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        server = %config.name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "transport creation failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            McpError::transport(format!("failed to create transport for '{}'", config.name))
        }))
    }

    /// Close an instance. Errors are logged, never returned.
    async fn dispose_transport(&self, instance: &TransportInstance) {
        let instance_id = instance.metadata().instance_id;
        match instance.close().await {
            Ok(()) => {
                tracing::debug!(server = %instance.server_name(), %instance_id, "transport disposed")
            }
            Err(e) => tracing::warn!(
                server = %instance.server_name(),
                %instance_id,
                error = %e,
                "error disposing transport"
            ),
        }
    }
}

/// Production factory for stdio, http and sse servers
#[derive(Debug, Clone, Default)]
pub struct DefaultTransportFactory;

impl DefaultTransportFactory {
    pub fn new() -> Self {
        Self
    }

    /// Build an unconnected transport for `config`
    pub fn build_transport(
        config: &ServerConfig,
        creation: &TransportCreation,
    ) -> McpResult<BoxedTransport> {
        let connect_timeout = creation.timeout.unwrap_or(config.timeout);
        let transport: BoxedTransport = match TransportConfig::from_server_config(config)? {
            TransportConfig::Stdio {
                command,
                args,
                env,
                cwd,
            } => Box::new(StdioTransport::new(StdioConfig {
                server_name: config.name.clone(),
                command,
                args,
                env: merge_environment(&env, &creation.env, creation.session_id.as_deref()),
                cwd,
            })),
            TransportConfig::Http { url, mut headers } => {
                headers.extend(creation.headers.clone());
                Box::new(HttpTransport::new(HttpConfig {
                    server_name: config.name.clone(),
                    url,
                    headers,
                    session_id: creation.session_id.clone(),
                    connect_timeout,
                }))
            }
            TransportConfig::Sse { url, mut headers } => {
                headers.extend(creation.headers.clone());
                Box::new(SseTransport::new(SseConfig {
                    server_name: config.name.clone(),
                    url,
                    headers,
                    session_id: creation.session_id.clone(),
                    connect_timeout,
                }))
            }
        };
        Ok(transport)
    }
}

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn create_transport(
        &self,
        config: &ServerConfig,
        creation: TransportCreation,
    ) -> McpResult<TransportInstance> {
        let timeout = creation.timeout.unwrap_or(config.timeout);
        let transport: SharedTransport = Arc::from(Self::build_transport(config, &creation)?);

        tracing::debug!(
            server = %config.name,
            transport = %config.transport_type,
            attempt = creation.connection_attempts,
            "connecting transport"
        );
        match tokio::time::timeout(timeout, transport.connect()).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = transport.disconnect().await;
                return Err(McpError::timeout(
                    format!("connecting to '{}' timed out", config.name),
                    timeout,
                ));
            }
        }

        let instance = TransportInstance::new(transport, creation.metadata(), config.timeout);
        if let Err(e) = instance.initialize().await {
            self.dispose_transport(&instance).await;
            return Err(e);
        }
        tracing::info!(server = %config.name, transport = %config.transport_type, "transport ready");
        Ok(instance)
    }
}
