//! Connection strategies
//!
//! A server is reached either through one long-lived transport
//! ([`PersistentStrategy`]) or through a fresh transport per use
//! ([`TemporaryStrategy`]). [`ConnectionManager`] picks the strategy from the
//! server's configured [`ConnectionMode`].

mod manager;
mod persistent;
mod temporary;

#[cfg(test)]
mod manager_tests;

pub use manager::ConnectionManager;
pub use persistent::PersistentStrategy;
pub use temporary::TemporaryStrategy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::McpResult;
use crate::transport::{SharedInstance, TransportInstance};
use crate::types::{ConnectionMode, ServerConfig, TransportType};

/// Runtime connection state of one server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    /// For temporary servers, whether the most recent acquisition succeeded
    pub connected: bool,
    pub last_error: Option<String>,
    pub active_transport: Option<TransportType>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    pub(crate) fn record_success(&mut self, instance: &TransportInstance) {
        self.connected = true;
        self.last_error = None;
        self.active_transport = Some(instance.transport_type());
        self.connected_at = Some(instance.metadata().created_at);
    }

    pub(crate) fn record_failure(&mut self, error: &crate::error::McpError) {
        self.connected = false;
        self.last_error = Some(error.to_string());
    }
}

/// A transport lent out by a strategy.
///
/// The handle remembers the mode it was acquired under so it is released by
/// the same strategy even if the server's mode changes meanwhile.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    server_name: String,
    instance: SharedInstance,
    mode: ConnectionMode,
}

impl ConnectionHandle {
    pub(crate) fn new(server_name: &str, instance: SharedInstance, mode: ConnectionMode) -> Self {
        Self {
            server_name: server_name.to_string(),
            instance,
            mode,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn instance(&self) -> &SharedInstance {
        &self.instance
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub(crate) fn into_instance(self) -> SharedInstance {
        self.instance
    }
}

impl std::ops::Deref for ConnectionHandle {
    type Target = TransportInstance;

    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

#[async_trait]
pub trait ConnectionStrategy: Send + Sync {
    fn mode(&self) -> ConnectionMode;

    async fn acquire(
        &self,
        config: &ServerConfig,
        session_id: Option<&str>,
    ) -> McpResult<ConnectionHandle>;

    async fn release(&self, handle: ConnectionHandle);

    /// Tear down whatever this strategy holds for `server_name`
    async fn disconnect(&self, server_name: &str) -> McpResult<()>;

    fn state(&self, server_name: &str) -> ConnectionState;
}

/// Factory shared by both strategies
pub type SharedFactory = Arc<dyn crate::transport::TransportFactory>;
