use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{ConnectionHandle, ConnectionState, ConnectionStrategy, SharedFactory};
use crate::error::McpResult;
use crate::transport::{RetryOptions, TransportCreation};
use crate::types::{ConnectionMode, ServerConfig};

/// A fresh transport for every acquisition, disposed on release
pub struct TemporaryStrategy {
    factory: SharedFactory,
    retry: RetryOptions,
    states: Mutex<HashMap<String, ConnectionState>>,
}

impl TemporaryStrategy {
    pub fn new(factory: SharedFactory, retry: RetryOptions) -> Self {
        Self {
            factory,
            retry,
            states: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ConnectionStrategy for TemporaryStrategy {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Temporary
    }

    async fn acquire(
        &self,
        config: &ServerConfig,
        session_id: Option<&str>,
    ) -> McpResult<ConnectionHandle> {
        let creation = TransportCreation::new(&config.name)
            .with_session(session_id.map(str::to_string));
        let retry = self.retry.clone().with_max_attempts(config.retries.max(1));
        let result = self
            .factory
            .create_transport_with_retry(config, creation, &retry)
            .await;

        let mut states = self.states.lock();
        let state = states.entry(config.name.clone()).or_default();
        match result {
            Ok(instance) => {
                state.record_success(&instance);
                Ok(ConnectionHandle::new(
                    &config.name,
                    Arc::new(instance),
                    self.mode(),
                ))
            }
            Err(e) => {
                state.record_failure(&e);
                Err(e)
            }
        }
    }

    async fn release(&self, handle: ConnectionHandle) {
        let server_name = handle.server_name().to_string();
        let instance = handle.into_instance();
        self.factory.dispose_transport(&instance).await;
        tracing::trace!(server = %server_name, "temporary connection disposed");
    }

    async fn disconnect(&self, server_name: &str) -> McpResult<()> {
        if let Some(state) = self.states.lock().get_mut(server_name) {
            state.connected = false;
            state.active_transport = None;
        }
        Ok(())
    }

    fn state(&self, server_name: &str) -> ConnectionState {
        self.states
            .lock()
            .get(server_name)
            .cloned()
            .unwrap_or_default()
    }
}
