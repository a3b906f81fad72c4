use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use super::{ConnectionHandle, ConnectionState, ConnectionStrategy, SharedFactory};
use crate::error::McpResult;
use crate::sync::Lock;
use crate::transport::{RetryOptions, SharedInstance, TransportCreation};
use crate::types::{ConnectionMode, ServerConfig};

struct ServerSlot {
    lock: Lock,
    instance: Mutex<Option<SharedInstance>>,
    state: Mutex<ConnectionState>,
}

impl ServerSlot {
    fn new(server_name: &str) -> Self {
        Self {
            lock: Lock::new(format!("connection:{}", server_name)),
            instance: Mutex::new(None),
            state: Mutex::new(ConnectionState::default()),
        }
    }

    fn live_instance(&self) -> Option<SharedInstance> {
        self.instance
            .lock()
            .as_ref()
            .filter(|instance| instance.is_connected())
            .cloned()
    }
}

/// One shared transport per server, created on first use.
///
/// Creation is serialized per server, so concurrent first acquisitions share
/// a single factory call.
pub struct PersistentStrategy {
    factory: SharedFactory,
    retry: RetryOptions,
    slots: RwLock<HashMap<String, Arc<ServerSlot>>>,
}

impl PersistentStrategy {
    pub fn new(factory: SharedFactory, retry: RetryOptions) -> Self {
        Self {
            factory,
            retry,
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, server_name: &str) -> Arc<ServerSlot> {
        if let Some(slot) = self.slots.read().get(server_name) {
            return Arc::clone(slot);
        }
        Arc::clone(
            self.slots
                .write()
                .entry(server_name.to_string())
                .or_insert_with(|| Arc::new(ServerSlot::new(server_name))),
        )
    }

    /// Names of servers this strategy has tried to connect
    pub fn known_servers(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    /// Record an error observed outside of acquisition, e.g. by health checks
    pub fn record_error(&self, server_name: &str, message: impl Into<String>) {
        if let Some(slot) = self.slots.read().get(server_name) {
            slot.state.lock().last_error = Some(message.into());
        }
    }

    /// The live instance for `server_name`, without creating one
    pub fn instance(&self, server_name: &str) -> Option<SharedInstance> {
        self.slots.read().get(server_name)?.live_instance()
    }
}

#[async_trait]
impl ConnectionStrategy for PersistentStrategy {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Persistent
    }

    async fn acquire(
        &self,
        config: &ServerConfig,
        session_id: Option<&str>,
    ) -> McpResult<ConnectionHandle> {
        let slot = self.slot(&config.name);
        if let Some(instance) = slot.live_instance() {
            return Ok(ConnectionHandle::new(&config.name, instance, self.mode()));
        }

        let _guard = slot.lock.acquire().await?;
        if let Some(instance) = slot.live_instance() {
            return Ok(ConnectionHandle::new(&config.name, instance, self.mode()));
        }

        let stale = slot.instance.lock().take();
        if let Some(stale) = stale {
            tracing::debug!(server = %config.name, "replacing dead transport");
            self.factory.dispose_transport(&stale).await;
        }

        let creation = TransportCreation::new(&config.name)
            .with_session(session_id.map(str::to_string));
        let retry = self.retry.clone().with_max_attempts(config.retries.max(1));
        match self
            .factory
            .create_transport_with_retry(config, creation, &retry)
            .await
        {
            Ok(instance) => {
                let instance = Arc::new(instance);
                slot.state.lock().record_success(&instance);
                *slot.instance.lock() = Some(Arc::clone(&instance));
                tracing::info!(server = %config.name, "persistent connection established");
                Ok(ConnectionHandle::new(&config.name, instance, self.mode()))
            }
            Err(e) => {
                slot.state.lock().record_failure(&e);
                Err(e)
            }
        }
    }

    async fn release(&self, handle: ConnectionHandle) {
        tracing::trace!(server = %handle.server_name(), "persistent handle released");
    }

    async fn disconnect(&self, server_name: &str) -> McpResult<()> {
        let Some(slot) = self.slots.read().get(server_name).cloned() else {
            return Ok(());
        };
        let _guard = slot.lock.acquire().await?;
        let instance = slot.instance.lock().take();
        if let Some(instance) = instance {
            self.factory.dispose_transport(&instance).await;
            tracing::info!(server = %server_name, "persistent connection closed");
        }
        let mut state = slot.state.lock();
        state.connected = false;
        state.active_transport = None;
        Ok(())
    }

    fn state(&self, server_name: &str) -> ConnectionState {
        let Some(slot) = self.slots.read().get(server_name).cloned() else {
            return ConnectionState::default();
        };
        let mut state = slot.state.lock().clone();
        if state.connected && slot.live_instance().is_none() {
            state.connected = false;
        }
        state
    }
}
