use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::{
    ConnectionHandle, ConnectionState, ConnectionStrategy, PersistentStrategy, SharedFactory,
    TemporaryStrategy,
};
use crate::error::{McpError, McpResult};
use crate::registry::ServerRegistry;
use crate::transport::{RetryOptions, SharedInstance};
use crate::types::{ConnectionMode, ServerConfig};

/// Entry point for reaching registered servers
pub struct ConnectionManager {
    registry: Arc<ServerRegistry>,
    persistent: PersistentStrategy,
    temporary: TemporaryStrategy,
}

impl ConnectionManager {
    pub fn new(registry: Arc<ServerRegistry>, factory: SharedFactory) -> Self {
        Self::with_retry(registry, factory, RetryOptions::default())
    }

    pub fn with_retry(
        registry: Arc<ServerRegistry>,
        factory: SharedFactory,
        retry: RetryOptions,
    ) -> Self {
        Self {
            registry,
            persistent: PersistentStrategy::new(Arc::clone(&factory), retry.clone()),
            temporary: TemporaryStrategy::new(factory, retry),
        }
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn persistent(&self) -> &PersistentStrategy {
        &self.persistent
    }

    fn strategy(&self, mode: ConnectionMode) -> &dyn ConnectionStrategy {
        match mode {
            ConnectionMode::Persistent => &self.persistent,
            ConnectionMode::Temporary => &self.temporary,
        }
    }

    fn config(&self, server_name: &str) -> McpResult<Arc<ServerConfig>> {
        self.registry
            .get_server(server_name)
            .ok_or_else(|| McpError::not_found(server_name))
    }

    /// Acquire a connection under the server's current mode
    pub async fn acquire(
        &self,
        server_name: &str,
        session_id: Option<&str>,
    ) -> McpResult<ConnectionHandle> {
        let config = self.config(server_name)?;
        self.strategy(config.connection_mode)
            .acquire(&config, session_id)
            .await
    }

    /// Release under the mode the handle was acquired with
    pub async fn release(&self, handle: ConnectionHandle) {
        self.strategy(handle.mode()).release(handle).await
    }

    /// Run `f` with a connection, releasing it however `f` finishes.
    /// A panic in `f` is re-raised after the release.
    pub async fn with_connection<F, Fut, T>(
        &self,
        server_name: &str,
        session_id: Option<&str>,
        f: F,
    ) -> McpResult<T>
    where
        F: FnOnce(SharedInstance) -> Fut,
        Fut: Future<Output = McpResult<T>>,
    {
        let handle = self.acquire(server_name, session_id).await?;
        self.run_and_release(handle, f).await
    }

    /// Create a transport for `config`, run `f`, then dispose the transport.
    /// `config` does not need to be registered.
    pub async fn with_temporary_connection<F, Fut, T>(
        &self,
        config: &ServerConfig,
        f: F,
    ) -> McpResult<T>
    where
        F: FnOnce(SharedInstance) -> Fut,
        Fut: Future<Output = McpResult<T>>,
    {
        let handle = self.temporary.acquire(config, None).await?;
        self.run_and_release(handle, f).await
    }

    async fn run_and_release<F, Fut, T>(&self, handle: ConnectionHandle, f: F) -> McpResult<T>
    where
        F: FnOnce(SharedInstance) -> Fut,
        Fut: Future<Output = McpResult<T>>,
    {
        let outcome = AssertUnwindSafe(f(Arc::clone(handle.instance())))
            .catch_unwind()
            .await;
        self.release(handle).await;
        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    pub async fn disconnect(&self, server_name: &str) -> McpResult<()> {
        self.persistent.disconnect(server_name).await?;
        self.temporary.disconnect(server_name).await
    }

    /// Disconnect every server, logging individual failures
    pub async fn disconnect_all(&self) {
        let mut names = self.registry.server_names();
        for known in self.persistent.known_servers() {
            if !names.contains(&known) {
                names.push(known);
            }
        }
        for name in names {
            if let Err(e) = self.disconnect(&name).await {
                tracing::warn!(server = %name, error = %e, "failed to disconnect");
            }
        }
    }

    pub fn connection_state(&self, server_name: &str) -> ConnectionState {
        let mode = self
            .registry
            .get_server(server_name)
            .map(|c| c.connection_mode)
            .unwrap_or_default();
        self.strategy(mode).state(server_name)
    }

    pub fn is_connected(&self, server_name: &str) -> bool {
        self.connection_state(server_name).connected
    }

    /// Record an error against a persistent server without tearing it down
    pub fn record_error(&self, server_name: &str, message: impl Into<String>) {
        self.persistent.record_error(server_name, message);
    }
}
