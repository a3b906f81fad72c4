//! MCP aggregator
//!
//! [`McpAggregator`] owns the configured servers and presents them as one:
//! listings from every connected server are merged under namespaced names,
//! and invocations are routed back to the server that owns the item.
//!
//! ```text
//!   execute_tool("web_search")
//!        │
//!        ▼
//!   namespace ──▶ (web, search) ──▶ ConnectionManager ──▶ tools/call
//!                                         │
//!                 HealthMonitor ◀─────────┘ supervises every connected server
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::connection::{ConnectionManager, SharedFactory};
use crate::error::{McpError, McpResult};
use crate::event_store::{InMemoryEventStore, StoredEvent, DEFAULT_MAX_EVENTS_PER_STREAM};
use crate::health::{
    HealthEvent, HealthEventKind, HealthMetrics, HealthMonitor, HealthMonitorOptions,
    HealthStatus, HealthTarget,
};
use crate::namespace::{
    create_namespaced_name, parse_namespaced_name, resolve_server_for_resource, NamespaceOptions,
    ResolvedName,
};
use crate::protocol::{
    GetPromptResult, McpMessage, PromptDescriptor, ReadResourceResult, ResourceDescriptor,
    ToolCallResult, ToolDescriptor,
};
use crate::registry::ServerRegistry;
use crate::sync::{AbortController, AbortReason, AbortSignal, TaskGroup, TaskGroupOptions};
use crate::transport::{RetryOptions, SharedInstance, TransportEvent};
use crate::types::{ConnectionMode, JsonObject, ServerConfig, TransportType, ValidationResult};

/// Options for [`McpAggregator`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AggregatorOptions {
    pub health: HealthMonitorOptions,
    pub retry: RetryOptions,
    pub namespace: NamespaceOptions,
    /// Run health check loops for connected servers
    pub monitor_health: bool,
    /// Server notifications kept per server for replay
    pub max_events_per_server: usize,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            health: HealthMonitorOptions::default(),
            retry: RetryOptions::default(),
            namespace: NamespaceOptions::default(),
            monitor_health: true,
            max_events_per_server: DEFAULT_MAX_EVENTS_PER_STREAM,
        }
    }
}

/// A tool as seen through the aggregator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedTool {
    pub namespaced_name: String,
    pub server_name: String,
    pub tool: ToolDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResource {
    pub namespaced_name: String,
    pub server_name: String,
    pub resource: ResourceDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedPrompt {
    pub namespaced_name: String,
    pub server_name: String,
    pub prompt: PromptDescriptor,
}

/// Point-in-time view of one server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub connected: bool,
    pub health: HealthStatus,
    pub last_error: Option<String>,
    pub mode: ConnectionMode,
    pub transport_type: TransportType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorStatistics {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub server_count: usize,
    pub connected_servers: usize,
    pub failed_connections: u64,
    pub initialized: bool,
    pub started_at: Option<DateTime<Utc>>,
}

/// Outcome of [`McpAggregator::initialize`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitializationSummary {
    pub connected: Vec<String>,
    /// Server name to error message
    pub failed: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Counters {
    total_operations: u64,
    successful_operations: u64,
    failed_operations: u64,
    failed_connections: u64,
    initialized: bool,
    started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Tool,
    Resource,
    Prompt,
}

impl ItemKind {
    fn label(self) -> &'static str {
        match self {
            ItemKind::Tool => "tool",
            ItemKind::Resource => "resource",
            ItemKind::Prompt => "prompt",
        }
    }
}

/// Item names per server from the last successful listing
#[derive(Debug, Default)]
struct ServerCatalog {
    tools: Option<HashSet<String>>,
    resources: Option<HashSet<String>>,
    prompts: Option<HashSet<String>>,
}

impl ServerCatalog {
    fn names(&self, kind: ItemKind) -> Option<&HashSet<String>> {
        match kind {
            ItemKind::Tool => self.tools.as_ref(),
            ItemKind::Resource => self.resources.as_ref(),
            ItemKind::Prompt => self.prompts.as_ref(),
        }
    }

    fn slot(&mut self, kind: ItemKind) -> &mut Option<HashSet<String>> {
        match kind {
            ItemKind::Tool => &mut self.tools,
            ItemKind::Resource => &mut self.resources,
            ItemKind::Prompt => &mut self.prompts,
        }
    }
}

struct AggregatorInner {
    registry: Arc<ServerRegistry>,
    connections: ConnectionManager,
    options: AggregatorOptions,
    monitors: RwLock<HashMap<String, Arc<HealthMonitor>>>,
    catalogs: RwLock<HashMap<String, ServerCatalog>>,
    forwarders: Mutex<HashMap<String, JoinHandle<()>>>,
    events: Arc<InMemoryEventStore>,
    counters: Mutex<Counters>,
    abort: AbortController,
}

/// Single entry point over a set of MCP servers
pub struct McpAggregator {
    inner: Arc<AggregatorInner>,
}

impl McpAggregator {
    pub fn new(registry: Arc<ServerRegistry>, factory: SharedFactory) -> Self {
        Self::with_options(registry, factory, AggregatorOptions::default())
    }

    pub fn with_options(
        registry: Arc<ServerRegistry>,
        factory: SharedFactory,
        options: AggregatorOptions,
    ) -> Self {
        let connections =
            ConnectionManager::with_retry(Arc::clone(&registry), factory, options.retry.clone());
        let events = Arc::new(InMemoryEventStore::new(options.max_events_per_server));
        Self {
            inner: Arc::new(AggregatorInner {
                registry,
                connections,
                options,
                monitors: RwLock::new(HashMap::new()),
                catalogs: RwLock::new(HashMap::new()),
                forwarders: Mutex::new(HashMap::new()),
                events,
                counters: Mutex::new(Counters::default()),
                abort: AbortController::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.inner.registry
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.inner.connections
    }

    /// Connect every enabled server concurrently and start monitoring the
    /// ones that came up. A failing server is logged and counted; it does not
    /// affect the others.
    pub async fn initialize(&self) -> McpResult<InitializationSummary> {
        self.inner.abort.signal().throw_if_aborted()?;
        let servers = self.inner.registry.enabled_servers();
        tracing::info!(servers = servers.len(), "initializing MCP aggregator");

        let group: TaskGroup<()> =
            TaskGroup::with_parent(TaskGroupOptions::default(), &self.inner.abort.signal());
        let mut started = Vec::with_capacity(servers.len());
        for config in servers {
            let inner = Arc::clone(&self.inner);
            let name = config.name.clone();
            let id = group.start_in_background(move |_signal| async move {
                inner.connect_server(&name).await
            });
            started.push((id, config.name.clone()));
        }

        let mut summary = InitializationSummary::default();
        for settled in group.wait_for_all().await {
            let Some(name) = started
                .iter()
                .find(|(id, _)| *id == settled.id())
                .map(|(_, name)| name.clone())
            else {
                continue;
            };
            match settled.into_result() {
                Ok(()) => {
                    self.inner.start_monitor(&name);
                    summary.connected.push(name);
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to connect MCP server");
                    self.inner.counters.lock().failed_connections += 1;
                    self.inner.connections.record_error(&name, e.to_string());
                    summary.failed.insert(name, e.to_string());
                }
            }
        }
        self.inner.abort.signal().throw_if_aborted()?;

        {
            let mut counters = self.inner.counters.lock();
            counters.initialized = true;
            counters.started_at.get_or_insert_with(Utc::now);
        }
        tracing::info!(
            connected = summary.connected.len(),
            failed = summary.failed.len(),
            "MCP aggregator initialized"
        );
        Ok(summary)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.counters.lock().initialized
    }

    /// Tools of every connected server, keyed by namespaced name
    pub async fn get_all_tools(&self) -> BTreeMap<String, AggregatedTool> {
        let listings = self
            .inner
            .list_connected(|inner, server| async move { inner.list_tools(&server).await })
            .await;
        let mut merged = BTreeMap::new();
        for (server, tools) in listings {
            for tool in tools {
                if let Some(namespaced_name) = self.inner.namespaced(&server, &tool.name) {
                    merged.insert(
                        namespaced_name.clone(),
                        AggregatedTool {
                            namespaced_name,
                            server_name: server.clone(),
                            tool,
                        },
                    );
                }
            }
        }
        merged
    }

    /// Resources of every connected server, keyed by namespaced uri
    pub async fn get_all_resources(&self) -> BTreeMap<String, AggregatedResource> {
        let listings = self
            .inner
            .list_connected(|inner, server| async move { inner.list_resources(&server).await })
            .await;
        let mut merged = BTreeMap::new();
        for (server, resources) in listings {
            for resource in resources {
                if let Some(namespaced_name) = self.inner.namespaced(&server, &resource.uri) {
                    merged.insert(
                        namespaced_name.clone(),
                        AggregatedResource {
                            namespaced_name,
                            server_name: server.clone(),
                            resource,
                        },
                    );
                }
            }
        }
        merged
    }

    pub async fn get_all_prompts(&self) -> BTreeMap<String, AggregatedPrompt> {
        let listings = self
            .inner
            .list_connected(|inner, server| async move { inner.list_prompts(&server).await })
            .await;
        let mut merged = BTreeMap::new();
        for (server, prompts) in listings {
            for prompt in prompts {
                if let Some(namespaced_name) = self.inner.namespaced(&server, &prompt.name) {
                    merged.insert(
                        namespaced_name.clone(),
                        AggregatedPrompt {
                            namespaced_name,
                            server_name: server.clone(),
                            prompt,
                        },
                    );
                }
            }
        }
        merged
    }

    /// Call a tool by namespaced or bare name
    pub async fn execute_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        session_id: Option<&str>,
    ) -> McpResult<ToolCallResult> {
        let inner = &self.inner;
        inner
            .track(async {
                let ResolvedName {
                    server_name,
                    item_name,
                } = inner.route(ItemKind::Tool, name).await?;
                tracing::debug!(server = %server_name, tool = %item_name, "executing tool");
                inner
                    .connections
                    .with_connection(&server_name, session_id, |instance| async move {
                        instance.call_tool(&item_name, arguments, None).await
                    })
                    .await
            })
            .await
    }

    pub async fn read_resource(&self, name: &str) -> McpResult<ReadResourceResult> {
        let inner = &self.inner;
        inner
            .track(async {
                let ResolvedName {
                    server_name,
                    item_name,
                } = inner.route(ItemKind::Resource, name).await?;
                inner
                    .connections
                    .with_connection(&server_name, None, |instance| async move {
                        instance.read_resource(&item_name).await
                    })
                    .await
            })
            .await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<GetPromptResult> {
        let inner = &self.inner;
        inner
            .track(async {
                let ResolvedName {
                    server_name,
                    item_name,
                } = inner.route(ItemKind::Prompt, name).await?;
                inner
                    .connections
                    .with_connection(&server_name, None, |instance| async move {
                        instance.get_prompt(&item_name, arguments).await
                    })
                    .await
            })
            .await
    }

    pub fn get_server_statuses(&self) -> HashMap<String, ServerStatus> {
        self.inner
            .registry
            .get_all_servers()
            .into_iter()
            .map(|config| {
                let status = self.inner.server_status(&config);
                (config.name.clone(), status)
            })
            .collect()
    }

    pub fn server_status(&self, server_name: &str) -> Option<ServerStatus> {
        let config = self.inner.registry.get_server(server_name)?;
        Some(self.inner.server_status(&config))
    }

    /// Register a server while running. Connects it and starts monitoring
    /// when the aggregator is initialized and the server is enabled.
    pub async fn add_server(&self, config: ServerConfig) -> McpResult<ValidationResult> {
        self.inner.abort.signal().throw_if_aborted()?;
        let name = config.name.clone();
        let enabled = config.enabled;
        let validation = self.inner.registry.add_server(config);
        if !validation.valid {
            return Err(McpError::validation(
                format!("server '{}' was rejected", name),
                validation.error_messages(),
            ));
        }
        if enabled && self.is_initialized() {
            match self.inner.connect_server(&name).await {
                Ok(()) => self.inner.start_monitor(&name),
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to connect added server");
                    self.inner.counters.lock().failed_connections += 1;
                    self.inner.connections.record_error(&name, e.to_string());
                }
            }
        }
        Ok(validation)
    }

    /// Stop monitoring, disconnect and unregister a server.
    /// Returns false if no such server was registered.
    pub async fn remove_server(&self, server_name: &str) -> bool {
        self.inner.detach_server(server_name).await;
        self.inner.catalogs.write().remove(server_name);
        self.inner.events.remove_stream(server_name);
        self.inner.registry.remove_server(server_name).is_some()
    }

    /// Tear down and re-establish a server's connection
    pub async fn reconnect_server(&self, server_name: &str) -> McpResult<()> {
        self.inner.abort.signal().throw_if_aborted()?;
        if !self.inner.registry.contains(server_name) {
            return Err(McpError::not_found(server_name));
        }
        tracing::info!(server = %server_name, "reconnecting MCP server");
        self.inner.detach_server(server_name).await;
        self.inner.catalogs.write().remove(server_name);
        match self.inner.connect_server(server_name).await {
            Ok(()) => {
                self.inner.start_monitor(server_name);
                Ok(())
            }
            Err(e) => {
                self.inner.counters.lock().failed_connections += 1;
                self.inner.connections.record_error(server_name, e.to_string());
                Err(e)
            }
        }
    }

    pub fn get_statistics(&self) -> AggregatorStatistics {
        let servers = self.inner.registry.server_names();
        let connected_servers = servers
            .iter()
            .filter(|name| self.inner.connections.is_connected(name))
            .count();
        let counters = self.inner.counters.lock();
        AggregatorStatistics {
            total_operations: counters.total_operations,
            successful_operations: counters.successful_operations,
            failed_operations: counters.failed_operations,
            server_count: servers.len(),
            connected_servers,
            failed_connections: counters.failed_connections,
            initialized: counters.initialized,
            started_at: counters.started_at,
        }
    }

    /// Zero the operation and connection counters
    pub fn reset_statistics(&self) {
        let mut counters = self.inner.counters.lock();
        counters.total_operations = 0;
        counters.successful_operations = 0;
        counters.failed_operations = 0;
        counters.failed_connections = 0;
        if counters.initialized {
            counters.started_at = Some(Utc::now());
        }
    }

    pub fn health_metrics(&self, server_name: &str) -> Option<HealthMetrics> {
        self.inner
            .monitors
            .read()
            .get(server_name)
            .map(|monitor| monitor.metrics())
    }

    /// Run one health check for a monitored server now
    pub async fn check_health(&self, server_name: &str) -> Option<bool> {
        let monitor = self.inner.monitors.read().get(server_name).cloned()?;
        Some(monitor.check_now().await.healthy)
    }

    /// Server notifications recorded after `last_event_id`
    pub fn replay_events_after(&self, last_event_id: &str) -> McpResult<Vec<StoredEvent>> {
        self.inner.events.replay_events_after(last_event_id)
    }

    pub fn event_store(&self) -> &InMemoryEventStore {
        &self.inner.events
    }

    pub fn signal(&self) -> AbortSignal {
        self.inner.abort.signal()
    }

    /// Abort in-flight work, stop every monitor and disconnect every server.
    /// Disconnect failures are logged, not returned.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down MCP aggregator");
        self.inner.abort.abort(AbortReason::Shutdown);

        let monitors: Vec<_> = self.inner.monitors.write().drain().map(|(_, m)| m).collect();
        for monitor in monitors {
            monitor.dispose().await;
        }
        for (_, forwarder) in self.inner.forwarders.lock().drain() {
            forwarder.abort();
        }
        self.inner.connections.disconnect_all().await;
        self.inner.catalogs.write().clear();
        self.inner.counters.lock().initialized = false;
    }
}

impl Drop for McpAggregator {
    fn drop(&mut self) {
        self.inner.abort.abort(AbortReason::Shutdown);
        for (_, forwarder) in self.inner.forwarders.lock().drain() {
            forwarder.abort();
        }
    }
}

impl AggregatorInner {
    /// Acquire `server_name` once so its connection state reflects reality.
    /// Persistent servers keep the transport; temporary ones dispose it.
    async fn connect_server(&self, server_name: &str) -> McpResult<()> {
        let handle = self
            .abort
            .signal()
            .race(self.connections.acquire(server_name, None))
            .await??;
        let instance = Arc::clone(handle.instance());
        let mode = handle.mode();
        self.connections.release(handle).await;
        if mode == ConnectionMode::Persistent {
            self.forward_notifications(server_name, &instance);
        }
        tracing::info!(server = %server_name, ?mode, "MCP server connected");
        Ok(())
    }

    /// Record server-initiated notifications from `instance` in the event store
    fn forward_notifications(&self, server_name: &str, instance: &SharedInstance) {
        let mut receiver = instance.transport().subscribe();
        let events = Arc::clone(&self.events);
        let signal = self.abort.signal();
        let name = server_name.to_string();
        let forwarder = tokio::spawn(async move {
            loop {
                let received = match signal.race(receiver.recv()).await {
                    Ok(received) => received,
                    Err(_) => return,
                };
                match received {
                    Ok(TransportEvent::MessageReceived(message @ McpMessage::Notification(_))) => {
                        events.store_event(&name, message);
                    }
                    Ok(TransportEvent::Disconnected { .. }) | Err(RecvError::Closed) => return,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(server = %name, skipped, "dropped server notifications");
                    }
                }
            }
        });
        if let Some(previous) = self.forwarders.lock().insert(server_name.to_string(), forwarder) {
            previous.abort();
        }
    }

    fn start_monitor(self: &Arc<Self>, server_name: &str) {
        let target = Arc::new(ServerHealthTarget {
            name: server_name.to_string(),
            inner: Arc::downgrade(self),
        });
        let monitor = Arc::new(HealthMonitor::new(target, self.options.health.clone()));

        let weak = Arc::downgrade(self);
        monitor.on(HealthEventKind::RecoveryFailed, move |event| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let name = event.target().to_string();
            tokio::spawn(async move {
                tracing::error!(server = %name, "recovery failed, disconnecting server");
                inner.detach_server(&name).await;
                inner.connections.record_error(&name, "health recovery failed");
            });
        });
        let weak = Arc::downgrade(self);
        monitor.on(HealthEventKind::Recovered, move |event: &HealthEvent| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Some(instance) = inner.connections.persistent().instance(event.target()) {
                inner.forward_notifications(event.target(), &instance);
            }
        });

        if self.options.monitor_health {
            if let Err(e) = monitor.start() {
                tracing::warn!(server = %server_name, error = %e, "failed to start health monitor");
            }
        }
        let previous = self
            .monitors
            .write()
            .insert(server_name.to_string(), monitor);
        if let Some(previous) = previous {
            tokio::spawn(async move { previous.dispose().await });
        }
    }

    /// Stop monitoring and disconnect, logging failures
    async fn detach_server(&self, server_name: &str) {
        let monitor = self.monitors.write().remove(server_name);
        if let Some(monitor) = monitor {
            monitor.dispose().await;
        }
        if let Some(forwarder) = self.forwarders.lock().remove(server_name) {
            forwarder.abort();
        }
        if let Err(e) = self.connections.disconnect(server_name).await {
            tracing::warn!(server = %server_name, error = %e, "failed to disconnect server");
        }
    }

    fn server_status(&self, config: &ServerConfig) -> ServerStatus {
        let state = self.connections.connection_state(&config.name);
        let health = match self.monitors.read().get(&config.name) {
            Some(monitor) => monitor.status(),
            None if state.connected => HealthStatus::Healthy,
            None => HealthStatus::Unhealthy,
        };
        ServerStatus {
            connected: state.connected,
            health,
            last_error: state.last_error,
            mode: config.connection_mode,
            transport_type: config.transport_type,
        }
    }

    fn namespaced(&self, server_name: &str, item: &str) -> Option<String> {
        match create_namespaced_name(server_name, item, &self.options.namespace.separator) {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::warn!(server = %server_name, item, error = %e, "skipping item");
                None
            }
        }
    }

    /// Run `list` against every connected server concurrently, dropping
    /// servers whose listing fails
    async fn list_connected<'a, F, Fut, T>(&'a self, list: F) -> Vec<(String, Vec<T>)>
    where
        F: Fn(&'a Self, String) -> Fut,
        Fut: Future<Output = McpResult<Vec<T>>> + 'a,
    {
        let servers: Vec<String> = self
            .registry
            .enabled_servers()
            .into_iter()
            .map(|config| config.name.clone())
            .filter(|name| self.connections.is_connected(name))
            .collect();
        let listings = futures::future::join_all(servers.into_iter().map(|server| {
            let listing = list(self, server.clone());
            async move { (server, listing.await) }
        }))
        .await;

        listings
            .into_iter()
            .filter_map(|(server, listing)| match listing {
                Ok(items) => Some((server, items)),
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "failed to list server items");
                    None
                }
            })
            .collect()
    }

    async fn list_tools(&self, server_name: &str) -> McpResult<Vec<ToolDescriptor>> {
        let tools = self
            .connections
            .with_connection(server_name, None, |instance| async move { instance.list_tools().await })
            .await?;
        self.index(server_name, ItemKind::Tool, tools.iter().map(|t| t.name.clone()));
        Ok(tools)
    }

    async fn list_resources(&self, server_name: &str) -> McpResult<Vec<ResourceDescriptor>> {
        let resources = self
            .connections
            .with_connection(server_name, None, |instance| async move {
                instance.list_resources().await
            })
            .await?;
        self.index(server_name, ItemKind::Resource, resources.iter().map(|r| r.uri.clone()));
        Ok(resources)
    }

    async fn list_prompts(&self, server_name: &str) -> McpResult<Vec<PromptDescriptor>> {
        let prompts = self
            .connections
            .with_connection(server_name, None, |instance| async move {
                instance.list_prompts().await
            })
            .await?;
        self.index(server_name, ItemKind::Prompt, prompts.iter().map(|p| p.name.clone()));
        Ok(prompts)
    }

    fn index(&self, server_name: &str, kind: ItemKind, names: impl Iterator<Item = String>) {
        *self
            .catalogs
            .write()
            .entry(server_name.to_string())
            .or_default()
            .slot(kind) = Some(names.collect());
    }

    fn indexed(&self, server_name: &str, kind: ItemKind, item: &str) -> bool {
        self.catalogs
            .read()
            .get(server_name)
            .and_then(|catalog| catalog.names(kind))
            .is_some_and(|names| names.contains(item))
    }

    /// Whether `server_name` offers `item`: the index first, then a fresh
    /// listing if the server is connected
    async fn offers(&self, kind: ItemKind, server_name: String, item: String) -> bool {
        if self.indexed(&server_name, kind, &item) {
            return true;
        }
        if !self.connections.is_connected(&server_name) {
            return false;
        }
        let refreshed = match kind {
            ItemKind::Tool => self.list_tools(&server_name).await.map(|_| ()),
            ItemKind::Resource => self.list_resources(&server_name).await.map(|_| ()),
            ItemKind::Prompt => self.list_prompts(&server_name).await.map(|_| ()),
        };
        if let Err(e) = refreshed {
            tracing::debug!(server = %server_name, error = %e, "listing during lookup failed");
            return false;
        }
        self.indexed(&server_name, kind, &item)
    }

    /// Resolve `name` to a connected server
    async fn route(&self, kind: ItemKind, name: &str) -> McpResult<ResolvedName> {
        let servers: Vec<String> = self
            .registry
            .enabled_servers()
            .into_iter()
            .map(|config| config.name.clone())
            .collect();
        let parsed = parse_namespaced_name(name, &servers, &self.options.namespace.separator);
        if let Some(server_name) = parsed.server_name {
            if !self.connections.is_connected(&server_name) {
                return Err(McpError::server_unavailable(&server_name));
            }
        }
        let resolved = resolve_server_for_resource(
            name,
            &servers,
            |server, item| self.offers(kind, server, item),
            &self.options.namespace,
        )
        .await?
        .ok_or_else(|| McpError::not_found(name))?;

        if !self.connections.is_connected(&resolved.server_name) {
            return Err(McpError::server_unavailable(&resolved.server_name));
        }
        tracing::trace!(kind = kind.label(), name, server = %resolved.server_name, "resolved");
        Ok(resolved)
    }

    /// Count an operation and race it against shutdown
    async fn track<T>(&self, operation: impl Future<Output = McpResult<T>>) -> McpResult<T> {
        let result = self.abort.signal().race(operation).await.and_then(|r| r);
        let mut counters = self.counters.lock();
        counters.total_operations += 1;
        if result.is_ok() {
            counters.successful_operations += 1;
        } else {
            counters.failed_operations += 1;
        }
        result
    }
}

/// Health view of one server through the aggregator's connections
struct ServerHealthTarget {
    name: String,
    inner: Weak<AggregatorInner>,
}

#[async_trait]
impl HealthTarget for ServerHealthTarget {
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform_health_check(&self) -> Option<McpResult<()>> {
        let inner = self.inner.upgrade()?;
        let mode = inner.registry.get_server(&self.name)?.connection_mode;
        let result = match mode {
            ConnectionMode::Persistent => match inner.connections.persistent().instance(&self.name) {
                Some(instance) => instance.ping(None).await,
                None => Err(McpError::server_unavailable(&self.name)),
            },
            ConnectionMode::Temporary => {
                inner
                    .connections
                    .with_connection(&self.name, None, |instance| async move {
                        instance.ping(None).await
                    })
                    .await
            }
        };
        if let Err(e) = &result {
            inner.connections.record_error(&self.name, e.to_string());
        }
        Some(result)
    }

    fn is_healthy(&self) -> bool {
        self.inner
            .upgrade()
            .map(|inner| inner.connections.is_connected(&self.name))
            .unwrap_or(false)
    }

    async fn reset_error_state(&self) -> McpResult<()> {
        let inner = self
            .inner
            .upgrade()
            .ok_or_else(|| McpError::server_unavailable(&self.name))?;
        inner.connections.disconnect(&self.name).await?;
        inner
            .connections
            .with_connection(&self.name, None, |_| async { Ok(()) })
            .await
    }
}
