//! Aster MCP Hub
//!
//! Connection, aggregation and resilience layer for Model Context Protocol
//! servers. Many stdio, HTTP and SSE servers are presented as one: their
//! tools, resources and prompts are merged under namespaced names and calls
//! are routed to the server that owns them.
//!
//! ```text
//!                       ┌──────────────────────┐
//!   callers ──────────▶ │     McpAggregator    │ ◀── HubConfig
//!                       └──────────┬───────────┘
//!            namespace ◀───────────┤───────────▶ HealthMonitor (per server)
//!                                  ▼
//!   ServerRegistry ◀──── ConnectionManager ────▶ persistent / temporary
//!                                  │
//!                                  ▼
//!                          TransportFactory ───▶ stdio │ http │ sse
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use aster_mcp_hub::{DefaultTransportFactory, HubConfig, McpAggregator};
//!
//! let config = HubConfig::from_path("hub.yaml")?;
//! let options = config.aggregator_options();
//! let (registry, _validation) = config.into_registry();
//! let hub = McpAggregator::with_options(registry, Arc::new(DefaultTransportFactory), options);
//!
//! hub.initialize().await?;
//! let tools = hub.get_all_tools().await;
//! let result = hub.execute_tool("web_search", None, None).await?;
//! hub.shutdown().await;
//! ```

pub mod aggregator;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_store;
pub mod health;
pub mod logging;
pub mod namespace;
pub mod protocol;
pub mod registry;
pub mod sync;
pub mod transport;
pub mod types;

#[cfg(test)]
mod aggregator_tests;
#[cfg(test)]
mod testing;

pub use aggregator::{
    AggregatedPrompt, AggregatedResource, AggregatedTool, AggregatorOptions,
    AggregatorStatistics, InitializationSummary, McpAggregator, ServerStatus,
};
pub use config::HubConfig;
pub use connection::{
    ConnectionHandle, ConnectionManager, ConnectionState, ConnectionStrategy, SharedFactory,
};
pub use error::{McpError, McpErrorCode, McpResult, StructuredError};
pub use event_store::{InMemoryEventStore, StoredEvent};
pub use health::{
    HealthCheckResult, HealthEvent, HealthEventKind, HealthMetrics, HealthMonitor,
    HealthMonitorOptions, HealthStatus, HealthTarget, MonitorState,
};
pub use namespace::{
    create_namespaced_name, parse_namespaced_name, resolve_server_for_resource, FallbackPolicy,
    NamespaceEntry, NamespaceOptions, ParsedName, ResolvedName,
};
pub use registry::{RegistryEntry, RegistryEvent, RegistryState, ServerRegistry};
pub use transport::{
    DefaultTransportFactory, RetryOptions, SharedInstance, Transport, TransportCreation,
    TransportEvent, TransportFactory, TransportInstance, TransportState,
};
pub use types::{
    ConfigFieldError, ConnectionMode, JsonObject, ServerConfig, TransportType, ValidationResult,
};
