//! Hub configuration file
//!
//! ```yaml
//! mcpServers:
//!   fs:
//!     transportType: stdio
//!     command: npx
//!     args: ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
//!   web:
//!     type: http
//!     url: https://example.com/mcp
//!     connectionMode: temporary
//! health:
//!   checkInterval: 30000
//! ```
//!
//! Server names come from the map keys. Every section is optional.

use anyhow::{bail, Context};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::aggregator::AggregatorOptions;
use crate::error::{McpError, McpResult};
use crate::health::HealthMonitorOptions;
use crate::namespace::NamespaceOptions;
use crate::registry::ServerRegistry;
use crate::transport::RetryOptions;
use crate::types::{ServerConfig, ValidationResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubConfig {
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: IndexMap<String, ServerConfig>,
    #[serde(default)]
    pub health: HealthMonitorOptions,
    #[serde(default)]
    pub retry: RetryOptions,
    #[serde(default)]
    pub namespace: NamespaceOptions,
}

impl HubConfig {
    /// Load from a `.yaml`/`.yml` or `.json` file
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read hub config {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let config = match extension.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("json") => Self::from_json_str(&content),
            _ => bail!(
                "unsupported hub config format: {} (expected .yaml, .yml or .json)",
                path.display()
            ),
        };
        config.with_context(|| format!("failed to parse hub config {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> McpResult<Self> {
        let config: Self = serde_yaml::from_str(content).map_err(|e| {
            McpError::configuration(format!("invalid YAML hub config: {}", e))
        })?;
        Ok(config.with_names())
    }

    pub fn from_json_str(content: &str) -> McpResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        Ok(config.with_names())
    }

    /// Fill each server's `name` from its map key
    fn with_names(mut self) -> Self {
        for (name, server) in self.mcp_servers.iter_mut() {
            server.name = name.clone();
        }
        self
    }

    pub fn aggregator_options(&self) -> AggregatorOptions {
        AggregatorOptions {
            health: self.health.clone(),
            retry: self.retry.clone(),
            namespace: self.namespace.clone(),
            ..AggregatorOptions::default()
        }
    }

    /// Build a registry from the configured servers. Every server is
    /// validated; rejected ones are absent from the registry and reported in
    /// the returned results, which follow file order.
    pub fn into_registry(self) -> (Arc<ServerRegistry>, Vec<(String, ValidationResult)>) {
        let registry = ServerRegistry::with_separator(self.namespace.separator.clone());
        let results = self
            .mcp_servers
            .into_values()
            .map(|server| {
                let name = server.name.clone();
                (name, registry.add_server(server))
            })
            .collect();
        (Arc::new(registry), results)
    }
}
