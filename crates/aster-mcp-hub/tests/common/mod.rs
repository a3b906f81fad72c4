//! Hand-written MCP server stand-ins for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use aster_mcp_hub::protocol::{McpErrorData, McpMessage, McpRequest, McpResponse};
use aster_mcp_hub::{
    McpError, McpResult, ServerConfig, Transport, TransportCreation, TransportEvent,
    TransportFactory, TransportInstance, TransportState, TransportType,
};

/// Server answering `initialize`, `ping`, `tools/list` and `tools/call`
/// from a fixed tool list
pub struct StaticServer {
    tools: Vec<String>,
    state: RwLock<TransportState>,
    events: broadcast::Sender<TransportEvent>,
}

impl StaticServer {
    pub fn new(tools: &[&str]) -> Self {
        let (events, _) = broadcast::channel(8);
        Self {
            tools: tools.iter().map(|t| t.to_string()).collect(),
            state: RwLock::new(TransportState::Disconnected),
            events,
        }
    }

    fn answer(&self, request: &McpRequest) -> Result<serde_json::Value, McpErrorData> {
        match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "serverInfo": { "name": "static", "version": "1.0.0" },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({
                "tools": self.tools.iter().map(|t| json!({ "name": t })).collect::<Vec<_>>(),
            })),
            "tools/call" => {
                let name = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or_default();
                if self.tools.iter().any(|t| t == name) {
                    Ok(json!({ "content": [{ "type": "text", "text": format!("ran {}", name) }] }))
                } else {
                    Err(McpErrorData::new(-32602, format!("no tool {}", name)))
                }
            }
            other => Err(McpErrorData::new(-32601, format!("unknown method {}", other))),
        }
    }
}

#[async_trait]
impl Transport for StaticServer {
    fn transport_type(&self) -> TransportType {
        TransportType::Http
    }

    fn state(&self) -> TransportState {
        *self.state.read()
    }

    async fn connect(&self) -> McpResult<()> {
        *self.state.write() = TransportState::Connected;
        let _ = self.events.send(TransportEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> McpResult<()> {
        *self.state.write() = TransportState::Disconnected;
        Ok(())
    }

    async fn send(&self, _message: McpMessage) -> McpResult<()> {
        Ok(())
    }

    async fn send_request(&self, request: McpRequest, _timeout: Duration) -> McpResult<McpResponse> {
        if !self.is_connected() {
            return Err(McpError::transport("not connected"));
        }
        Ok(match self.answer(&request) {
            Ok(result) => McpResponse::success(request.id, result),
            Err(error) => McpResponse::error(request.id, error),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

/// Factory producing [`StaticServer`]s by server name
#[derive(Default)]
pub struct StaticFactory {
    servers: HashMap<String, Vec<&'static str>>,
    unreachable: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<HashMap<String, usize>>,
}

impl StaticFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(mut self, name: &str, tools: &[&'static str]) -> Self {
        self.servers.insert(name.to_string(), tools.to_vec());
        self
    }

    pub fn unreachable(mut self, name: &str) -> Self {
        self.unreachable.insert(name.to_string());
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TransportFactory for StaticFactory {
    async fn create_transport(
        &self,
        config: &ServerConfig,
        creation: TransportCreation,
    ) -> McpResult<TransportInstance> {
        *self.calls.lock().entry(config.name.clone()).or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.contains(&config.name) {
            return Err(McpError::transport(format!("{} is unreachable", config.name)));
        }
        let tools = self
            .servers
            .get(&config.name)
            .ok_or_else(|| McpError::transport(format!("unknown server {}", config.name)))?;

        let transport = Arc::new(StaticServer::new(tools));
        transport.connect().await?;
        let instance = TransportInstance::new(transport, creation.metadata(), config.timeout);
        instance.initialize().await?;
        Ok(instance)
    }
}

/// Http server config that gives up after one attempt
pub fn http_server(name: &str) -> ServerConfig {
    let mut config = ServerConfig::http(name, format!("https://{}.example.com/mcp", name));
    config.retries = 1;
    config
}
