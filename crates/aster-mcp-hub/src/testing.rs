//! In-memory transport and factory for exercising the hub without real servers
//!
//! [`MockTransport`] answers the MCP methods the hub uses from a small catalog
//! of tools, resources and prompts. [`MockTransportFactory`] hands out fresh
//! mock transports per server and counts how often it was asked to.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::error::{McpError, McpResult};
use crate::protocol::{
    McpErrorData, McpMessage, McpNotification, McpRequest, McpResponse, PROTOCOL_VERSION,
};
use crate::transport::{
    Transport, TransportCreation, TransportEvent, TransportFactory, TransportInstance,
    TransportState,
};
use crate::types::{ServerConfig, TransportType};

type Handler = Arc<dyn Fn(&McpRequest) -> McpResult<serde_json::Value> + Send + Sync>;

#[derive(Debug, Default, Clone)]
struct Catalog {
    tools: Vec<String>,
    resources: Vec<String>,
    prompts: Vec<String>,
}

struct MockInner {
    transport_type: TransportType,
    state: RwLock<TransportState>,
    catalog: RwLock<Catalog>,
    handler: RwLock<Option<Handler>>,
    delay: RwLock<Option<Duration>>,
    failing: AtomicBool,
    notifications: Mutex<Vec<String>>,
    requests: Mutex<Vec<String>>,
    events: broadcast::Sender<TransportEvent>,
}

/// Scriptable in-memory transport. Clones share state.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(MockInner {
                transport_type: TransportType::Stdio,
                state: RwLock::new(TransportState::Disconnected),
                catalog: RwLock::new(Catalog::default()),
                handler: RwLock::new(None),
                delay: RwLock::new(None),
                failing: AtomicBool::new(false),
                notifications: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    pub fn with_tools(self, tools: Vec<&str>) -> Self {
        self.inner.catalog.write().tools = tools.into_iter().map(String::from).collect();
        self
    }

    /// Resources are listed with `uri` and `name` both set to each entry
    pub fn with_resources(self, resources: Vec<&str>) -> Self {
        self.inner.catalog.write().resources = resources.into_iter().map(String::from).collect();
        self
    }

    pub fn with_prompts(self, prompts: Vec<&str>) -> Self {
        self.inner.catalog.write().prompts = prompts.into_iter().map(String::from).collect();
        self
    }

    /// Replace the built-in method handling
    pub fn with_handler(
        self,
        handler: impl Fn(&McpRequest) -> McpResult<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        *self.inner.handler.write() = Some(Arc::new(handler));
        self
    }

    /// Delay every response
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.inner.delay.write() = Some(delay);
        self
    }

    /// Make every request fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Simulate the server going away
    pub fn drop_connection(&self) {
        *self.inner.state.write() = TransportState::Disconnected;
        let _ = self.inner.events.send(TransportEvent::Disconnected {
            reason: Some("remote closed".into()),
        });
    }

    /// Push a server-initiated notification to subscribers. Returns the
    /// number of receivers that saw it.
    pub fn emit_notification(&self, method: &str, params: serde_json::Value) -> usize {
        let notification = McpNotification::with_params(method, params);
        self.inner
            .events
            .send(TransportEvent::MessageReceived(McpMessage::Notification(
                notification,
            )))
            .unwrap_or(0)
    }

    pub fn is_open(&self) -> bool {
        *self.inner.state.read() == TransportState::Connected
    }

    /// Methods of notifications sent so far
    pub fn notifications(&self) -> Vec<String> {
        self.inner.notifications.lock().clone()
    }

    /// Methods of requests received so far
    pub fn requests(&self) -> Vec<String> {
        self.inner.requests.lock().clone()
    }

    fn respond(&self, request: &McpRequest) -> McpResult<serde_json::Value> {
        let handler = self.inner.handler.read().clone();
        if let Some(handler) = handler {
            return handler(request);
        }
        let catalog = self.inner.catalog.read().clone();
        let param = |key: &str| {
            request
                .params
                .as_ref()
                .and_then(|p| p.get(key))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        match request.method.as_str() {
            "initialize" => Ok(serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
                "serverInfo": { "name": "mock", "version": "0.0.0" },
            })),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => Ok(serde_json::json!({
                "tools": catalog.tools.iter().map(|name| serde_json::json!({
                    "name": name,
                    "description": format!("{} tool", name),
                    "inputSchema": { "type": "object" },
                })).collect::<Vec<_>>(),
            })),
            "tools/call" => {
                let name = param("name");
                if !catalog.tools.contains(&name) {
                    return Err(McpError::server(-32602, format!("unknown tool {}", name), None));
                }
                let arguments = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("arguments"))
                    .cloned()
                    .unwrap_or_default();
                Ok(serde_json::json!({
                    "content": [{ "type": "text", "text": format!("{} {}", name, arguments) }],
                }))
            }
            "resources/list" => Ok(serde_json::json!({
                "resources": catalog.resources.iter().map(|uri| serde_json::json!({
                    "uri": uri,
                    "name": uri,
                })).collect::<Vec<_>>(),
            })),
            "resources/read" => {
                let uri = param("uri");
                if !catalog.resources.contains(&uri) {
                    return Err(McpError::server(-32602, format!("unknown resource {}", uri), None));
                }
                Ok(serde_json::json!({
                    "contents": [{ "uri": uri, "text": format!("contents of {}", uri) }],
                }))
            }
            "prompts/list" => Ok(serde_json::json!({
                "prompts": catalog.prompts.iter().map(|name| serde_json::json!({
                    "name": name,
                })).collect::<Vec<_>>(),
            })),
            "prompts/get" => {
                let name = param("name");
                if !catalog.prompts.contains(&name) {
                    return Err(McpError::server(-32602, format!("unknown prompt {}", name), None));
                }
                Ok(serde_json::json!({
                    "messages": [{ "role": "user", "content": { "type": "text", "text": name } }],
                }))
            }
            other => Err(McpError::server(
                -32601,
                format!("method not found: {}", other),
                None,
            )),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn transport_type(&self) -> TransportType {
        self.inner.transport_type
    }

    fn state(&self) -> TransportState {
        *self.inner.state.read()
    }

    async fn connect(&self) -> McpResult<()> {
        *self.inner.state.write() = TransportState::Connected;
        let _ = self.inner.events.send(TransportEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> McpResult<()> {
        let was_connected = {
            let mut state = self.inner.state.write();
            let was = *state == TransportState::Connected;
            *state = TransportState::Disconnected;
            was
        };
        if was_connected {
            let _ = self
                .inner
                .events
                .send(TransportEvent::Disconnected { reason: None });
        }
        Ok(())
    }

    async fn send(&self, message: McpMessage) -> McpResult<()> {
        if !self.is_connected() {
            return Err(McpError::transport("mock transport is not connected"));
        }
        if let Some(method) = message.method() {
            self.inner.notifications.lock().push(method.to_string());
        }
        Ok(())
    }

    async fn send_request(&self, request: McpRequest, timeout: Duration) -> McpResult<McpResponse> {
        if !self.is_connected() {
            return Err(McpError::transport("mock transport is not connected"));
        }
        self.inner.requests.lock().push(request.method.clone());

        let delay = *self.inner.delay.read();
        let work = async {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.inner.failing.load(Ordering::SeqCst) {
                return Err(McpError::transport("mock failure"));
            }
            match self.respond(&request) {
                Ok(result) => Ok(McpResponse::success(request.id.clone(), result)),
                Err(McpError::Server { code, message, data }) => Ok(McpResponse::error(
                    request.id.clone(),
                    McpErrorData {
                        code,
                        message,
                        data,
                    },
                )),
                Err(e) => Err(e),
            }
        };
        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| McpError::timeout(format!("{} timed out", request.method), timeout))?
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }
}

type Builder = Arc<dyn Fn() -> MockTransport + Send + Sync>;

enum Behavior {
    Ready(Builder),
    Failing(String),
    /// Fails the first `remaining` creations, then behaves like `Ready`
    Flaky {
        remaining: u32,
        builder: Builder,
    },
}

/// Factory handing out [`MockTransport`]s by server name
#[derive(Default)]
pub struct MockTransportFactory {
    behaviors: Mutex<HashMap<String, Behavior>>,
    creations: Mutex<HashMap<String, usize>>,
    transports: Mutex<HashMap<String, MockTransport>>,
    create_delay: Option<Duration>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server exposing `tools`
    pub fn with_server(self, name: &str, tools: Vec<&str>) -> Self {
        let tools: Vec<String> = tools.into_iter().map(String::from).collect();
        self.with_builder(name, move || {
            MockTransport::new().with_tools(tools.iter().map(String::as_str).collect())
        })
    }

    /// Server whose transports are produced by `builder`
    pub fn with_builder(
        self,
        name: &str,
        builder: impl Fn() -> MockTransport + Send + Sync + 'static,
    ) -> Self {
        self.behaviors
            .lock()
            .insert(name.to_string(), Behavior::Ready(Arc::new(builder)));
        self
    }

    /// Server whose creation always fails with a transport error
    pub fn with_failing_server(self, name: &str, message: &str) -> Self {
        self.behaviors
            .lock()
            .insert(name.to_string(), Behavior::Failing(message.to_string()));
        self
    }

    /// Server that fails `failures` times before connecting
    pub fn with_flaky_server(self, name: &str, failures: u32, tools: Vec<&str>) -> Self {
        let tools: Vec<String> = tools.into_iter().map(String::from).collect();
        let builder: Builder = Arc::new(move || {
            MockTransport::new().with_tools(tools.iter().map(String::as_str).collect())
        });
        self.behaviors.lock().insert(
            name.to_string(),
            Behavior::Flaky {
                remaining: failures,
                builder,
            },
        );
        self
    }

    /// Delay every creation, to widen race windows in tests
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Number of creations requested for `name`
    pub fn creations(&self, name: &str) -> usize {
        self.creations.lock().get(name).copied().unwrap_or(0)
    }

    /// Most recently created transport for `name`
    pub fn last_transport(&self, name: &str) -> Option<MockTransport> {
        self.transports.lock().get(name).cloned()
    }

    fn next_transport(&self, name: &str) -> McpResult<MockTransport> {
        let mut behaviors = self.behaviors.lock();
        match behaviors.get_mut(name) {
            None => Err(McpError::transport(format!("no mock server named '{}'", name))),
            Some(Behavior::Failing(message)) => Err(McpError::transport(message.clone())),
            Some(Behavior::Ready(builder)) => Ok(builder()),
            Some(Behavior::Flaky { remaining, builder }) => {
                if *remaining > 0 {
                    *remaining -= 1;
                    Err(McpError::transport("connection refused"))
                } else {
                    Ok(builder())
                }
            }
        }
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create_transport(
        &self,
        config: &ServerConfig,
        creation: TransportCreation,
    ) -> McpResult<TransportInstance> {
        *self.creations.lock().entry(config.name.clone()).or_insert(0) += 1;
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }

        let transport = self.next_transport(&config.name)?;
        transport.connect().await?;
        self.transports
            .lock()
            .insert(config.name.clone(), transport.clone());

        let instance =
            TransportInstance::new(Arc::new(transport), creation.metadata(), config.timeout);
        instance.initialize().await?;
        Ok(instance)
    }
}
