//! A connected transport plus the MCP client operations spoken over it

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::base::{SharedTransport, TransportState};
use crate::error::{McpError, McpResult};
use crate::protocol::{
    call_tool_params, GetPromptResult, InitializeResult, ListPage, McpMessage, McpNotification,
    McpRequest, PromptDescriptor, ReadResourceResult, ResourceDescriptor, ToolCallResult,
    ToolDescriptor, PROTOCOL_VERSION,
};
use crate::types::{JsonObject, TransportType};

/// Upper bound on pages followed for one listing
const MAX_LIST_PAGES: usize = 100;

/// Creation metadata recorded on every instance
#[derive(Debug, Clone, PartialEq)]
pub struct TransportMetadata {
    /// Distinguishes successive instances of the same server
    pub instance_id: Uuid,
    pub server_name: String,
    pub created_at: DateTime<Utc>,
    /// 1-based attempt that produced this instance
    pub connection_attempts: u32,
    pub session_id: Option<String>,
}

impl TransportMetadata {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            server_name: server_name.into(),
            created_at: Utc::now(),
            connection_attempts: 1,
            session_id: None,
        }
    }
}

/// Owns exactly one live transport
pub struct TransportInstance {
    transport: SharedTransport,
    metadata: TransportMetadata,
    request_timeout: Duration,
    request_counter: AtomicU64,
    server_info: RwLock<Option<InitializeResult>>,
}

impl fmt::Debug for TransportInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportInstance")
            .field("metadata", &self.metadata)
            .field("transport_type", &self.transport.transport_type())
            .field("state", &self.transport.state())
            .finish()
    }
}

impl TransportInstance {
    pub fn new(
        transport: SharedTransport,
        metadata: TransportMetadata,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            metadata,
            request_timeout,
            request_counter: AtomicU64::new(1),
            server_info: RwLock::new(None),
        }
    }

    pub fn metadata(&self) -> &TransportMetadata {
        &self.metadata
    }

    pub fn server_name(&self) -> &str {
        &self.metadata.server_name
    }

    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    pub fn transport_type(&self) -> TransportType {
        self.transport.transport_type()
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Result of the `initialize` handshake, once performed
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.read().clone()
    }

    fn next_request_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a request and return its raw result.
    ///
    /// Uses the server's configured timeout unless `timeout` is given. A
    /// request that times out is announced to the server with
    /// `notifications/cancelled`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> McpResult<serde_json::Value> {
        let id = self.next_request_id();
        let request = match params {
            Some(params) => McpRequest::with_params(id, method, params),
            None => McpRequest::new(id, method),
        };
        let timeout = timeout.unwrap_or(self.request_timeout);

        tracing::trace!(server = %self.metadata.server_name, method, id, "sending request");
        match self.transport.send_request(request, timeout).await {
            Ok(response) => response.into_result(),
            Err(e) => {
                if e.is_timeout() {
                    self.notify_cancelled(id, "request timed out").await;
                }
                Err(e)
            }
        }
    }

    async fn request_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> McpResult<T> {
        let value = self.request(method, params, timeout).await?;
        serde_json::from_value(value).map_err(|e| {
            McpError::protocol(format!("malformed {} result: {}", method, e))
        })
    }

    async fn notify_cancelled(&self, id: u64, reason: &str) {
        let notification = McpNotification::with_params(
            "notifications/cancelled",
            serde_json::json!({ "requestId": id, "reason": reason }),
        );
        if let Err(e) = self
            .transport
            .send(McpMessage::Notification(notification))
            .await
        {
            tracing::debug!(server = %self.metadata.server_name, error = %e, "failed to send cancellation");
        }
    }

    /// Perform the `initialize` handshake and send `notifications/initialized`
    pub async fn initialize(&self) -> McpResult<InitializeResult> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let result: InitializeResult = self.request_as("initialize", Some(params), None).await?;
        if result.protocol_version != PROTOCOL_VERSION {
            tracing::debug!(
                server = %self.metadata.server_name,
                version = %result.protocol_version,
                "server negotiated a different protocol version"
            );
        }
        *self.server_info.write() = Some(result.clone());

        self.transport
            .send(McpMessage::Notification(McpNotification::new(
                "notifications/initialized",
            )))
            .await?;
        Ok(result)
    }

    pub async fn ping(&self, timeout: Option<Duration>) -> McpResult<()> {
        self.request("ping", None, timeout).await.map(|_| ())
    }

    async fn list_all<T: DeserializeOwned>(&self, method: &str) -> McpResult<Vec<T>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.take().map(|c| serde_json::json!({ "cursor": c }));
            let page: ListPage<T> = self.request_as(method, params, None).await?;
            items.extend(page.items);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(items),
            }
        }
        tracing::warn!(server = %self.metadata.server_name, method, "listing truncated after page limit");
        Ok(items)
    }

    pub async fn list_tools(&self) -> McpResult<Vec<ToolDescriptor>> {
        self.list_all("tools/list").await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        timeout: Option<Duration>,
    ) -> McpResult<ToolCallResult> {
        self.request_as("tools/call", Some(call_tool_params(name, arguments)), timeout)
            .await
    }

    pub async fn list_resources(&self) -> McpResult<Vec<ResourceDescriptor>> {
        self.list_all("resources/list").await
    }

    pub async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        self.request_as("resources/read", Some(serde_json::json!({ "uri": uri })), None)
            .await
    }

    pub async fn list_prompts(&self) -> McpResult<Vec<PromptDescriptor>> {
        self.list_all("prompts/list").await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<GetPromptResult> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments.unwrap_or_default(),
        });
        self.request_as("prompts/get", Some(params), None).await
    }

    /// Disconnect the underlying transport. Safe to call more than once.
    pub async fn close(&self) -> McpResult<()> {
        self.transport.disconnect().await
    }
}

/// Instances are shared between a strategy and in-flight handles
pub type SharedInstance = Arc<TransportInstance>;
