//! Streamable HTTP transport
//!
//! Every client message is POSTed to the endpoint. The server answers a
//! request either with a JSON body or with an event stream carrying the
//! response (and possibly notifications before it). A session id returned
//! in `Mcp-Session-Id` is echoed on every later request.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use url::Url;

use super::base::{Transport, TransportEvent, TransportState, EVENT_CHANNEL_CAPACITY};
use super::pending::id_key;
use super::sse_codec::SseDecoder;
use crate::error::{McpError, McpResult};
use crate::protocol::{McpMessage, McpRequest, McpResponse};
use crate::types::TransportType;

/// Header carrying the session id assigned by a streamable HTTP server
pub const MCP_SESSION_HEADER: &str = "mcp-session-id";
/// Header carrying the caller's session id
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Build the header map shared by the http and sse transports: config
/// headers, then caller headers, then the session headers.
pub(crate) fn build_headers(
    server_name: &str,
    headers: &HashMap<String, String>,
    session_id: Option<&str>,
) -> McpResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            McpError::configuration_field(server_name, "headers", format!("bad header '{}': {}", key, e))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            McpError::configuration_field(
                server_name,
                "headers",
                format!("bad value for header '{}': {}", key, e),
            )
        })?;
        map.insert(name, value);
    }
    if let Some(session_id) = session_id {
        let value = HeaderValue::from_str(session_id).map_err(|e| {
            McpError::configuration(format!("session id is not a valid header value: {}", e))
        })?;
        map.insert(HeaderName::from_static(SESSION_ID_HEADER), value.clone());
        map.insert(HeaderName::from_static(MCP_SESSION_HEADER), value);
    }
    Ok(map)
}

/// HTTP-specific configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub server_name: String,
    pub url: Url,
    /// Config headers merged with caller headers
    pub headers: HashMap<String, String>,
    pub session_id: Option<String>,
    /// Bound for establishing the TCP/TLS connection
    pub connect_timeout: Duration,
}

/// Streamable HTTP transport for MCP communication
pub struct HttpTransport {
    config: HttpConfig,
    state: RwLock<TransportState>,
    client: RwLock<Option<reqwest::Client>>,
    server_session: Mutex<Option<String>>,
    events: broadcast::Sender<TransportEvent>,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            state: RwLock::new(TransportState::Disconnected),
            client: RwLock::new(None),
            server_session: Mutex::new(None),
            events,
        }
    }

    /// Session id the server assigned, if any
    pub fn server_session_id(&self) -> Option<String> {
        self.server_session.lock().clone()
    }

    fn error(&self, message: impl Into<String>, source: Option<reqwest::Error>) -> McpError {
        McpError::http_transport(
            message,
            self.config.url.as_str(),
            source.map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
        )
    }

    fn client(&self) -> McpResult<reqwest::Client> {
        if *self.state.read() != TransportState::Connected {
            return Err(McpError::transport(format!(
                "http transport for '{}' is not connected",
                self.config.server_name
            )));
        }
        self.client
            .read()
            .clone()
            .ok_or_else(|| McpError::transport("HTTP client not initialized"))
    }

    async fn post(&self, message: &McpMessage) -> McpResult<reqwest::Response> {
        let client = self.client()?;
        let mut request = client.post(self.config.url.clone()).json(message);
        if let Some(session) = self.server_session_id() {
            request = request.header(MCP_SESSION_HEADER, session);
        }
        let response = request
            .send()
            .await
            .map_err(|e| self.error("request failed", Some(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.error(format!("server responded with status {}", status), None));
        }
        if let Some(session) = response
            .headers()
            .get(MCP_SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.server_session.lock() = Some(session.to_string());
        }
        Ok(response)
    }

    /// Read an event-stream body until the response for `key` arrives
    async fn read_streamed_response(
        &self,
        response: reqwest::Response,
        key: &str,
    ) -> McpResult<McpResponse> {
        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| self.error("event stream interrupted", Some(e)))?;
            for event in decoder.push(&chunk) {
                if let Some(found) = self.route_streamed(&event.data, key) {
                    return Ok(found);
                }
            }
        }
        if let Some(event) = decoder.finish() {
            if let Some(found) = self.route_streamed(&event.data, key) {
                return Ok(found);
            }
        }
        Err(McpError::protocol(
            "event stream ended before the response arrived",
        ))
    }

    fn route_streamed(&self, data: &str, key: &str) -> Option<McpResponse> {
        match McpMessage::parse(data) {
            Ok(McpMessage::Response(resp)) if id_key(&resp.id).as_deref() == Some(key) => {
                Some(resp)
            }
            Ok(other) => {
                let _ = self.events.send(TransportEvent::MessageReceived(other));
                None
            }
            Err(e) => {
                tracing::warn!(server = %self.config.server_name, error = %e, "ignoring malformed event");
                None
            }
        }
    }

    async fn exchange(&self, request: McpRequest) -> McpResult<McpResponse> {
        let key = id_key(&request.id).ok_or_else(|| McpError::protocol("invalid request id type"))?;
        let response = self.post(&McpMessage::Request(request)).await?;

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        if is_stream {
            return self.read_streamed_response(response, &key).await;
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.error("failed to read response body", Some(e)))?;
        match McpMessage::parse(&body)? {
            McpMessage::Response(resp) => Ok(resp),
            _ => Err(McpError::protocol("expected a JSON-RPC response body")),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Http
    }

    fn state(&self) -> TransportState {
        *self.state.read()
    }

    async fn connect(&self) -> McpResult<()> {
        *self.state.write() = TransportState::Connecting;

        let mut headers = build_headers(
            &self.config.server_name,
            &self.config.headers,
            self.config.session_id.as_deref(),
        )?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(self.config.connect_timeout)
            .build()
            .map_err(|e| {
                *self.state.write() = TransportState::Error;
                self.error("failed to create HTTP client", Some(e))
            })?;

        *self.client.write() = Some(client);
        *self.state.write() = TransportState::Connected;
        let _ = self.events.send(TransportEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> McpResult<()> {
        let client = self.client.write().take();
        if client.is_none() {
            *self.state.write() = TransportState::Disconnected;
            return Ok(());
        }
        *self.state.write() = TransportState::Closing;

        // Ending a server-assigned session is a courtesy; failures are only logged.
        let session = self.server_session.lock().take();
        if let (Some(client), Some(session)) = (client, session) {
            let ended = client
                .delete(self.config.url.clone())
                .header(MCP_SESSION_HEADER, session)
                .send()
                .await;
            if let Err(e) = ended {
                tracing::debug!(server = %self.config.server_name, error = %e, "session delete failed");
            }
        }

        *self.state.write() = TransportState::Disconnected;
        let _ = self.events.send(TransportEvent::Disconnected {
            reason: Some("disconnected by client".to_string()),
        });
        Ok(())
    }

    async fn send(&self, message: McpMessage) -> McpResult<()> {
        self.post(&message).await.map(|_| ())
    }

    async fn send_request(&self, request: McpRequest, timeout: Duration) -> McpResult<McpResponse> {
        tokio::time::timeout(timeout, self.exchange(request))
            .await
            .map_err(|_| McpError::timeout("HTTP request timed out", timeout))?
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
