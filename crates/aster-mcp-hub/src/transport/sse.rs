//! SSE transport
//!
//! Opens a long-lived `GET` event stream. The server first announces, in an
//! `endpoint` event, the URL that client messages must be POSTed to; every
//! later `message` event carries one JSON-RPC message. Responses arrive on the
//! stream and are matched to their request by id.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{HeaderValue, ACCEPT};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use url::Url;

use super::base::{Transport, TransportEvent, TransportState, EVENT_CHANNEL_CAPACITY};
use super::http::build_headers;
use super::pending::PendingRequests;
use super::sse_codec::SseDecoder;
use crate::error::{McpError, McpResult};
use crate::protocol::{McpMessage, McpRequest, McpResponse};
use crate::sync::{AbortController, AbortReason, AbortSignal, Event};
use crate::types::TransportType;

/// SSE-specific configuration
#[derive(Debug, Clone)]
pub struct SseConfig {
    pub server_name: String,
    pub url: Url,
    /// Config headers merged with caller headers
    pub headers: HashMap<String, String>,
    pub session_id: Option<String>,
    /// Bound for opening the stream and receiving the endpoint event
    pub connect_timeout: Duration,
}

struct StreamShared {
    server_name: String,
    base_url: Url,
    state: RwLock<TransportState>,
    endpoint: Mutex<Option<Url>>,
    endpoint_ready: Event,
    last_event_id: Mutex<Option<String>>,
    stream_open: AtomicBool,
    pending: PendingRequests,
    events: broadcast::Sender<TransportEvent>,
}

impl StreamShared {
    fn handle_event(&self, event: &str, data: &str) {
        match event {
            "endpoint" => match self.base_url.join(data.trim()) {
                Ok(endpoint) => {
                    tracing::debug!(server = %self.server_name, endpoint = %endpoint, "sse endpoint announced");
                    *self.endpoint.lock() = Some(endpoint);
                    self.endpoint_ready.set();
                }
                Err(e) => {
                    tracing::warn!(server = %self.server_name, error = %e, "invalid endpoint event")
                }
            },
            "message" => self.pending.dispatch_text(data, &self.events),
            other => tracing::debug!(server = %self.server_name, event = other, "ignoring sse event"),
        }
    }

    /// A stream that ends mid-handshake is reported by `connect` instead
    fn stream_closed(&self, reason: &str) {
        let mut state = self.state.write();
        self.stream_open.store(false, Ordering::SeqCst);
        let was_open = matches!(*state, TransportState::Connected | TransportState::Closing);
        if was_open {
            *state = TransportState::Disconnected;
        }
        drop(state);
        self.pending.cancel_all(reason);
        if was_open {
            let _ = self.events.send(TransportEvent::Disconnected {
                reason: Some(reason.to_string()),
            });
        }
    }
}

/// SSE transport for MCP communication
pub struct SseTransport {
    config: SseConfig,
    shared: Arc<StreamShared>,
    client: RwLock<Option<reqwest::Client>>,
    shutdown: Mutex<Option<AbortController>>,
}

impl SseTransport {
    pub fn new(config: SseConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(StreamShared {
            server_name: config.server_name.clone(),
            base_url: config.url.clone(),
            state: RwLock::new(TransportState::Disconnected),
            endpoint: Mutex::new(None),
            endpoint_ready: Event::new(),
            last_event_id: Mutex::new(None),
            stream_open: AtomicBool::new(false),
            pending: PendingRequests::default(),
            events,
        });
        Self {
            config,
            shared,
            client: RwLock::new(None),
            shutdown: Mutex::new(None),
        }
    }

    /// Id of the last event received, sent as `Last-Event-ID` on reconnect
    pub fn last_event_id(&self) -> Option<String> {
        self.shared.last_event_id.lock().clone()
    }

    /// Endpoint announced by the server
    pub fn endpoint(&self) -> Option<Url> {
        self.shared.endpoint.lock().clone()
    }

    fn error(&self, message: impl Into<String>, source: Option<reqwest::Error>) -> McpError {
        McpError::sse_transport(
            message,
            self.config.url.as_str(),
            source.map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
        )
    }

    fn fail(&self, err: McpError) -> McpError {
        *self.shared.state.write() = TransportState::Error;
        err
    }

    fn start_reader_task(&self, response: reqwest::Response, shutdown: AbortSignal) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            let mut body = response.bytes_stream();
            let reason = loop {
                let chunk = match shutdown.race(body.next()).await {
                    Err(_) => return,
                    Ok(None) => break "event stream ended",
                    Ok(Some(Err(e))) => {
                        tracing::warn!(server = %shared.server_name, error = %e, "sse stream error");
                        break "event stream error";
                    }
                    Ok(Some(Ok(chunk))) => chunk,
                };
                for event in decoder.push(&chunk) {
                    if let Some(id) = &event.id {
                        *shared.last_event_id.lock() = Some(id.clone());
                    }
                    shared.handle_event(&event.event, &event.data);
                }
            };
            shared.stream_closed(reason);
        });
    }

    async fn post(&self, message: &McpMessage) -> McpResult<()> {
        if *self.shared.state.read() != TransportState::Connected {
            return Err(McpError::transport(format!(
                "sse transport for '{}' is not connected",
                self.config.server_name
            )));
        }
        let client = self
            .client
            .read()
            .clone()
            .ok_or_else(|| McpError::transport("HTTP client not initialized"))?;
        let endpoint = self
            .endpoint()
            .ok_or_else(|| McpError::protocol("server has not announced an endpoint"))?;

        let response = client
            .post(endpoint)
            .json(message)
            .send()
            .await
            .map_err(|e| self.error("POST to endpoint failed", Some(e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.error(format!("endpoint responded with status {}", status), None));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Sse
    }

    fn state(&self) -> TransportState {
        *self.shared.state.read()
    }

    async fn connect(&self) -> McpResult<()> {
        *self.shared.state.write() = TransportState::Connecting;
        self.shared.endpoint_ready.clear();

        let headers = build_headers(
            &self.config.server_name,
            &self.config.headers,
            self.config.session_id.as_deref(),
        )
        .map_err(|e| self.fail(e))?;
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(self.config.connect_timeout)
            .build()
            .map_err(|e| self.fail(self.error("failed to create HTTP client", Some(e))))?;

        let mut request = client
            .get(self.config.url.clone())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"));
        if let Some(last_id) = self.last_event_id() {
            request = request.header("Last-Event-ID", last_id);
        }

        let response = tokio::time::timeout(self.config.connect_timeout, request.send())
            .await
            .map_err(|_| {
                self.fail(McpError::timeout(
                    "timed out opening event stream",
                    self.config.connect_timeout,
                ))
            })?
            .map_err(|e| self.fail(self.error("failed to open event stream", Some(e))))?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.fail(self.error(
                format!("event stream responded with status {}", status),
                None,
            )));
        }

        let shutdown = AbortController::new();
        self.shared.stream_open.store(true, Ordering::SeqCst);
        self.start_reader_task(response, shutdown.signal());
        *self.shutdown.lock() = Some(shutdown);

        if let Err(e) = self
            .shared
            .endpoint_ready
            .wait_with_timeout(self.config.connect_timeout)
            .await
        {
            if let Some(shutdown) = self.shutdown.lock().take() {
                shutdown.abort(AbortReason::Timeout);
            }
            return Err(self.fail(e));
        }

        {
            let mut state = self.shared.state.write();
            if !self.shared.stream_open.load(Ordering::SeqCst) {
                *state = TransportState::Disconnected;
                self.shutdown.lock().take();
                return Err(self.error("event stream closed during handshake", None));
            }
            *state = TransportState::Connected;
        }
        *self.client.write() = Some(client);
        let _ = self.shared.events.send(TransportEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> McpResult<()> {
        let shutdown = self.shutdown.lock().take();
        let Some(shutdown) = shutdown else {
            *self.shared.state.write() = TransportState::Disconnected;
            return Ok(());
        };
        *self.shared.state.write() = TransportState::Closing;
        shutdown.abort(AbortReason::Shutdown);
        self.client.write().take();
        self.shared.stream_closed("disconnected by client");
        Ok(())
    }

    async fn send(&self, message: McpMessage) -> McpResult<()> {
        self.post(&message).await
    }

    async fn send_request(&self, request: McpRequest, timeout: Duration) -> McpResult<McpResponse> {
        let (key, rx) = self.shared.pending.register(&request.id)?;
        if let Err(e) = self.post(&McpMessage::Request(request)).await {
            self.shared.pending.remove(&key);
            return Err(e);
        }
        self.shared.pending.wait(&key, rx, timeout).await
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }
}
