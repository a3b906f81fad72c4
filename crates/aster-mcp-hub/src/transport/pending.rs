//! Correlation of responses to in-flight requests
//!
//! Transports that receive responses asynchronously (stdio, sse) register each
//! outgoing request here and complete it when the matching response arrives.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

use super::base::TransportEvent;
use crate::error::{McpError, McpResult};
use crate::protocol::{McpMessage, McpResponse, RequestId};

type ResponseSender = oneshot::Sender<McpResult<McpResponse>>;
type ResponseReceiver = oneshot::Receiver<McpResult<McpResponse>>;

#[derive(Default)]
pub(crate) struct PendingRequests {
    inner: Mutex<HashMap<String, ResponseSender>>,
}

/// Map key for a JSON-RPC id
pub(crate) fn id_key(id: &RequestId) -> Option<String> {
    match id {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl PendingRequests {
    pub fn register(&self, id: &RequestId) -> McpResult<(String, ResponseReceiver)> {
        let key = id_key(id).ok_or_else(|| McpError::protocol("invalid request id type"))?;
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(key.clone(), tx);
        Ok((key, rx))
    }

    pub fn remove(&self, key: &str) {
        self.inner.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Wait at most `timeout` for the response registered under `key`
    pub async fn wait(
        &self,
        key: &str,
        rx: ResponseReceiver,
        timeout: Duration,
    ) -> McpResult<McpResponse> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::transport("response channel closed")),
            Err(_) => {
                self.remove(key);
                Err(McpError::timeout(
                    format!("request {} timed out", key),
                    timeout,
                ))
            }
        }
    }

    /// Fail every in-flight request, e.g. because the channel closed
    pub fn cancel_all(&self, reason: &str) {
        let drained: Vec<_> = self.inner.lock().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(McpError::cancelled(
                format!("transport closed: {}", reason),
                Some(reason.to_string()),
            )));
        }
    }

    /// Route one incoming message: responses complete their request, anything
    /// else is published as an event
    pub fn dispatch(&self, message: McpMessage, events: &broadcast::Sender<TransportEvent>) {
        match message {
            McpMessage::Response(response) => {
                let sender = id_key(&response.id).and_then(|key| self.inner.lock().remove(&key));
                match sender {
                    Some(tx) => {
                        let _ = tx.send(Ok(response));
                    }
                    None => tracing::debug!(id = %response.id, "response for unknown request"),
                }
            }
            other => {
                let _ = events.send(TransportEvent::MessageReceived(other));
            }
        }
    }

    /// Parse and route one line of text
    pub fn dispatch_text(&self, text: &str, events: &broadcast::Sender<TransportEvent>) {
        match McpMessage::parse(text) {
            Ok(message) => self.dispatch(message, events),
            Err(e) => tracing::warn!(error = %e, "ignoring malformed message"),
        }
    }
}
