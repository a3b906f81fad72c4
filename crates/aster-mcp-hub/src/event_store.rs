//! Bounded, resumable event history
//!
//! Events are kept per stream. Each gets an id of the form
//! `{stream_id}_{sequence}` where the sequence increases monotonically within
//! the stream, so a client that reconnects with `Last-Event-ID` can be sent
//! exactly the events it missed.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

use crate::error::{McpError, McpResult};
use crate::protocol::McpMessage;
use crate::transport::sse_codec::SseEvent;

/// Default number of events retained per stream
pub const DEFAULT_MAX_EVENTS_PER_STREAM: usize = 1000;

const ID_SEPARATOR: char = '_';

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: String,
    pub stream_id: String,
    pub sequence: u64,
    pub message: McpMessage,
    pub stored_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Frame as an SSE `message` event carrying this event's id
    pub fn to_sse(&self) -> McpResult<SseEvent> {
        Ok(SseEvent::message(serde_json::to_string(&self.message)?).with_id(&self.id))
    }
}

#[derive(Debug, Default)]
struct StreamHistory {
    next_sequence: u64,
    events: VecDeque<StoredEvent>,
}

/// Split an event id into stream id and sequence
pub fn parse_event_id(event_id: &str) -> Option<(&str, u64)> {
    let (stream, sequence) = event_id.rsplit_once(ID_SEPARATOR)?;
    if stream.is_empty() {
        return None;
    }
    Some((stream, sequence.parse().ok()?))
}

#[derive(Debug)]
pub struct InMemoryEventStore {
    max_events_per_stream: usize,
    streams: RwLock<HashMap<String, StreamHistory>>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENTS_PER_STREAM)
    }
}

impl InMemoryEventStore {
    pub fn new(max_events_per_stream: usize) -> Self {
        Self {
            max_events_per_stream: max_events_per_stream.max(1),
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Append `message` to `stream_id` and return the assigned event id.
    /// The oldest event is dropped once the stream is full.
    pub fn store_event(&self, stream_id: &str, message: McpMessage) -> String {
        let mut streams = self.streams.write();
        let history = streams.entry(stream_id.to_string()).or_default();
        history.next_sequence += 1;
        let sequence = history.next_sequence;
        let id = format!("{}{}{}", stream_id, ID_SEPARATOR, sequence);
        history.events.push_back(StoredEvent {
            id: id.clone(),
            stream_id: stream_id.to_string(),
            sequence,
            message,
            stored_at: Utc::now(),
        });
        while history.events.len() > self.max_events_per_stream {
            history.events.pop_front();
        }
        id
    }

    /// Events of the same stream stored after `last_event_id`, oldest first.
    ///
    /// If events after `last_event_id` were already trimmed, everything still
    /// retained is returned.
    pub fn replay_events_after(&self, last_event_id: &str) -> McpResult<Vec<StoredEvent>> {
        let (stream_id, last_sequence) = parse_event_id(last_event_id).ok_or_else(|| {
            McpError::validation(
                format!("malformed event id '{}'", last_event_id),
                vec![format!("expected <stream>{}<sequence>", ID_SEPARATOR)],
            )
        })?;

        let streams = self.streams.read();
        let history = streams
            .get(stream_id)
            .ok_or_else(|| McpError::not_found(format!("event stream '{}'", stream_id)))?;

        if let Some(first) = history.events.front() {
            if first.sequence > last_sequence.saturating_add(1) {
                tracing::warn!(
                    stream = stream_id,
                    requested = last_sequence,
                    oldest = first.sequence,
                    "replay window exceeded, some events were trimmed"
                );
            }
        }
        Ok(history
            .events
            .iter()
            .filter(|e| e.sequence > last_sequence)
            .cloned()
            .collect())
    }

    pub fn stream_len(&self, stream_id: &str) -> usize {
        self.streams
            .read()
            .get(stream_id)
            .map_or(0, |h| h.events.len())
    }

    pub fn remove_stream(&self, stream_id: &str) -> bool {
        self.streams.write().remove(stream_id).is_some()
    }

    pub fn clear(&self) {
        self.streams.write().clear();
    }
}
