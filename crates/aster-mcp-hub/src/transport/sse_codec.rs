//! Server-sent event framing
//!
//! [`SseDecoder`] turns arbitrary byte chunks into complete events. It
//! handles LF and CRLF line endings, multi-line `data:` fields, comments and
//! the sticky `id:` field. [`SseEvent::to_wire`] does the reverse.

use std::fmt::Write as _;

/// One dispatched event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type, `message` when the stream did not name one
    pub event: String,
    pub data: String,
    /// Last event id seen on the stream, sticky across events
    pub id: Option<String>,
    /// Reconnection delay requested by the server, in milliseconds
    pub retry: Option<u64>,
}

impl SseEvent {
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: "message".to_string(),
            data: data.into(),
            id: None,
            retry: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    /// Serialize in `text/event-stream` framing, terminated by a blank line
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.id {
            let _ = writeln!(out, "id: {}", id);
        }
        if self.event != "message" {
            let _ = writeln!(out, "event: {}", self.event);
        }
        if let Some(retry) = self.retry {
            let _ = writeln!(out, "retry: {}", retry);
        }
        for line in self.data.split('\n') {
            let _ = writeln!(out, "data: {}", line);
        }
        out.push('\n');
        out
    }
}

/// Incremental `text/event-stream` parser
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event_type: Option<String>,
    data_lines: Vec<String>,
    last_id: Option<String>,
    retry: Option<u64>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the most recent event carrying one
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Feed a chunk of bytes and collect every event it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(event) = self.decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Complete a trailing event when the stream ends without a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
            let rest = rest.trim_end_matches('\r').to_string();
            if let Some(event) = self.decode_line(&rest) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn decode_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            // Ids containing NUL are ignored by the event-stream rules.
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(retry) = value.parse() {
                    self.retry = Some(retry);
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event_type = self.event_type.take();
        if self.data_lines.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: event_type.unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data_lines).join("\n"),
            id: self.last_id.clone(),
            retry: self.retry,
        })
    }
}
