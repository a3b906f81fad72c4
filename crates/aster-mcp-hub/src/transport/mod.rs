//! Transports for reaching MCP servers
//!
//! Supports stdio subprocesses, streamable HTTP and SSE streams. Use
//! [`DefaultTransportFactory`] to get a connected [`TransportInstance`].

mod base;
mod factory;
mod http;
mod instance;
mod pending;
mod sse;
pub mod sse_codec;
mod stdio;

pub use base::{
    BoxedTransport, SharedTransport, Transport, TransportConfig, TransportEvent, TransportState,
};
pub use factory::{DefaultTransportFactory, RetryOptions, TransportCreation, TransportFactory};
pub use http::{HttpConfig, HttpTransport, MCP_SESSION_HEADER, SESSION_ID_HEADER};
pub use instance::{SharedInstance, TransportInstance, TransportMetadata};
pub use sse::{SseConfig, SseTransport};
pub use stdio::{merge_environment, resolve_command, StdioConfig, StdioTransport, SESSION_ENV_VAR};

pub(crate) use base::parse_endpoint;
