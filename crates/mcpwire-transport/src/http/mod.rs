//! Streamable HTTP transport.
//!
//! Messages are sent with HTTP POST. The server answers each POST with a
//! JSON body, an SSE stream, or `202 Accepted`. Once the session is
//! initialized the transport also opens a standalone SSE stream with GET for
//! server-initiated messages.
//!
//! Key protocol requirements:
//! - `Accept` on POST lists both `application/json` and `text/event-stream`
//! - the `mcp-session-id` the server assigns is sent on every later request
//! - `mcp-protocol-version` is sent on every request
//! - a dropped SSE stream is resumed with `Last-Event-ID`
//! - a GET answered with 405 means the server has no SSE stream to offer
//!
//! # Example
//!
//! ```rust
//! use mcpwire_transport::http::HttpTransport;
//! use std::time::Duration;
//! use url::Url;
//!
//! let transport = HttpTransport::builder(Url::parse("http://localhost:8080/mcp").unwrap())
//!     .request_timeout(Duration::from_secs(30))
//!     .keep_session_on_close()
//!     .build()
//!     .unwrap();
//! assert_eq!(transport.session_id(), None);
//! ```

mod client;
mod config;
pub mod sse;

pub use client::HttpTransport;
pub use config::{
    DEFAULT_MAX_MESSAGE_SIZE, HttpTransportBuilder, HttpTransportConfig, LAST_EVENT_ID_HEADER,
    MCP_PROTOCOL_VERSION_HEADER, MCP_SESSION_ID_HEADER,
};
pub use sse::{SseEvent, SseParser};
