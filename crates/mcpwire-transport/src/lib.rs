//! Transports for MCP clients.
//!
//! A transport moves JSON-RPC messages between a client and one server. It
//! is started once, pushes everything it receives to the callbacks
//! registered through [`TransportExt`], and is closed once.
//!
//! # Available Transports
//!
//! | Transport | Use Case |
//! |-----------|----------|
//! | [`stdio::StdioTransport`] | Spawn a server as a child process |
//! | [`http::HttpTransport`] | Streamable HTTP: POST plus resumable SSE |
//! | [`websocket::WebSocketTransport`] | One socket with heartbeat and reconnection |
//!
//! HTTP requests pass through a [`middleware`] chain; [`middleware::OAuthMiddleware`]
//! authenticates them with tokens from `mcpwire-auth` and
//! [`middleware::RetryMiddleware`] retries transient failures.
//!
//! # Example
//!
//! ```no_run
//! use mcpwire_core::Request;
//! use mcpwire_transport::{Transport, TransportExt, WebSocketTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mcpwire_transport::TransportError> {
//!     let transport = WebSocketTransport::builder("ws://localhost:8080/mcp").build();
//!     transport.on_message(|msg| println!("<- {msg:?}"));
//!     transport.on_error(|err| eprintln!("transport error: {err}"));
//!
//!     transport.start().await?;
//!     transport.send_message(Request::new("ping", 1u64)).await?;
//!     transport.close().await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::unwrap_used)]
#![allow(clippy::module_name_repetitions)]

pub mod backoff;
pub mod codec;
pub mod error;
pub mod http;
pub mod middleware;
pub mod observers;
pub mod runtime;
pub mod stdio;
pub mod traits;
pub mod websocket;

pub use backoff::{ExponentialBackoff, ReconnectionOptions};
pub use codec::{FramingError, JsonLineCodec};
pub use error::TransportError;
pub use observers::Observers;
pub use runtime::TaskSet;
pub use traits::{Transport, TransportExt, TransportMetadata};

pub use http::{HttpTransport, HttpTransportBuilder, HttpTransportConfig};
pub use stdio::{StderrMode, StdioState, StdioTransport, StdioTransportBuilder};
pub use websocket::{ConnectionState, WebSocketConfig, WebSocketTransport, WebSocketTransportBuilder};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::TransportError;
    pub use crate::http::{HttpTransport, HttpTransportConfig};
    pub use crate::middleware::{OAuthMiddleware, RetryConfig, RetryMiddleware};
    pub use crate::stdio::StdioTransport;
    pub use crate::traits::{Transport, TransportExt, TransportMetadata};
    pub use crate::websocket::{WebSocketConfig, WebSocketTransport};
}
