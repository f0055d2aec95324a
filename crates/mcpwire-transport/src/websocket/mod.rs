//! WebSocket transport.
//!
//! One persistent socket carries JSON-RPC messages as text frames in both
//! directions.
//!
//! # Features
//!
//! - Heartbeat pings with a pong deadline
//! - Reconnection with jittered exponential backoff after abnormal closes
//! - Custom handshake headers and subprotocols
//! - TLS via rustls
//!
//! # Example
//!
//! ```rust
//! use mcpwire_transport::websocket::{ConnectionState, WebSocketTransport};
//! use std::time::Duration;
//!
//! let transport = WebSocketTransport::builder("ws://localhost:8080/mcp")
//!     .connect_timeout(Duration::from_secs(30))
//!     .ping_interval(Duration::from_secs(30))
//!     .max_reconnect_attempts(5)
//!     .build();
//! assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
//! ```

mod client;
mod config;

pub use client::{WebSocketTransport, WebSocketTransportBuilder};
pub use config::{ConnectionState, MAX_RECONNECT_DELAY, WebSocketConfig};
