//! # mcpwire-core
//!
//! JSON-RPC 2.0 data model shared by the mcpwire transports.
//!
//! - **Protocol types**: [`Request`], [`Response`], [`Notification`] and the
//!   untagged [`Message`] union
//! - **Frames**: [`Payload`], a single message or a non-empty [`Batch`]
//! - **Errors**: [`JsonRpcError`] and [`PayloadError`]
//!
//! This crate does not depend on an async runtime.

#![deny(missing_docs)]
#![warn(clippy::unwrap_used)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod protocol;

pub use error::{JsonRpcError, PayloadError};
pub use protocol::{Batch, Message, Notification, Payload, Request, RequestId, Response};

/// The MCP protocol revision sent in the `mcp-protocol-version` header.
pub const PROTOCOL_VERSION: &str = "2025-11-25";
