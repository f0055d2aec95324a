//! The transport contract.
//!
//! - [`Transport`]: `start`, `send`, `close` plus connection introspection
//! - [`TransportExt`]: callback registration and typed sends for any transport
//!
//! Inbound traffic is pushed to the callbacks registered on the transport's
//! [`Observers`]; there is no pull-style `recv`.
//!
//! # Example
//!
//! ```rust,no_run
//! use mcpwire_core::Request;
//! use mcpwire_transport::{StdioTransport, Transport, TransportExt};
//!
//! # async fn run() -> Result<(), mcpwire_transport::TransportError> {
//! let transport = StdioTransport::builder("my-mcp-server").build();
//! transport.on_message(|msg| println!("<- {msg:?}"));
//! transport.on_close(|| println!("closed"));
//! transport.start().await?;
//! transport.send_message(Request::new("ping", 1u64)).await?;
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::TransportError;
use crate::observers::Observers;
use mcpwire_core::{Message, Payload};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Metadata about a transport connection.
#[derive(Debug, Clone, Default)]
pub struct TransportMetadata {
    /// Transport type identifier ("stdio", "http", "websocket").
    pub transport_type: String,
    /// Remote endpoint: a URL or the child command.
    pub remote_addr: Option<String>,
    /// Server-assigned session, if any.
    pub session_id: Option<String>,
    /// When the current connection was established.
    pub connected_at: Option<Instant>,
}

impl TransportMetadata {
    /// Create new metadata for a transport type.
    #[must_use]
    pub fn new(transport_type: impl Into<String>) -> Self {
        Self {
            transport_type: transport_type.into(),
            ..Self::default()
        }
    }

    /// Set the remote address.
    #[must_use]
    pub fn remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Set the session id.
    #[must_use]
    pub fn session_id(mut self, id: Option<String>) -> Self {
        self.session_id = id;
        self
    }

    /// Set the connection time.
    #[must_use]
    pub const fn connected_at(mut self, at: Option<Instant>) -> Self {
        self.connected_at = at;
        self
    }
}

/// Uniform interface over stdio, HTTP and WebSocket transports.
///
/// Implementations are `Send + Sync`; `send` may be called concurrently
/// from several tasks and writes are serialized internally.
pub trait Transport: Send + Sync {
    /// Open the connection and start the background tasks.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyStarted`] on a second call, or the
    /// error that prevented the connection from being established.
    fn start(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Send one message or batch.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] before `start` or after the
    /// connection is gone, or the error the write produced.
    fn send(&self, payload: Payload) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Shut down the connection and every background task.
    ///
    /// Idempotent. The close callback fires exactly once.
    ///
    /// # Errors
    ///
    /// Returns an error only if an orderly shutdown step failed; the
    /// transport is closed regardless.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Whether the transport can currently send.
    fn is_connected(&self) -> bool;

    /// Metadata about the current connection.
    fn metadata(&self) -> TransportMetadata;

    /// The callbacks this transport emits to.
    fn observers(&self) -> &Observers;
}

/// Callback registration and typed sends, available on every [`Transport`].
pub trait TransportExt: Transport {
    /// Register the inbound message handler, replacing any previous one.
    fn on_message<F>(&self, handler: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.observers().set_message(Arc::new(handler));
    }

    /// Register the close handler, replacing any previous one.
    fn on_close<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.observers().set_close(Arc::new(handler));
    }

    /// Register the error handler, replacing any previous one.
    fn on_error<F>(&self, handler: F)
    where
        F: Fn(TransportError) + Send + Sync + 'static,
    {
        self.observers().set_error(Arc::new(handler));
    }

    /// Send anything convertible into a [`Payload`].
    fn send_message(
        &self,
        message: impl Into<Payload> + Send,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        self.send(message.into())
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}
