//! Transport error types.

use crate::codec::FramingError;
use mcpwire_auth::AuthError;
use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Error, Diagnostic, Debug)]
pub enum TransportError {
    /// The transport has not been started, or has already shut down.
    #[error("Not connected")]
    #[diagnostic(
        code(mcpwire::transport::not_connected),
        help("Call start() before sending, and do not send after close()")
    )]
    NotConnected,

    /// `start` was called twice.
    #[error("Transport already started")]
    #[diagnostic(code(mcpwire::transport::already_started))]
    AlreadyStarted,

    /// The peer closed the connection.
    #[error("Connection closed")]
    #[diagnostic(code(mcpwire::transport::connection_closed))]
    ConnectionClosed,

    /// Connection error.
    #[error("Connection error: {message}")]
    #[diagnostic(code(mcpwire::transport::connection))]
    Connection {
        /// Error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(mcpwire::transport::io))]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    #[diagnostic(code(mcpwire::transport::json))]
    Json(#[from] serde_json::Error),

    /// A frame could not be decoded or encoded.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Framing(#[from] FramingError),

    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    #[diagnostic(code(mcpwire::transport::http))]
    Http(#[from] reqwest::Error),

    /// The server answered with an unexpected status.
    #[error("HTTP {status}: {body}")]
    #[diagnostic(code(mcpwire::transport::http_status))]
    HttpStatus {
        /// Response status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The server requires (new) authorization.
    #[error("Unauthorized{}", www_authenticate.as_ref().map(|c| format!(": {c}")).unwrap_or_default())]
    #[diagnostic(
        code(mcpwire::transport::unauthorized),
        help("Install an OAuthMiddleware or supply a valid bearer token header")
    )]
    Unauthorized {
        /// The `WWW-Authenticate` challenge, if the server sent one.
        www_authenticate: Option<String>,
    },

    /// The server no longer recognises the session id.
    #[error("Session expired")]
    #[diagnostic(
        code(mcpwire::transport::session_expired),
        help("Re-initialize the connection to obtain a new session")
    )]
    SessionExpired,

    /// A response carried a content type the transport cannot handle.
    #[error("Unexpected content type: {content_type}")]
    #[diagnostic(code(mcpwire::transport::content_type))]
    UnexpectedContentType {
        /// The offending `Content-Type` value.
        content_type: String,
    },

    /// Reconnection gave up.
    #[error("Reconnection failed after {attempts} attempts")]
    #[diagnostic(code(mcpwire::transport::reconnection_exhausted))]
    ReconnectionExhausted {
        /// How many reconnection attempts were made.
        attempts: u32,
    },

    /// Timeout occurred.
    #[error("{operation} timed out after {duration:?}")]
    #[diagnostic(code(mcpwire::transport::timeout))]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// How long the operation waited.
        duration: Duration,
    },

    /// Message was too large.
    #[error("Message too large: {size} bytes (max: {max})")]
    #[diagnostic(code(mcpwire::transport::message_too_large))]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// OAuth failure while authorizing a request.
    #[error("Authorization failed: {0}")]
    #[diagnostic(code(mcpwire::transport::auth))]
    Auth(#[from] AuthError),

    /// The child process could not be spawned.
    #[error("Failed to spawn `{command}`: {source}")]
    #[diagnostic(code(mcpwire::transport::spawn))]
    Spawn {
        /// The program that failed to start.
        command: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// The HTTP status behind this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Unauthorized { .. } => Some(401),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the failure is transient: a dropped connection, timeout or
    /// I/O error rather than a rejection by the peer.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Io(_) | Self::Timeout { .. } | Self::Connection { .. } | Self::ConnectionClosed => true,
            _ => false,
        }
    }
}
