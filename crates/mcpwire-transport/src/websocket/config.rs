//! WebSocket transport configuration types.

use crate::backoff::ExponentialBackoff;
use std::time::Duration;

/// Upper bound on any single reconnect delay, jitter included.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Configuration for WebSocket transport.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// WebSocket URL (ws:// or wss://).
    pub url: String,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Heartbeat ping interval. `None` disables the heartbeat.
    pub ping_interval: Option<Duration>,
    /// How long to wait for a pong before the connection counts as lost.
    pub pong_timeout: Duration,
    /// Maximum message size in bytes, in either direction.
    pub max_message_size: usize,
    /// Reconnect after a failed connect or an abnormal close.
    pub auto_reconnect: bool,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay schedule between reconnect attempts.
    pub reconnect_backoff: ExponentialBackoff,
    /// Subprotocols offered in `Sec-WebSocket-Protocol`.
    pub subprotocols: Vec<String>,
    /// Custom headers for the WebSocket handshake.
    pub headers: Vec<(String, String)>,
}

impl WebSocketConfig {
    /// Create a new WebSocket configuration.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(30),
            ping_interval: Some(Duration::from_secs(30)),
            pong_timeout: Duration::from_secs(10),
            max_message_size: 16 * 1024 * 1024, // 16 MB
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_backoff: ExponentialBackoff::default(),
            subprotocols: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Delay before reconnect attempt `attempt` (zero-based).
    #[must_use]
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_backoff
            .jittered_delay(attempt)
            .min(MAX_RECONNECT_DELAY)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self::new("ws://localhost:8080/mcp")
    }
}

/// Connection state for WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected = 0,
    /// Handshake in progress.
    Connecting = 1,
    /// Connected and ready.
    Connected = 2,
    /// `close` is shutting the connection down.
    Closing = 3,
}

impl ConnectionState {
    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Closing,
            _ => Self::Disconnected,
        }
    }
}
