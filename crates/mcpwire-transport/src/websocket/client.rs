//! WebSocket transport client implementation.

use super::config::{ConnectionState, WebSocketConfig};
use crate::backoff::ExponentialBackoff;
use crate::codec::FramingError;
use crate::error::TransportError;
use crate::observers::Observers;
use crate::runtime::{AsyncMutex, TaskSet, lock, sleep_or_cancel};
use crate::traits::{Transport, TransportMetadata};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use mcpwire_core::Payload;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// How a connection ended.
#[derive(Debug)]
enum Disconnect {
    /// The peer closed with 1000 (or without a status code).
    Normal,
    /// Anything else: error, abnormal code, EOF or a missed pong.
    Abnormal(String),
    /// `close` was called.
    Cancelled,
}

/// WebSocket transport for MCP communication.
///
/// A supervisor task owns the read half of the socket and delivers inbound
/// frames to the message callback. It sends heartbeat pings and reconnects
/// with backoff after an abnormal close. The write half sits behind an async
/// mutex so concurrent `send` calls never interleave frames.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    inner: Arc<WsInner>,
}

struct WsInner {
    config: WebSocketConfig,
    state: AtomicU8,
    sink: AsyncMutex<Option<WsSink>>,
    started: AtomicBool,
    reconnect_attempts: AtomicU32,
    connected_at: Mutex<Option<Instant>>,
    tasks: Mutex<TaskSet>,
    observers: Observers,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl std::fmt::Debug for WsInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsInner")
            .field("url", &self.config.url)
            .field("state", &self.connection_state())
            .field("reconnect_attempts", &self.reconnect_attempts.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Create a new WebSocket transport (not yet connected).
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            inner: Arc::new(WsInner {
                config,
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                sink: AsyncMutex::new(None),
                started: AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
                connected_at: Mutex::new(None),
                tasks: Mutex::new(TaskSet::new()),
                observers: Observers::new(),
                messages_sent: AtomicU64::new(0),
                messages_received: AtomicU64::new(0),
            }),
        }
    }

    /// Create a builder for `url`.
    #[must_use]
    pub fn builder(url: impl Into<String>) -> WebSocketTransportBuilder {
        WebSocketTransportBuilder::new(url)
    }

    /// Get the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state()
    }

    /// Reconnect attempts since the last successful connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::Acquire)
    }

    /// Get the WebSocket URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    /// Get the number of messages sent.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.inner.messages_sent.load(Ordering::Relaxed)
    }

    /// Get the number of messages received.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.inner.messages_received.load(Ordering::Relaxed)
    }
}

impl WsInner {
    fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn tasks(&self) -> TaskSet {
        lock(&self.tasks).clone()
    }

    fn handshake_request(&self) -> Result<Request, TransportError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::connection(format!("Invalid WebSocket URL: {e}")))?;

        let headers = request.headers_mut();
        for (name, value) in &self.config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TransportError::connection(format!("Invalid header name '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::connection(format!("Invalid header value: {e}")))?;
            headers.append(name, value);
        }
        if !self.config.subprotocols.is_empty() {
            let offered = HeaderValue::from_str(&self.config.subprotocols.join(", "))
                .map_err(|e| TransportError::connection(format!("Invalid subprotocol: {e}")))?;
            headers.insert(SEC_WEBSOCKET_PROTOCOL, offered);
        }
        Ok(request)
    }

    async fn connect(&self) -> Result<WsStream, TransportError> {
        self.set_state(ConnectionState::Connecting);
        let result = self.handshake().await;
        if result.is_err() {
            self.set_state(ConnectionState::Disconnected);
        }
        result
    }

    async fn handshake(&self) -> Result<WsStream, TransportError> {
        let request = self.handshake_request()?;
        let limit = self.config.connect_timeout;
        let (stream, response) = tokio::time::timeout(limit, connect_async(request))
            .await
            .map_err(|_| TransportError::timeout("WebSocket connect", limit))?
            .map_err(|e| TransportError::connection(format!("WebSocket connection failed: {e}")))?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(stream)
    }

    /// Install a fresh connection: the write half becomes the sink and the
    /// state is `Connected` before this returns.
    async fn attach(&self, stream: WsStream) -> WsSource {
        let (sink, source) = stream.split();
        *self.sink.lock().await = Some(sink);
        self.reconnect_attempts.store(0, Ordering::Release);
        *lock(&self.connected_at) = Some(Instant::now());
        self.observers.reset_close();
        self.set_state(ConnectionState::Connected);
        tracing::info!(url = %self.config.url, "WebSocket connected");
        source
    }

    /// Drive one connection until it ends.
    async fn run_connection(&self, mut source: WsSource, token: &CancellationToken) -> Disconnect {
        let outcome = self.read_loop(&mut source, token).await;
        if matches!(outcome, Disconnect::Cancelled) {
            return outcome;
        }

        *self.sink.lock().await = None;
        *lock(&self.connected_at) = None;
        self.set_state(ConnectionState::Disconnected);
        match &outcome {
            Disconnect::Abnormal(reason) => {
                tracing::warn!(url = %self.config.url, reason = %reason, "WebSocket connection lost");
            }
            _ => tracing::info!(url = %self.config.url, "WebSocket closed by server"),
        }
        self.observers.emit_close();
        outcome
    }

    async fn read_loop(&self, source: &mut WsSource, token: &CancellationToken) -> Disconnect {
        let mut heartbeat = self.config.ping_interval.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut pong_deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                () = token.cancelled() => return Disconnect::Cancelled,
                frame = source.next() => match frame {
                    Some(Ok(frame)) => {
                        if let Some(end) = self.handle_frame(frame, &mut pong_deadline).await {
                            return end;
                        }
                    }
                    Some(Err(e)) => return Disconnect::Abnormal(e.to_string()),
                    None => return Disconnect::Abnormal("stream ended without a close frame".to_string()),
                },
                () = tick(heartbeat.as_mut()) => {
                    tracing::trace!("sending ping");
                    if let Err(e) = self.write(WsMessage::Ping(Vec::new())).await {
                        return Disconnect::Abnormal(format!("ping failed: {e}"));
                    }
                    if pong_deadline.is_none() {
                        pong_deadline = Some(tokio::time::Instant::now() + self.config.pong_timeout);
                    }
                }
                () = deadline(pong_deadline) => {
                    return Disconnect::Abnormal(format!(
                        "no pong within {:?}",
                        self.config.pong_timeout
                    ));
                }
            }
        }
    }

    async fn handle_frame(
        &self,
        frame: WsMessage,
        pong_deadline: &mut Option<tokio::time::Instant>,
    ) -> Option<Disconnect> {
        match frame {
            WsMessage::Text(text) => self.deliver(text.as_bytes()),
            WsMessage::Binary(data) => self.deliver(&data),
            WsMessage::Ping(data) => {
                if let Err(e) = self.write(WsMessage::Pong(data)).await {
                    return Some(Disconnect::Abnormal(format!("pong failed: {e}")));
                }
            }
            WsMessage::Pong(_) => {
                tracing::trace!("received pong");
                *pong_deadline = None;
            }
            WsMessage::Close(frame) => {
                tracing::debug!(frame = ?frame, "close frame received");
                return Some(match frame {
                    Some(frame) if frame.code != CloseCode::Normal => Disconnect::Abnormal(format!(
                        "closed with code {}: {}",
                        u16::from(frame.code),
                        frame.reason
                    )),
                    _ => Disconnect::Normal,
                });
            }
            WsMessage::Frame(_) => {}
        }
        None
    }

    fn deliver(&self, bytes: &[u8]) {
        if bytes.len() > self.config.max_message_size {
            self.observers.emit_error(TransportError::MessageTooLarge {
                size: bytes.len(),
                max: self.config.max_message_size,
            });
            return;
        }
        match Payload::parse(bytes) {
            Ok(payload) => {
                self.messages_received
                    .fetch_add(payload.len() as u64, Ordering::Relaxed);
                self.observers.emit_payload(payload);
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed WebSocket message");
                self.observers.emit_error(FramingError::from(e).into());
            }
        }
    }

    async fn write(&self, frame: WsMessage) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        sink.send(frame)
            .await
            .map_err(|e| TransportError::connection(format!("WebSocket send failed: {e}")))
    }

    /// Sleep, then try to connect, until a connection is up or the attempt
    /// budget runs out.
    async fn reconnect(&self, token: &CancellationToken) -> Option<WsStream> {
        loop {
            let attempts = self.reconnect_attempts.load(Ordering::Acquire);
            if attempts >= self.config.max_reconnect_attempts {
                tracing::error!(attempts, url = %self.config.url, "giving up on WebSocket reconnection");
                self.observers
                    .emit_error(TransportError::ReconnectionExhausted { attempts });
                return None;
            }

            let delay = self.config.reconnect_delay(attempts);
            self.reconnect_attempts.store(attempts + 1, Ordering::Release);
            tracing::info!(
                attempt = attempts + 1,
                max_attempts = self.config.max_reconnect_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "attempting WebSocket reconnection"
            );
            if !sleep_or_cancel(token, delay).await {
                return None;
            }

            match self.connect().await {
                Ok(stream) => return Some(stream),
                Err(e) => tracing::warn!(error = %e, "WebSocket reconnection failed"),
            }
        }
    }
}

/// Owns the connection for the lifetime of the transport.
async fn supervise(inner: Arc<WsInner>, token: CancellationToken, mut source: Option<WsSource>) {
    loop {
        if let Some(connection) = source.take() {
            match inner.run_connection(connection, &token).await {
                Disconnect::Cancelled => return,
                Disconnect::Abnormal(_) if inner.config.auto_reconnect => {}
                _ => break,
            }
        }

        match inner.reconnect(&token).await {
            Some(stream) => source = Some(inner.attach(stream).await),
            None => break,
        }
    }

    if !token.is_cancelled() {
        inner.started.store(false, Ordering::SeqCst);
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn deadline(at: Option<tokio::time::Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Transport for WebSocketTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }
        let tasks = {
            let mut tasks = lock(&inner.tasks);
            if tasks.is_cancelled() {
                *tasks = TaskSet::new();
            }
            tasks.clone()
        };
        inner.reconnect_attempts.store(0, Ordering::Release);

        let source = match inner.connect().await {
            Ok(stream) => Some(inner.attach(stream).await),
            Err(e) if inner.config.auto_reconnect => {
                tracing::warn!(error = %e, url = %inner.config.url, "initial WebSocket connect failed, retrying in background");
                None
            }
            Err(e) => {
                inner.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let token = tasks.token();
        tasks.spawn("ws-supervisor", supervise(Arc::clone(inner), token, source));
        Ok(())
    }

    async fn send(&self, payload: Payload) -> Result<(), TransportError> {
        if self.inner.connection_state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let text = serde_json::to_string(&payload)?;
        if text.len() > self.inner.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: text.len(),
                max: self.inner.config.max_message_size,
            });
        }
        self.inner.write(WsMessage::Text(text)).await?;
        self.inner.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let inner = &self.inner;
        if !inner.started.swap(false, Ordering::SeqCst) {
            inner.observers.emit_close();
            return Ok(());
        }

        inner.set_state(ConnectionState::Closing);
        inner.tasks().shutdown().await;

        let sink = inner.sink.lock().await.take();
        if let Some(mut sink) = sink {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                tracing::debug!(error = %e, "failed to send close frame");
            }
            let _ = sink.close().await;
        }

        *lock(&inner.connected_at) = None;
        inner.set_state(ConnectionState::Disconnected);
        tracing::info!(url = %inner.config.url, "WebSocket transport closed");
        inner.observers.emit_close();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connection_state() == ConnectionState::Connected
    }

    fn metadata(&self) -> TransportMetadata {
        TransportMetadata::new("websocket")
            .remote_addr(&self.inner.config.url)
            .connected_at(*lock(&self.inner.connected_at))
    }

    fn observers(&self) -> &Observers {
        &self.inner.observers
    }
}

/// Builder for WebSocket transport.
#[derive(Debug, Default)]
pub struct WebSocketTransportBuilder {
    config: WebSocketConfig,
}

impl WebSocketTransportBuilder {
    /// Create a new builder with the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            config: WebSocketConfig::new(url),
        }
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the ping interval.
    #[must_use]
    pub const fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = Some(interval);
        self
    }

    /// Disable the heartbeat.
    #[must_use]
    pub const fn no_ping(mut self) -> Self {
        self.config.ping_interval = None;
        self
    }

    /// Set the pong timeout.
    #[must_use]
    pub const fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.config.pong_timeout = timeout;
        self
    }

    /// Disable automatic reconnection.
    #[must_use]
    pub const fn no_auto_reconnect(mut self) -> Self {
        self.config.auto_reconnect = false;
        self
    }

    /// Set maximum reconnection attempts.
    #[must_use]
    pub const fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Set the reconnect delay schedule.
    #[must_use]
    pub const fn reconnect_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.config.reconnect_backoff = backoff;
        self
    }

    /// Offer a subprotocol.
    #[must_use]
    pub fn subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.config.subprotocols.push(protocol.into());
        self
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.push((name.into(), value.into()));
        self
    }

    /// Build the transport without connecting.
    #[must_use]
    pub fn build(self) -> WebSocketTransport {
        WebSocketTransport::new(self.config)
    }
}
