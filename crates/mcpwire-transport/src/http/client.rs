//! HTTP transport client implementation.

use super::config::{
    HttpTransportBuilder, HttpTransportConfig, LAST_EVENT_ID_HEADER, MCP_PROTOCOL_VERSION_HEADER,
    MCP_SESSION_ID_HEADER,
};
use super::sse::{SseEvent, SseParser};
use crate::codec::FramingError;
use crate::error::TransportError;
use crate::middleware::{HttpMiddleware, Next};
use crate::observers::Observers;
use crate::runtime::{TaskSet, lock, read, sleep_or_cancel, write};
use crate::traits::{Transport, TransportMetadata};
use futures::StreamExt;
use mcpwire_core::{Message, Payload};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderName, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const JSON: &str = "application/json";
const EVENT_STREAM: &str = "text/event-stream";

/// Streamable HTTP transport.
///
/// Messages go out as POST requests. Replies come back either in the POST
/// response (JSON or an SSE stream) or on a standalone SSE stream the
/// transport opens with GET once the session is initialized. Dropped SSE
/// streams are resumed with `Last-Event-ID`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    inner: Arc<HttpInner>,
}

struct HttpInner {
    config: HttpTransportConfig,
    client: Client,
    middleware: Vec<Arc<dyn HttpMiddleware>>,
    session_id: RwLock<Option<String>>,
    protocol_version: RwLock<String>,
    last_event_id: RwLock<Option<String>>,
    started: AtomicBool,
    standalone_open: AtomicBool,
    connected_at: Mutex<Option<Instant>>,
    tasks: Mutex<TaskSet>,
    observers: Observers,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl std::fmt::Debug for HttpInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpInner")
            .field("config", &self.config)
            .field("session_id", &*read(&self.session_id))
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Which request produced an SSE stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamOrigin {
    /// The standalone GET stream.
    Standalone,
    /// The response to a POST.
    Post,
}

#[derive(Debug, Default)]
struct StreamEnd {
    error: Option<TransportError>,
    saw_response: bool,
}

impl HttpTransportBuilder {
    /// Build the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client could not be created.
    pub fn build(self) -> Result<HttpTransport, TransportError> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .connect_timeout(self.config.connect_timeout)
                .build()
                .map_err(|e| TransportError::connection(format!("Failed to create HTTP client: {e}")))?,
        };

        let session_id = self.config.session_id.clone();
        let protocol_version = self.config.protocol_version.clone();
        Ok(HttpTransport {
            inner: Arc::new(HttpInner {
                config: self.config,
                client,
                middleware: self.middleware,
                session_id: RwLock::new(session_id),
                protocol_version: RwLock::new(protocol_version),
                last_event_id: RwLock::new(None),
                started: AtomicBool::new(false),
                standalone_open: AtomicBool::new(false),
                connected_at: Mutex::new(None),
                tasks: Mutex::new(TaskSet::new()),
                observers: Observers::new(),
                messages_sent: AtomicU64::new(0),
                messages_received: AtomicU64::new(0),
            }),
        })
    }
}

impl HttpTransport {
    /// Create a transport from a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client could not be created.
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        HttpTransportBuilder::from_config(config).build()
    }

    /// Create a builder for `url`.
    #[must_use]
    pub fn builder(url: url::Url) -> HttpTransportBuilder {
        HttpTransportBuilder::new(url)
    }

    /// The server-assigned session id, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        read(&self.inner.session_id).clone()
    }

    /// The id of the last SSE event received on any stream.
    #[must_use]
    pub fn last_event_id(&self) -> Option<String> {
        read(&self.inner.last_event_id).clone()
    }

    /// The protocol version sent in `mcp-protocol-version`.
    #[must_use]
    pub fn protocol_version(&self) -> String {
        read(&self.inner.protocol_version).clone()
    }

    /// Change the protocol version header, typically to the version the
    /// server chose during initialization.
    pub fn set_protocol_version(&self, version: impl Into<String>) {
        *write(&self.inner.protocol_version) = version.into();
    }

    /// Payloads POSTed successfully.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.inner.messages_sent.load(Ordering::Relaxed)
    }

    /// Messages delivered to the message handler.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.inner.messages_received.load(Ordering::Relaxed)
    }

    /// End the session with `DELETE`.
    ///
    /// A server answering 405 does not support explicit termination; that
    /// is not an error. The local session id is forgotten either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the request failed or the server rejected it.
    pub async fn terminate_session(&self) -> Result<(), TransportError> {
        let Some(session) = write(&self.inner.session_id).take() else {
            return Ok(());
        };
        tracing::debug!(session_id = %session, "terminating session");

        let request = self.inner.request(Method::DELETE, Some(&session))?.build()?;
        let response = self.inner.execute_timed(request, "DELETE").await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
            return Ok(());
        }
        Err(status_error(response).await)
    }

    async fn post(&self, payload: Payload) -> Result<(), TransportError> {
        let inner = &self.inner;
        let initialized = payload.is_initialized_notification();
        let body = payload.to_vec().map_err(FramingError::from)?;
        if body.len() > inner.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: body.len(),
                max: inner.config.max_message_size,
            });
        }

        let session = inner.session_id();
        let request = inner
            .request(Method::POST, session.as_deref())?
            .header(CONTENT_TYPE, JSON)
            .header(ACCEPT, "application/json, text/event-stream")
            .body(body)
            .build()?;
        let response = inner.execute_timed(request, "POST").await?;
        inner.record_session(&response);

        let status = response.status();
        if status.is_success() {
            inner.messages_sent.fetch_add(1, Ordering::Relaxed);
        }

        match status {
            StatusCode::ACCEPTED => {}
            s if s.is_success() => {
                if content_type(&response).starts_with(EVENT_STREAM) {
                    let tasks = inner.tasks();
                    let token = tasks.token();
                    tasks.spawn(
                        "http-sse-post",
                        follow_stream(Arc::clone(inner), token, Some(response), StreamOrigin::Post),
                    );
                } else {
                    inner.read_json(response).await?;
                }
            }
            StatusCode::UNAUTHORIZED => {
                return Err(TransportError::Unauthorized {
                    www_authenticate: challenge(&response),
                });
            }
            StatusCode::NOT_FOUND if session.is_some() => {
                inner.expire_session(session.as_deref());
                return Err(TransportError::SessionExpired);
            }
            _ => return Err(status_error(response).await),
        }

        if initialized {
            inner.open_standalone_stream();
        }
        Ok(())
    }
}

impl HttpInner {
    fn session_id(&self) -> Option<String> {
        read(&self.session_id).clone()
    }

    fn tasks(&self) -> TaskSet {
        lock(&self.tasks).clone()
    }

    fn request(&self, method: Method, session: Option<&str>) -> Result<RequestBuilder, TransportError> {
        let protocol_version = read(&self.protocol_version).clone();
        let mut builder = self
            .client
            .request(method, self.config.url.clone())
            .header(MCP_PROTOCOL_VERSION_HEADER, header_value(&protocol_version)?);
        if let Some(session) = session {
            builder = builder.header(MCP_SESSION_ID_HEADER, header_value(session)?);
        }
        for (name, value) in &self.config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TransportError::connection(format!("Invalid header name '{name}': {e}"))
            })?;
            builder = builder.header(name, header_value(value)?);
        }
        Ok(builder)
    }

    async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        Next::new(&self.client, &self.middleware).run(request).await
    }

    /// Run a request through the middleware, bounded by the request timeout.
    /// Only the response headers are awaited.
    async fn execute_timed(&self, request: Request, operation: &str) -> Result<Response, TransportError> {
        let limit = self.config.request_timeout;
        tokio::time::timeout(limit, self.execute(request))
            .await
            .map_err(|_| TransportError::timeout(operation, limit))?
    }

    fn record_session(&self, response: &Response) {
        let Some(value) = response.headers().get(MCP_SESSION_ID_HEADER) else {
            return;
        };
        let Ok(session) = value.to_str() else {
            tracing::warn!("ignoring non-ASCII session id");
            return;
        };
        let mut current = write(&self.session_id);
        if current.as_deref() != Some(session) {
            tracing::debug!(session_id = %session, "session established");
            *current = Some(session.to_string());
        }
    }

    fn expire_session(&self, sent: Option<&str>) {
        let mut current = write(&self.session_id);
        if current.as_deref() == sent {
            tracing::warn!(session_id = ?sent, "server no longer recognises the session");
            *current = None;
        }
    }

    async fn read_json(&self, response: Response) -> Result<(), TransportError> {
        let kind = content_type(&response).to_string();
        let limit = self.config.request_timeout;
        let body = tokio::time::timeout(limit, response.bytes())
            .await
            .map_err(|_| TransportError::timeout("reading response body", limit))??;

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        if !kind.is_empty() && !kind.starts_with(JSON) {
            return Err(TransportError::UnexpectedContentType { content_type: kind });
        }
        if body.len() > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: body.len(),
                max: self.config.max_message_size,
            });
        }

        let payload = Payload::parse(&body).map_err(FramingError::from)?;
        self.deliver(payload);
        Ok(())
    }

    fn deliver(&self, payload: Payload) {
        let count = payload.len() as u64;
        self.messages_received.fetch_add(count, Ordering::Relaxed);
        self.observers.emit_payload(payload);
    }

    fn open_standalone_stream(self: &Arc<Self>) {
        if self.standalone_open.swap(true, Ordering::SeqCst) {
            return;
        }
        let tasks = self.tasks();
        let token = tasks.token();
        tasks.spawn(
            "http-sse-get",
            follow_stream(Arc::clone(self), token, None, StreamOrigin::Standalone),
        );
    }

    /// Issue the SSE GET. `Ok(None)` means the server does not offer one.
    async fn open_get(&self) -> Result<Option<Response>, TransportError> {
        let session = self.session_id();
        let mut builder = self
            .request(Method::GET, session.as_deref())?
            .header(ACCEPT, EVENT_STREAM);
        let last_event_id = read(&self.last_event_id).clone();
        if let Some(id) = &last_event_id {
            builder = builder.header(LAST_EVENT_ID_HEADER, header_value(id)?);
        }

        let response = self.execute_timed(builder.build()?, "GET").await?;
        self.record_session(&response);

        match response.status() {
            StatusCode::METHOD_NOT_ALLOWED => Ok(None),
            StatusCode::UNAUTHORIZED => Err(TransportError::Unauthorized {
                www_authenticate: challenge(&response),
            }),
            StatusCode::NOT_FOUND if session.is_some() => {
                self.expire_session(session.as_deref());
                Err(TransportError::SessionExpired)
            }
            s if s.is_success() => {
                let kind = content_type(&response);
                if kind.starts_with(EVENT_STREAM) {
                    tracing::debug!(last_event_id = ?last_event_id, "SSE stream open");
                    Ok(Some(response))
                } else {
                    Err(TransportError::UnexpectedContentType {
                        content_type: kind.to_string(),
                    })
                }
            }
            _ => Err(status_error(response).await),
        }
    }

    async fn read_stream(
        &self,
        response: Response,
        retry_hint: &mut Option<Duration>,
        resumable: &mut bool,
    ) -> StreamEnd {
        let mut parser = SseParser::new(self.config.max_message_size);
        let mut body = response.bytes_stream();
        let mut end = StreamEnd::default();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    end.error = Some(e.into());
                    return end;
                }
            };
            parser.push(&chunk);
            loop {
                match parser.next_event() {
                    Ok(Some(event)) => {
                        if event.id.is_some() {
                            *resumable = true;
                        }
                        self.handle_event(event, retry_hint, &mut end);
                    }
                    Ok(None) => break,
                    Err(e) => self.observers.emit_error(e.into()),
                }
            }
        }
        end
    }

    fn handle_event(&self, event: SseEvent, retry_hint: &mut Option<Duration>, end: &mut StreamEnd) {
        let is_message = event.is_message();
        let SseEvent { id, event, data, retry } = event;
        if let Some(id) = id {
            *write(&self.last_event_id) = Some(id);
        }
        if let Some(ms) = retry {
            *retry_hint = Some(Duration::from_millis(ms));
        }
        if !is_message {
            tracing::trace!(event = %event, "ignoring SSE event");
            return;
        }
        if data.trim().is_empty() {
            return;
        }

        match Payload::parse(data.as_bytes()) {
            Ok(payload) => {
                if payload_has_response(&payload) {
                    end.saw_response = true;
                }
                self.deliver(payload);
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed SSE message");
                self.observers.emit_error(FramingError::from(e).into());
            }
        }
    }
}

/// Read an SSE stream and keep it alive.
///
/// The standalone stream is re-opened whenever it ends. A POST stream is
/// resumed through GET only while it has an event id to resume from and has
/// not yet delivered a response.
async fn follow_stream(
    inner: Arc<HttpInner>,
    token: CancellationToken,
    initial: Option<Response>,
    origin: StreamOrigin,
) {
    let options = inner.config.reconnection;
    let mut attempt = 0u32;
    let mut retry_hint: Option<Duration> = None;
    let mut resumable = false;
    let mut pending = initial;
    let mut reconnecting = false;
    let mut last_error: Option<TransportError> = None;

    loop {
        let response = if let Some(response) = pending.take() {
            response
        } else {
            if reconnecting {
                if options.is_exhausted(attempt) {
                    tracing::warn!(attempts = attempt, "giving up on SSE stream");
                    inner
                        .observers
                        .emit_error(TransportError::ReconnectionExhausted { attempts: attempt });
                    break;
                }
                let delay = retry_hint
                    .take()
                    .unwrap_or_else(|| options.delay_for_attempt(attempt));
                attempt += 1;
                tracing::debug!(attempt, ?delay, "reconnecting SSE stream");
                if !sleep_or_cancel(&token, delay).await {
                    return;
                }
            }
            reconnecting = true;

            match inner.open_get().await {
                Ok(Some(response)) => {
                    attempt = 0;
                    response
                }
                Ok(None) => {
                    tracing::debug!("server does not offer an SSE stream, continuing POST-only");
                    if let Some(error) = last_error.take() {
                        inner.observers.emit_error(error);
                    }
                    break;
                }
                Err(e @ (TransportError::Unauthorized { .. } | TransportError::SessionExpired)) => {
                    inner.observers.emit_error(e);
                    break;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "SSE GET failed");
                    last_error = Some(e);
                    continue;
                }
            }
        };

        let end = inner
            .read_stream(response, &mut retry_hint, &mut resumable)
            .await;
        reconnecting = true;
        if let Some(e) = &end.error {
            tracing::debug!(error = %e, ?origin, "SSE stream interrupted");
        }

        if origin == StreamOrigin::Post {
            if end.saw_response {
                break;
            }
            if !resumable {
                inner
                    .observers
                    .emit_error(end.error.unwrap_or(TransportError::ConnectionClosed));
                break;
            }
        }
        last_error = end.error;
    }

    if origin == StreamOrigin::Standalone {
        inner.standalone_open.store(false, Ordering::SeqCst);
    }
}

impl Transport for HttpTransport {
    async fn start(&self) -> Result<(), TransportError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }
        {
            let mut tasks = lock(&self.inner.tasks);
            if tasks.is_cancelled() {
                *tasks = TaskSet::new();
            }
        }
        self.inner.standalone_open.store(false, Ordering::SeqCst);
        self.inner.observers.reset_close();
        *lock(&self.inner.connected_at) = Some(Instant::now());
        tracing::debug!(url = %self.inner.config.url, "HTTP transport started");
        Ok(())
    }

    async fn send(&self, payload: Payload) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.post(payload).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            self.inner.observers.emit_close();
            return Ok(());
        }

        self.inner.tasks().shutdown().await;
        if self.inner.config.terminate_session_on_close {
            if let Err(e) = self.terminate_session().await {
                tracing::warn!(error = %e, "failed to terminate session");
            }
        }
        *lock(&self.inner.connected_at) = None;
        self.inner.observers.emit_close();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    fn metadata(&self) -> TransportMetadata {
        TransportMetadata::new("http")
            .remote_addr(self.inner.config.url.to_string())
            .session_id(self.session_id())
            .connected_at(*lock(&self.inner.connected_at))
    }

    fn observers(&self) -> &Observers {
        &self.inner.observers
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::connection(format!("Invalid header value: {e}")))
}

fn content_type(response: &Response) -> &str {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn challenge(response: &Response) -> Option<String> {
    response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn payload_has_response(payload: &Payload) -> bool {
    match payload {
        Payload::Single(message) => message.is_response(),
        Payload::Batch(batch) => batch.messages().iter().any(Message::is_response),
    }
}

async fn status_error(response: Response) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransportError::HttpStatus { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpwire_core::{Notification, Response as RpcResponse};
    use serde_json::json;
    use url::Url;

    fn transport() -> HttpTransport {
        HttpTransport::builder(Url::parse("http://127.0.0.1:9/mcp").unwrap())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_before_start_fails() {
        let err = transport()
            .send(Notification::new("x").into())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let transport = transport();
        transport.start().await.unwrap();
        assert!(matches!(
            transport.start().await.unwrap_err(),
            TransportError::AlreadyStarted
        ));
    }

    #[test]
    fn test_protocol_version_can_change() {
        let transport = transport();
        assert_eq!(transport.protocol_version(), mcpwire_core::PROTOCOL_VERSION);
        transport.set_protocol_version("2025-06-18");
        assert_eq!(transport.protocol_version(), "2025-06-18");
    }

    #[test]
    fn test_event_handling_tracks_id_retry_and_responses() {
        let transport = transport();
        let mut hint = None;
        let mut end = StreamEnd::default();

        transport.inner.handle_event(
            SseEvent {
                id: Some("5".to_string()),
                event: "message".to_string(),
                data: serde_json::to_string(&RpcResponse::success(1u64, json!({}))).unwrap(),
                retry: Some(250),
            },
            &mut hint,
            &mut end,
        );

        assert_eq!(transport.last_event_id().as_deref(), Some("5"));
        assert_eq!(hint, Some(Duration::from_millis(250)));
        assert!(end.saw_response);
        assert_eq!(transport.messages_received(), 1);
    }

    #[test]
    fn test_priming_and_foreign_events_are_not_delivered() {
        let transport = transport();
        let mut hint = None;
        let mut end = StreamEnd::default();
        for event in ["message", "endpoint"] {
            transport.inner.handle_event(
                SseEvent {
                    id: Some("0".to_string()),
                    event: event.to_string(),
                    data: if event == "message" { String::new() } else { "/x".to_string() },
                    retry: None,
                },
                &mut hint,
                &mut end,
            );
        }
        assert_eq!(transport.messages_received(), 0);
        assert_eq!(transport.last_event_id().as_deref(), Some("0"));
    }
}
