//! HTTP transport configuration types and constants.

use crate::backoff::ReconnectionOptions;
use crate::middleware::HttpMiddleware;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Header carrying the negotiated protocol version.
///
/// HTTP/2 requires lowercase header names; HTTP/1.1 does not care.
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Header carrying the server-assigned session id.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header used to resume an SSE stream.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Default maximum message size (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for the Streamable HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// The MCP endpoint.
    pub url: Url,
    /// Session to resume, if any.
    pub session_id: Option<String>,
    /// TCP and TLS connection timeout.
    pub connect_timeout: Duration,
    /// Timeout for a POST to return its response headers and, for JSON
    /// responses, its body. SSE streams are not subject to it.
    pub request_timeout: Duration,
    /// Extra headers sent on every request.
    pub headers: Vec<(String, String)>,
    /// Value of the `mcp-protocol-version` header.
    pub protocol_version: String,
    /// Largest JSON body or SSE line accepted.
    pub max_message_size: usize,
    /// SSE reconnection timing.
    pub reconnection: ReconnectionOptions,
    /// Send `DELETE` for the session on close.
    pub terminate_session_on_close: bool,
}

impl HttpTransportConfig {
    /// Create a configuration for `url` with default settings.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            session_id: None,
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            headers: Vec::new(),
            protocol_version: mcpwire_core::PROTOCOL_VERSION.to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            reconnection: ReconnectionOptions::default(),
            terminate_session_on_close: true,
        }
    }
}

/// Builder for [`HttpTransport`](super::HttpTransport).
#[derive(Clone)]
pub struct HttpTransportBuilder {
    pub(crate) config: HttpTransportConfig,
    pub(crate) middleware: Vec<Arc<dyn HttpMiddleware>>,
    pub(crate) client: Option<reqwest::Client>,
}

impl fmt::Debug for HttpTransportBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransportBuilder")
            .field("config", &self.config)
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

impl HttpTransportBuilder {
    /// Start building a transport for `url`.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self::from_config(HttpTransportConfig::new(url))
    }

    /// Start from an existing configuration.
    #[must_use]
    pub fn from_config(config: HttpTransportConfig) -> Self {
        Self {
            config,
            middleware: Vec::new(),
            client: None,
        }
    }

    /// Set the session ID.
    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.config.session_id = Some(session_id.into());
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Add a custom header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.push((name.into(), value.into()));
        self
    }

    /// Set SSE reconnection timing.
    #[must_use]
    pub const fn reconnection(mut self, options: ReconnectionOptions) -> Self {
        self.config.reconnection = options;
        self
    }

    /// Do not send `DELETE` on close.
    #[must_use]
    pub const fn keep_session_on_close(mut self) -> Self {
        self.config.terminate_session_on_close = false;
        self
    }

    /// Wrap every request in `middleware`. The first added runs outermost.
    #[must_use]
    pub fn middleware(mut self, middleware: impl HttpMiddleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Use a preconfigured HTTP client instead of building one.
    #[must_use]
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }
}
