//! JSON-RPC 2.0 message types.
//!
//! Every frame exchanged with an MCP server is one of:
//!
//! - **Request**: a method call expecting a response
//! - **Response**: a reply to a request, carrying either a result or an error
//! - **Notification**: a one-way message with no id
//!
//! A frame on the wire is either a single message or a non-empty batch
//! (JSON array) of messages; [`Payload`] models both.
//!
//! # Example
//!
//! ```rust
//! use mcpwire_core::protocol::{Message, Payload, Request};
//!
//! let payload = Payload::parse(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
//! assert_eq!(payload, Payload::from(Message::from(Request::new("ping", 1u64))));
//! ```

use crate::error::{JsonRpcError, PayloadError};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// The JSON-RPC version string. Always "2.0".
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name of the notification a client sends once initialization completes.
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

/// A JSON-RPC request ID.
///
/// Request IDs are either numbers or strings and correlate a response with
/// the request that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID (most common).
    Number(u64),
    /// String request ID.
    String(String),
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Number(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// The JSON-RPC version. Always "2.0".
    pub jsonrpc: Cow<'static, str>,
    /// The request ID for correlation.
    pub id: RequestId,
    /// The method to invoke.
    pub method: Cow<'static, str>,
    /// The method parameters, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    /// Create a new request with no parameters.
    #[must_use]
    pub fn new(method: impl Into<Cow<'static, str>>, id: impl Into<RequestId>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    /// Set the parameters for this request.
    #[must_use]
    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// A JSON-RPC 2.0 response message.
///
/// A response carries either a `result` or an `error`. The error form is
/// what JSON-RPC calls an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The JSON-RPC version. Always "2.0".
    pub jsonrpc: Cow<'static, str>,
    /// The request ID this response corresponds to.
    ///
    /// `None` (serialized as `null`) when the server could not read the
    /// request's id, as with a parse error. The field itself is required.
    #[serde(deserialize_with = "nullable_id")]
    pub id: Option<RequestId>,
    /// The result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// The error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl Response {
    /// Create a successful response.
    #[must_use]
    pub fn success(id: impl Into<RequestId>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(id: impl Into<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: Some(id.into()),
            result: None,
            error: Some(error),
        }
    }

    /// Create an error response with a `null` id.
    #[must_use]
    pub fn error_without_id(error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: None,
            result: None,
            error: Some(error),
        }
    }

    /// Check if this response indicates an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Get the result, consuming self.
    pub fn into_result(self) -> Result<serde_json::Value, JsonRpcError> {
        if let Some(error) = self.error {
            Err(error)
        } else {
            self.result.ok_or_else(|| {
                JsonRpcError::internal_error("Response contained neither result nor error")
            })
        }
    }
}

// Without `deserialize_with` serde would treat a missing `id` as `None`,
// and a notification would then also match the response shape.
fn nullable_id<'de, D>(deserializer: D) -> Result<Option<RequestId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<RequestId>::deserialize(deserializer)
}

/// A JSON-RPC 2.0 notification message. Notifications have no ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// The JSON-RPC version. Always "2.0".
    pub jsonrpc: Cow<'static, str>,
    /// The notification method.
    pub method: Cow<'static, str>,
    /// The notification parameters, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    /// Create a new notification with no parameters.
    #[must_use]
    pub fn new(method: impl Into<Cow<'static, str>>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            method: method.into(),
            params: None,
        }
    }

    /// Set the parameters for this notification.
    #[must_use]
    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// A JSON-RPC 2.0 message (request, response, or notification).
///
/// Variant order matters for untagged deserialization: a request is tried
/// first because it is the only shape with both `id` and `method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// A request message.
    Request(Request),
    /// A response message (success or error).
    Response(Response),
    /// A notification message.
    Notification(Notification),
}

impl Message {
    /// Get the method name if this is a request or notification.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }

    /// Get the request ID if this is a request or a response with a
    /// non-null id.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Response(r) => r.id.as_ref(),
            Self::Notification(_) => None,
        }
    }

    /// Check if this is a request.
    #[must_use]
    pub const fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Check if this is a response (success or error).
    #[must_use]
    pub const fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// Check if this is an error response.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Response(r) if r.is_error())
    }

    /// Check if this is a notification.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        matches!(self, Self::Notification(_))
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Self::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Self::Response(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Self::Notification(n)
    }
}

/// An ordered, non-empty sequence of messages sent as one JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Message>", into = "Vec<Message>")]
pub struct Batch(Vec<Message>);

impl Batch {
    /// Create a batch, rejecting an empty sequence.
    pub fn new(messages: Vec<Message>) -> Result<Self, PayloadError> {
        if messages.is_empty() {
            return Err(PayloadError::EmptyBatch);
        }
        Ok(Self(messages))
    }

    /// The messages in document order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.0
    }

    /// Number of messages in the batch. Never zero.
    #[must_use]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl TryFrom<Vec<Message>> for Batch {
    type Error = PayloadError;

    fn try_from(messages: Vec<Message>) -> Result<Self, Self::Error> {
        Self::new(messages)
    }
}

impl From<Batch> for Vec<Message> {
    fn from(batch: Batch) -> Self {
        batch.0
    }
}

impl IntoIterator for Batch {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// One wire frame: a single message or a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// A single JSON object.
    Single(Message),
    /// A JSON array of messages.
    Batch(Batch),
}

impl Payload {
    /// Parse a frame from raw JSON bytes.
    ///
    /// Unlike plain untagged deserialization this reports *why* an array
    /// was rejected, so an empty batch surfaces as [`PayloadError::EmptyBatch`].
    pub fn parse(bytes: &[u8]) -> Result<Self, PayloadError> {
        let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
        match first {
            None => Err(PayloadError::Empty),
            Some(b'[') => {
                let messages: Vec<Message> = serde_json::from_slice(bytes)?;
                Ok(Self::Batch(Batch::new(messages)?))
            }
            Some(_) => Ok(Self::Single(serde_json::from_slice(bytes)?)),
        }
    }

    /// Serialize to compact JSON bytes.
    pub fn to_vec(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Whether this frame is exactly the `notifications/initialized` notification.
    #[must_use]
    pub fn is_initialized_notification(&self) -> bool {
        matches!(self, Self::Single(Message::Notification(n)) if n.method == INITIALIZED_NOTIFICATION)
    }

    /// Number of messages carried by this frame.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(b) => b.len(),
        }
    }

    /// Always false; a payload carries at least one message.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }
}

impl IntoIterator for Payload {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        match self {
            Self::Single(m) => vec![m].into_iter(),
            Self::Batch(b) => b.into_iter(),
        }
    }
}

impl From<Message> for Payload {
    fn from(m: Message) -> Self {
        Self::Single(m)
    }
}

impl From<Request> for Payload {
    fn from(r: Request) -> Self {
        Self::Single(r.into())
    }
}

impl From<Response> for Payload {
    fn from(r: Response) -> Self {
        Self::Single(r.into())
    }
}

impl From<Notification> for Payload {
    fn from(n: Notification) -> Self {
        Self::Single(n.into())
    }
}

impl From<Batch> for Payload {
    fn from(b: Batch) -> Self {
        Self::Batch(b)
    }
}
