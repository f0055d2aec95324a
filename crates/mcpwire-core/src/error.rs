//! JSON-RPC error objects and payload decoding errors.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard JSON-RPC error codes.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;

    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// A JSON-RPC error object, as carried in an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    /// Create an error with an arbitrary code.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a "parse error" (-32700).
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(codes::PARSE_ERROR, message)
    }

    /// Create an "invalid request" error (-32600).
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, message)
    }

    /// Create a "method not found" error (-32601).
    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, message)
    }

    /// Create an "invalid params" error (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    /// Create an "internal error" (-32603).
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

/// Errors produced while decoding or encoding a wire frame.
#[derive(Error, Diagnostic, Debug)]
pub enum PayloadError {
    /// The frame contained no JSON at all.
    #[error("Empty JSON-RPC frame")]
    #[diagnostic(code(mcpwire::payload::empty))]
    Empty,

    /// A batch array with zero elements.
    #[error("JSON-RPC batch must contain at least one message")]
    #[diagnostic(
        code(mcpwire::payload::empty_batch),
        help("Send a single message instead of an empty array")
    )]
    EmptyBatch,

    /// The JSON was malformed or did not match any message shape.
    #[error("Invalid JSON-RPC message: {0}")]
    #[diagnostic(code(mcpwire::payload::json))]
    Json(#[from] serde_json::Error),
}

impl PayloadError {
    /// The JSON-RPC error code a peer would report for this failure.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Json(e) if e.is_syntax() || e.is_eof() => codes::PARSE_ERROR,
            _ => codes::INVALID_REQUEST,
        }
    }
}
