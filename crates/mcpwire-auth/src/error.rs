//! OAuth error types.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for OAuth operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Error body returned by OAuth endpoints (RFC 6749 §5.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthErrorResponse {
    /// The error code, e.g. `invalid_grant`.
    pub error: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    /// URI with more information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

/// Errors raised by the OAuth client, providers and token storage.
///
/// Token endpoint error codes each map to their own variant so callers can
/// react to them individually.
#[derive(Error, Diagnostic, Debug)]
pub enum AuthError {
    /// `invalid_request`: the request is malformed.
    #[error("invalid_request: {0}")]
    #[diagnostic(code(mcpwire::auth::invalid_request))]
    InvalidRequest(String),

    /// `invalid_client`: client authentication failed.
    #[error("invalid_client: {0}")]
    #[diagnostic(
        code(mcpwire::auth::invalid_client),
        help("The stored client registration is no longer accepted; credentials will be re-registered")
    )]
    InvalidClient(String),

    /// `invalid_grant`: the code or refresh token is invalid, expired or revoked.
    #[error("invalid_grant: {0}")]
    #[diagnostic(code(mcpwire::auth::invalid_grant))]
    InvalidGrant(String),

    /// `unauthorized_client`: the client may not use this grant type.
    #[error("unauthorized_client: {0}")]
    #[diagnostic(code(mcpwire::auth::unauthorized_client))]
    UnauthorizedClient(String),

    /// `unsupported_grant_type`: the server does not support the grant type.
    #[error("unsupported_grant_type: {0}")]
    #[diagnostic(code(mcpwire::auth::unsupported_grant_type))]
    UnsupportedGrantType(String),

    /// `invalid_scope`: the requested scope is invalid or exceeds the grant.
    #[error("invalid_scope: {0}")]
    #[diagnostic(code(mcpwire::auth::invalid_scope))]
    InvalidScope(String),

    /// `access_denied`: the resource owner denied the request.
    #[error("access_denied: {0}")]
    #[diagnostic(code(mcpwire::auth::access_denied))]
    AccessDenied(String),

    /// `server_error`: the authorization server failed.
    #[error("server_error: {0}")]
    #[diagnostic(code(mcpwire::auth::server_error))]
    ServerError(String),

    /// `temporarily_unavailable`: the authorization server is overloaded.
    #[error("temporarily_unavailable: {0}")]
    #[diagnostic(code(mcpwire::auth::temporarily_unavailable))]
    TemporarilyUnavailable(String),

    /// Any other OAuth error code.
    #[error("OAuth error {code}: {description}")]
    #[diagnostic(code(mcpwire::auth::oauth))]
    OAuth {
        /// The raw error code.
        code: String,
        /// Human-readable description.
        description: String,
    },

    /// An endpoint answered with an unexpected HTTP status and no OAuth error body.
    #[error("HTTP {status} from {endpoint}: {body}")]
    #[diagnostic(code(mcpwire::auth::http))]
    Http {
        /// Which endpoint was called.
        endpoint: String,
        /// The response status code.
        status: u16,
        /// The response body.
        body: String,
    },

    /// Metadata discovery failed.
    #[error("Metadata discovery failed: {0}")]
    #[diagnostic(code(mcpwire::auth::discovery))]
    Discovery(String),

    /// Server metadata is incompatible with this client.
    #[error("Incompatible authorization server: {0}")]
    #[diagnostic(
        code(mcpwire::auth::incompatible_server),
        help("MCP requires the authorization code grant with S256 PKCE")
    )]
    IncompatibleServer(String),

    /// The authorization server does not expose a required endpoint.
    #[error("Authorization server does not support {0}")]
    #[diagnostic(code(mcpwire::auth::missing_endpoint))]
    MissingEndpoint(&'static str),

    /// An authorization code was supplied but no client is registered.
    #[error("Client information is required when exchanging an authorization code")]
    #[diagnostic(code(mcpwire::auth::missing_client))]
    MissingClientInformation,

    /// An authorization code was supplied but no PKCE verifier was stored.
    #[error("No PKCE code verifier saved for this authorization")]
    #[diagnostic(
        code(mcpwire::auth::missing_verifier),
        help("Start a new authorization; the verifier is saved when the redirect URL is built")
    )]
    MissingCodeVerifier,

    /// The provider could not send the user to the authorization URL.
    #[error("Authorization redirect failed: {0}")]
    #[diagnostic(code(mcpwire::auth::redirect))]
    Redirect(String),

    /// Token storage failure.
    #[error("Token storage error: {0}")]
    #[diagnostic(code(mcpwire::auth::storage))]
    Storage(String),

    /// I/O error from file-based storage.
    #[error("I/O error: {0}")]
    #[diagnostic(code(mcpwire::auth::io))]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    #[diagnostic(code(mcpwire::auth::json))]
    Json(#[from] serde_json::Error),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    #[diagnostic(code(mcpwire::auth::url))]
    Url(#[from] url::ParseError),

    /// HTTP client failure (connect, timeout, body read).
    #[error("HTTP request failed: {0}")]
    #[diagnostic(code(mcpwire::auth::request))]
    Request(#[from] reqwest::Error),
}

impl AuthError {
    /// Map an OAuth error response to the matching variant.
    #[must_use]
    pub fn from_response(response: OAuthErrorResponse) -> Self {
        let description = response
            .error_description
            .unwrap_or_else(|| "no description provided".to_string());
        match response.error.as_str() {
            "invalid_request" => Self::InvalidRequest(description),
            "invalid_client" => Self::InvalidClient(description),
            "invalid_grant" => Self::InvalidGrant(description),
            "unauthorized_client" => Self::UnauthorizedClient(description),
            "unsupported_grant_type" => Self::UnsupportedGrantType(description),
            "invalid_scope" => Self::InvalidScope(description),
            "access_denied" => Self::AccessDenied(description),
            "server_error" => Self::ServerError(description),
            "temporarily_unavailable" => Self::TemporarilyUnavailable(description),
            _ => Self::OAuth {
                code: response.error,
                description,
            },
        }
    }

    /// Build an error from a failed endpoint response body.
    ///
    /// Bodies that carry an OAuth error object map to their code; anything
    /// else becomes [`AuthError::Http`].
    #[must_use]
    pub fn from_body(endpoint: &str, status: u16, body: String) -> Self {
        match serde_json::from_str::<OAuthErrorResponse>(&body) {
            Ok(response) => Self::from_response(response),
            Err(_) => Self::Http {
                endpoint: endpoint.to_string(),
                status,
                body,
            },
        }
    }

    /// The RFC 6749 error code, if this error came from an OAuth error body.
    #[must_use]
    pub fn oauth_code(&self) -> Option<&str> {
        match self {
            Self::InvalidRequest(_) => Some("invalid_request"),
            Self::InvalidClient(_) => Some("invalid_client"),
            Self::InvalidGrant(_) => Some("invalid_grant"),
            Self::UnauthorizedClient(_) => Some("unauthorized_client"),
            Self::UnsupportedGrantType(_) => Some("unsupported_grant_type"),
            Self::InvalidScope(_) => Some("invalid_scope"),
            Self::AccessDenied(_) => Some("access_denied"),
            Self::ServerError(_) => Some("server_error"),
            Self::TemporarilyUnavailable(_) => Some("temporarily_unavailable"),
            Self::OAuth { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether the stored client registration was rejected.
    #[must_use]
    pub const fn is_client_rejected(&self) -> bool {
        matches!(self, Self::InvalidClient(_) | Self::UnauthorizedClient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(code: &str) -> OAuthErrorResponse {
        OAuthErrorResponse {
            error: code.to_string(),
            error_description: Some("details".to_string()),
            error_uri: None,
        }
    }

    #[test]
    fn test_error_codes_map_to_variants() {
        assert!(matches!(AuthError::from_response(response("invalid_client")), AuthError::InvalidClient(_)));
        assert!(matches!(AuthError::from_response(response("invalid_grant")), AuthError::InvalidGrant(_)));
        assert!(matches!(
            AuthError::from_response(response("unauthorized_client")),
            AuthError::UnauthorizedClient(_)
        ));
        assert!(matches!(
            AuthError::from_response(response("unsupported_grant_type")),
            AuthError::UnsupportedGrantType(_)
        ));
        assert!(matches!(AuthError::from_response(response("invalid_scope")), AuthError::InvalidScope(_)));
        assert!(matches!(AuthError::from_response(response("server_error")), AuthError::ServerError(_)));

        let other = AuthError::from_response(response("slow_down"));
        assert_eq!(other.oauth_code(), Some("slow_down"));
    }

    #[test]
    fn test_from_body() {
        let err = AuthError::from_body("token", 400, r#"{"error":"invalid_grant"}"#.to_string());
        assert!(matches!(err, AuthError::InvalidGrant(_)));

        let err = AuthError::from_body("token", 502, "Bad Gateway".to_string());
        assert!(matches!(err, AuthError::Http { status: 502, .. }));
        assert_eq!(err.oauth_code(), None);
    }

    #[test]
    fn test_classification() {
        assert!(AuthError::InvalidClient(String::new()).is_client_rejected());
        assert!(AuthError::UnauthorizedClient(String::new()).is_client_rejected());
        assert!(!AuthError::InvalidGrant(String::new()).is_client_rejected());
        assert!(!AuthError::ServerError(String::new()).is_client_rejected());
    }
}
