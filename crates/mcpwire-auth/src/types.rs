//! OAuth wire types: tokens, client registration and server metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Tokens within this window of their deadline are treated as expired.
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(30);

/// Upper bound on `expires_in` accepted from a server (ten years).
const MAX_TOKEN_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Tokens issued by the authorization server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokens {
    /// The access token.
    pub access_token: String,
    /// The token type, normally `Bearer`.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds relative to issuance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// The granted scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// The refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// OpenID Connect ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Absolute expiry, computed from `expires_in` when the tokens were received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthTokens {
    /// Create bearer tokens with no expiry.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_in: None,
            scope: None,
            refresh_token: None,
            id_token: None,
            expires_at: None,
        }
    }

    /// Set the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Set an absolute deadline.
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Convert `expires_in` into an absolute deadline relative to `now`.
    ///
    /// Tokens that already carry a deadline are left untouched.
    #[must_use]
    pub fn stamped(mut self, now: DateTime<Utc>) -> Self {
        if self.expires_at.is_none() {
            if let Some(secs) = self.expires_in {
                let secs = secs.min(MAX_TOKEN_LIFETIME_SECS) as i64;
                self.expires_at = now.checked_add_signed(chrono::Duration::seconds(secs));
            }
        }
        self
    }

    /// Whether the token expires within `window` of `now`.
    #[must_use]
    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(deadline) => {
                let window = chrono::Duration::from_std(window)
                    .unwrap_or_else(|_| chrono::Duration::seconds(MAX_TOKEN_LIFETIME_SECS as i64));
                deadline.signed_duration_since(now) <= window
            }
            None => false,
        }
    }

    /// Whether the remaining lifetime is at most [`EXPIRY_BUFFER`].
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_within(EXPIRY_BUFFER, Utc::now())
    }

    /// The `Authorization` header value.
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Client credentials, from static configuration or dynamic registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClientInformation {
    /// The client identifier.
    pub client_id: String,
    /// The client secret, for confidential clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// When the client id was issued (seconds since the epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_issued_at: Option<i64>,
    /// When the secret expires (seconds since the epoch, 0 means never).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<i64>,
}

impl OAuthClientInformation {
    /// A public client with no secret.
    pub fn public(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            client_id_issued_at: None,
            client_secret_expires_at: None,
        }
    }

    /// A confidential client.
    pub fn confidential(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_secret: Some(client_secret.into()),
            ..Self::public(client_id)
        }
    }

    /// Whether the registered secret has passed its expiry.
    #[must_use]
    pub fn is_secret_expired(&self, now: DateTime<Utc>) -> bool {
        match self.client_secret_expires_at {
            Some(0) | None => false,
            Some(expires_at) => expires_at <= now.timestamp(),
        }
    }
}

/// Client metadata sent to the registration endpoint (RFC 7591).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClientMetadata {
    /// Redirect URIs for the authorization code flow.
    pub redirect_uris: Vec<String>,
    /// Requested token endpoint authentication method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,
    /// Requested grant types.
    pub grant_types: Vec<String>,
    /// Requested response types.
    pub response_types: Vec<String>,
    /// Human-readable client name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// Client home page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,
    /// Space-separated scopes the client will request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Software identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_id: Option<String>,
    /// Software version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
}

impl OAuthClientMetadata {
    /// Metadata for a public client using the authorization code grant.
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self {
            redirect_uris: vec![redirect_uri.into()],
            token_endpoint_auth_method: Some("none".to_string()),
            grant_types: vec!["authorization_code".to_string(), "refresh_token".to_string()],
            response_types: vec!["code".to_string()],
            client_name: None,
            client_uri: None,
            scope: None,
            software_id: None,
            software_version: None,
        }
    }

    /// Set the requested scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Request a specific token endpoint authentication method.
    #[must_use]
    pub fn with_auth_method(mut self, method: ClientAuthMethod) -> Self {
        self.token_endpoint_auth_method = Some(method.as_str().to_string());
        self
    }
}

/// Authorization server metadata (RFC 8414).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// The issuer identifier.
    pub issuer: String,
    /// Authorization endpoint URL.
    pub authorization_endpoint: String,
    /// Token endpoint URL.
    pub token_endpoint: String,
    /// Dynamic client registration endpoint URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    /// Token revocation endpoint URL (RFC 7009).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
    /// Supported scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    /// Supported response types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_types_supported: Option<Vec<String>>,
    /// Supported grant types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,
    /// Supported token endpoint authentication methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,
    /// Supported PKCE challenge methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,
    /// Additional metadata fields.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl AuthorizationServerMetadata {
    /// Metadata with the conventional default endpoints under `issuer`.
    ///
    /// Used when the server publishes no metadata document at all.
    #[must_use]
    pub fn from_issuer(issuer: &Url) -> Self {
        let base = issuer.origin().ascii_serialization();
        Self {
            issuer: base.clone(),
            authorization_endpoint: format!("{base}/authorize"),
            token_endpoint: format!("{base}/token"),
            registration_endpoint: Some(format!("{base}/register")),
            revocation_endpoint: None,
            scopes_supported: None,
            response_types_supported: None,
            grant_types_supported: None,
            token_endpoint_auth_methods_supported: None,
            code_challenge_methods_supported: None,
            extra: HashMap::new(),
        }
    }

    /// Check that the server can run an S256 authorization code flow.
    pub fn ensure_compatible(&self) -> crate::Result<()> {
        let offers_code = self
            .response_types_supported
            .as_ref()
            .is_none_or(|types| types.iter().any(|t| t == "code"));
        if !offers_code {
            return Err(crate::AuthError::IncompatibleServer(
                "response type 'code' is not supported".to_string(),
            ));
        }
        let offers_s256 = self
            .code_challenge_methods_supported
            .as_ref()
            .is_none_or(|methods| methods.iter().any(|m| m == crate::pkce::CODE_CHALLENGE_METHOD));
        if !offers_s256 {
            return Err(crate::AuthError::IncompatibleServer(
                "code challenge method 'S256' is not supported".to_string(),
            ));
        }
        Ok(())
    }
}

/// Protected resource metadata (RFC 9728).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// The protected resource identifier.
    pub resource: String,
    /// Authorization servers that issue tokens for this resource.
    #[serde(default)]
    pub authorization_servers: Vec<String>,
    /// Scopes the resource understands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    /// Additional metadata fields.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// How the client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// HTTP Basic with the client id and secret.
    ClientSecretBasic,
    /// Client id and secret in the form body.
    ClientSecretPost,
    /// Public client: only `client_id` in the body.
    None,
}

impl ClientAuthMethod {
    /// The RFC 7591 name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
            Self::None => "none",
        }
    }

    /// Pick the strongest method both sides support.
    ///
    /// With a secret the preference is basic, then post, then none. Without
    /// a secret only `none` is possible. When the server advertises nothing
    /// a secret is sent in the body.
    #[must_use]
    pub fn select(supported: Option<&[String]>, has_secret: bool) -> Self {
        if !has_secret {
            return Self::None;
        }
        let Some(supported) = supported else {
            return Self::ClientSecretPost;
        };
        let offers = |m: Self| supported.iter().any(|s| s == m.as_str());
        if offers(Self::ClientSecretBasic) {
            Self::ClientSecretBasic
        } else if offers(Self::ClientSecretPost) {
            Self::ClientSecretPost
        } else {
            Self::None
        }
    }
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerChallenge {
    /// RFC 9728 `resource_metadata` URL.
    pub resource_metadata: Option<String>,
    /// Authentication realm.
    pub realm: Option<String>,
    /// Error code, e.g. `invalid_token`.
    pub error: Option<String>,
    /// Error description.
    pub error_description: Option<String>,
    /// Scope required for the request.
    pub scope: Option<String>,
}

impl BearerChallenge {
    /// Parse a header value. Returns `None` for non-Bearer challenges.
    #[must_use]
    pub fn parse(header_value: &str) -> Option<Self> {
        let trimmed = header_value.trim_start();
        let scheme_end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        if !trimmed[..scheme_end].eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut challenge = Self::default();
        for (key, value) in auth_params(&trimmed[scheme_end..]) {
            match key.to_ascii_lowercase().as_str() {
                "resource_metadata" => challenge.resource_metadata = Some(value),
                "realm" => challenge.realm = Some(value),
                "error" => challenge.error = Some(value),
                "error_description" => challenge.error_description = Some(value),
                "scope" => challenge.scope = Some(value),
                _ => {}
            }
        }
        Some(challenge)
    }
}

/// Split `key="value", key=token` pairs, honouring quotes and escapes.
fn auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
        let key: String = std::iter::from_fn(|| chars.next_if(|c| *c != '=' && *c != ',')).collect();
        if key.trim().is_empty() {
            break;
        }
        if chars.next_if_eq(&'=').is_none() {
            continue;
        }
        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            value.extend(std::iter::from_fn(|| chars.next_if(|c| *c != ',')));
            value = value.trim().to_string();
        }
        params.push((key.trim().to_string(), value));
    }
    params
}
