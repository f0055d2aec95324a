//! The OAuth 2.1 authorization code + PKCE client.
//!
//! [`OAuthClient::auth`] drives one complete authorization attempt against
//! a provider:
//!
//! 1. discover protected resource and authorization server metadata
//! 2. register the client dynamically when no registration is stored
//! 3. exchange an authorization code, if one was supplied
//! 4. otherwise refresh stored tokens, if a refresh token exists
//! 5. otherwise build an authorization URL and redirect the user
//!
//! Rejected client credentials and rejected grants are discarded and the
//! attempt is repeated once. Any other failed refresh falls through to a
//! new authorization; a rejected refresh token is discarded first.

use crate::discovery::{self, DiscoveredMetadata};
use crate::error::{AuthError, Result};
use crate::pkce::{CODE_CHALLENGE_METHOD, PkceChallenge};
use crate::provider::{CredentialScope, OAuthClientProvider};
use crate::types::{
    AuthorizationServerMetadata, ClientAuthMethod, OAuthClientInformation, OAuthClientMetadata,
    OAuthTokens,
};
use chrono::Utc;
use std::time::Duration;
use url::Url;

/// Outcome of [`OAuthClient::auth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    /// Valid tokens are stored with the provider.
    Authorized,
    /// The user was sent to the authorization URL; call `auth` again with
    /// the returned code.
    Redirect,
}

/// Inputs to one authorization attempt.
#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// The MCP server being accessed.
    pub server_url: Url,
    /// Code returned to the redirect URI.
    pub authorization_code: Option<String>,
    /// Scope to request.
    pub scope: Option<String>,
    /// Explicit protected resource metadata location, usually taken from a
    /// `WWW-Authenticate` challenge. It overrides well-known discovery.
    pub resource_metadata_url: Option<Url>,
}

impl AuthOptions {
    /// Options for `server_url` with nothing else set.
    #[must_use]
    pub const fn new(server_url: Url) -> Self {
        Self {
            server_url,
            authorization_code: None,
            scope: None,
            resource_metadata_url: None,
        }
    }

    /// Exchange this authorization code.
    #[must_use]
    pub fn with_authorization_code(mut self, code: impl Into<String>) -> Self {
        self.authorization_code = Some(code.into());
        self
    }

    /// Request this scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Use this protected resource metadata URL.
    #[must_use]
    pub fn with_resource_metadata_url(mut self, url: Url) -> Self {
        self.resource_metadata_url = Some(url);
        self
    }
}

/// Configuration for [`OAuthClient`].
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    /// Timeout for each request to an OAuth endpoint.
    pub request_timeout: Duration,
    /// Value of the `mcp-protocol-version` header on discovery requests.
    pub protocol_version: String,
}

impl Default for OAuthClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            protocol_version: mcpwire_core::PROTOCOL_VERSION.to_string(),
        }
    }
}

impl OAuthClientConfig {
    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the protocol version header.
    #[must_use]
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }
}

/// OAuth client. Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    config: OAuthClientConfig,
}

impl Default for OAuthClient {
    fn default() -> Self {
        Self::new(OAuthClientConfig::default())
    }
}

impl OAuthClient {
    /// Create a client with its own HTTP connection pool.
    #[must_use]
    pub fn new(config: OAuthClientConfig) -> Self {
        Self::with_http_client(reqwest::Client::new(), config)
    }

    /// Create a client on an existing `reqwest` client.
    #[must_use]
    pub const fn with_http_client(http: reqwest::Client, config: OAuthClientConfig) -> Self {
        Self { http, config }
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &OAuthClientConfig {
        &self.config
    }

    /// Run the authorization flow, retrying once after the server rejects
    /// stored client credentials or a grant.
    pub async fn auth(
        &self,
        provider: &dyn OAuthClientProvider,
        options: &AuthOptions,
    ) -> Result<AuthResult> {
        match self.auth_once(provider, options).await {
            Err(e) if e.is_client_rejected() => {
                tracing::warn!(error = %e, "client credentials rejected, re-registering");
                provider.invalidate_credentials(CredentialScope::All).await?;
                self.auth_once(provider, options).await
            }
            Err(e @ AuthError::InvalidGrant(_)) => {
                tracing::warn!(error = %e, "grant rejected, discarding tokens");
                provider.invalidate_credentials(CredentialScope::Tokens).await?;
                self.auth_once(provider, options).await
            }
            other => other,
        }
    }

    async fn auth_once(
        &self,
        provider: &dyn OAuthClientProvider,
        options: &AuthOptions,
    ) -> Result<AuthResult> {
        let discovered = self
            .discover(&options.server_url, options.resource_metadata_url.as_ref())
            .await?;
        let metadata = discovered.metadata_or_default();
        let resource = resource_indicator(&options.server_url, &discovered);

        let client = match provider.client_information().await? {
            Some(client) => client,
            None if options.authorization_code.is_some() => {
                return Err(AuthError::MissingClientInformation);
            }
            None => {
                let client = self
                    .register_client(&metadata, &provider.client_metadata())
                    .await?;
                provider.save_client_information(client.clone()).await?;
                client
            }
        };

        if let Some(code) = &options.authorization_code {
            let verifier = provider
                .code_verifier()
                .await?
                .ok_or(AuthError::MissingCodeVerifier)?;
            let tokens = self
                .exchange_authorization(
                    &metadata,
                    &client,
                    code,
                    &verifier,
                    provider.redirect_url(),
                    Some(&resource),
                )
                .await?;
            provider.save_tokens(tokens).await?;
            provider
                .invalidate_credentials(CredentialScope::Verifier)
                .await?;
            return Ok(AuthResult::Authorized);
        }

        let refresh_token = provider
            .tokens()
            .await?
            .and_then(|tokens| tokens.refresh_token);
        if let Some(refresh_token) = refresh_token {
            match self
                .refresh_authorization(&metadata, &client, &refresh_token, Some(&resource))
                .await
            {
                Ok(tokens) => {
                    provider.save_tokens(tokens).await?;
                    return Ok(AuthResult::Authorized);
                }
                Err(e) if e.is_client_rejected() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "token refresh failed, starting a new authorization");
                    if matches!(e, AuthError::InvalidGrant(_)) {
                        provider
                            .invalidate_credentials(CredentialScope::Tokens)
                            .await?;
                    }
                }
            }
        }

        let scope = options
            .scope
            .clone()
            .or_else(|| provider.client_metadata().scope);
        let state = provider.state();
        let (authorization_url, pkce) = start_authorization(
            &metadata,
            &client,
            provider.redirect_url(),
            scope.as_deref(),
            state.as_deref(),
            Some(&resource),
        )?;
        provider.save_code_verifier(pkce.verifier).await?;
        if let Some(state) = state {
            provider.save_authorization_state(state).await?;
        }
        provider.redirect_to_authorization(authorization_url).await?;
        Ok(AuthResult::Redirect)
    }

    /// Discover metadata for an MCP server.
    pub async fn discover(
        &self,
        server_url: &Url,
        resource_metadata_url: Option<&Url>,
    ) -> Result<DiscoveredMetadata> {
        discovery::discover(
            &self.http,
            server_url,
            resource_metadata_url,
            &self.config,
        )
        .await
    }

    /// Register a client at the registration endpoint (RFC 7591).
    pub async fn register_client(
        &self,
        metadata: &AuthorizationServerMetadata,
        client_metadata: &OAuthClientMetadata,
    ) -> Result<OAuthClientInformation> {
        let endpoint = metadata
            .registration_endpoint
            .as_deref()
            .ok_or(AuthError::MissingEndpoint("dynamic client registration"))?;

        let response = self
            .http
            .post(endpoint)
            .timeout(self.config.request_timeout)
            .json(client_metadata)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::from_body(endpoint, status.as_u16(), body));
        }

        let info: OAuthClientInformation = serde_json::from_str(&body)?;
        tracing::info!(client_id = %info.client_id, "registered OAuth client");
        Ok(info)
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_authorization(
        &self,
        metadata: &AuthorizationServerMetadata,
        client: &OAuthClientInformation,
        authorization_code: &str,
        code_verifier: &str,
        redirect_uri: &str,
        resource: Option<&Url>,
    ) -> Result<OAuthTokens> {
        let mut params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", authorization_code.to_string()),
            ("code_verifier", code_verifier.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
        ];
        if let Some(resource) = resource {
            params.push(("resource", resource.to_string()));
        }
        self.token_request(metadata, client, params).await
    }

    /// Refresh tokens. A refresh token omitted from the response is carried
    /// over from the request.
    pub async fn refresh_authorization(
        &self,
        metadata: &AuthorizationServerMetadata,
        client: &OAuthClientInformation,
        refresh_token: &str,
        resource: Option<&Url>,
    ) -> Result<OAuthTokens> {
        let mut params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];
        if let Some(resource) = resource {
            params.push(("resource", resource.to_string()));
        }
        let mut tokens = self.token_request(metadata, client, params).await?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }

    /// Revoke a token (RFC 7009).
    pub async fn revoke_token(
        &self,
        metadata: &AuthorizationServerMetadata,
        client: &OAuthClientInformation,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> Result<()> {
        let endpoint = metadata
            .revocation_endpoint
            .as_deref()
            .ok_or(AuthError::MissingEndpoint("token revocation"))?;

        let mut params = vec![("token", token.to_string())];
        if let Some(hint) = token_type_hint {
            params.push(("token_type_hint", hint.to_string()));
        }
        let method = ClientAuthMethod::select(
            metadata.token_endpoint_auth_methods_supported.as_deref(),
            client.client_secret.is_some(),
        );
        let request = apply_client_auth(self.http.post(endpoint), method, client, &mut params);

        let response = request
            .timeout(self.config.request_timeout)
            .form(&params)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(hint = ?token_type_hint, "token revoked");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(AuthError::from_body(endpoint, status.as_u16(), body))
    }

    async fn token_request(
        &self,
        metadata: &AuthorizationServerMetadata,
        client: &OAuthClientInformation,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<OAuthTokens> {
        let endpoint = metadata.token_endpoint.as_str();
        let method = ClientAuthMethod::select(
            metadata.token_endpoint_auth_methods_supported.as_deref(),
            client.client_secret.is_some(),
        );
        let request = apply_client_auth(self.http.post(endpoint), method, client, &mut params);

        let response = request
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.config.request_timeout)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::from_body(endpoint, status.as_u16(), body));
        }

        let tokens: OAuthTokens = serde_json::from_str(&body)?;
        Ok(tokens.stamped(Utc::now()))
    }
}

/// Attach client credentials according to `method`.
fn apply_client_auth(
    request: reqwest::RequestBuilder,
    method: ClientAuthMethod,
    client: &OAuthClientInformation,
    params: &mut Vec<(&'static str, String)>,
) -> reqwest::RequestBuilder {
    match (method, client.client_secret.as_deref()) {
        (ClientAuthMethod::ClientSecretBasic, Some(secret)) => {
            // RFC 6749 §2.3.1: both parts are form-encoded before Base64.
            let id: String = url::form_urlencoded::byte_serialize(client.client_id.as_bytes()).collect();
            let secret: String = url::form_urlencoded::byte_serialize(secret.as_bytes()).collect();
            request.basic_auth(id, Some(secret))
        }
        (ClientAuthMethod::ClientSecretPost, Some(secret)) => {
            params.push(("client_id", client.client_id.clone()));
            params.push(("client_secret", secret.to_string()));
            request
        }
        _ => {
            params.push(("client_id", client.client_id.clone()));
            request
        }
    }
}

/// Build the authorization URL and the PKCE pair whose verifier must be
/// kept until the code is exchanged.
pub fn start_authorization(
    metadata: &AuthorizationServerMetadata,
    client: &OAuthClientInformation,
    redirect_uri: &str,
    scope: Option<&str>,
    state: Option<&str>,
    resource: Option<&Url>,
) -> Result<(Url, PkceChallenge)> {
    metadata.ensure_compatible()?;

    let pkce = PkceChallenge::new();
    let mut url = Url::parse(&metadata.authorization_endpoint)?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair("client_id", &client.client_id);
        query.append_pair("code_challenge", &pkce.challenge);
        query.append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);
        query.append_pair("redirect_uri", redirect_uri);
        if let Some(state) = state {
            query.append_pair("state", state);
        }
        if let Some(scope) = scope {
            query.append_pair("scope", scope);
        }
        if let Some(resource) = resource {
            query.append_pair("resource", resource.as_str());
        }
    }
    Ok((url, pkce))
}

/// RFC 8707 resource indicator: the resource named in protected resource
/// metadata, or the MCP server URL without its fragment.
fn resource_indicator(server_url: &Url, discovered: &DiscoveredMetadata) -> Url {
    let from_metadata = discovered
        .resource_metadata
        .as_ref()
        .and_then(|m| Url::parse(&m.resource).ok());
    from_metadata.unwrap_or_else(|| {
        let mut url = server_url.clone();
        url.set_fragment(None);
        url
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn metadata() -> AuthorizationServerMetadata {
        AuthorizationServerMetadata::from_issuer(&Url::parse("https://auth.example.com").unwrap())
    }

    #[test]
    fn test_authorization_url() {
        let client = OAuthClientInformation::public("client 1");
        let resource = Url::parse("https://mcp.example.com/mcp").unwrap();
        let (url, pkce) = start_authorization(
            &metadata(),
            &client,
            "http://127.0.0.1:8976/callback",
            Some("read write"),
            Some("xyz"),
            Some(&resource),
        )
        .unwrap();

        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(url.path(), "/authorize");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "client 1");
        assert_eq!(query["code_challenge"], pkce.challenge);
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["redirect_uri"], "http://127.0.0.1:8976/callback");
        assert_eq!(query["state"], "xyz");
        assert_eq!(query["scope"], "read write");
        assert_eq!(query["resource"], "https://mcp.example.com/mcp");
    }

    #[test]
    fn test_authorization_url_rejects_plain_only_servers() {
        let mut metadata = metadata();
        metadata.code_challenge_methods_supported = Some(vec!["plain".to_string()]);
        let client = OAuthClientInformation::public("c");
        assert!(matches!(
            start_authorization(&metadata, &client, "http://localhost/cb", None, None, None),
            Err(AuthError::IncompatibleServer(_))
        ));
    }

    #[test]
    fn test_client_auth_params() {
        let client = OAuthClientInformation::confidential("id", "s3cret");
        let http = reqwest::Client::new();

        let mut params = Vec::new();
        let request = apply_client_auth(
            http.post("https://auth.example.com/token"),
            ClientAuthMethod::ClientSecretPost,
            &client,
            &mut params,
        )
        .build()
        .unwrap();
        assert!(request.headers().get(reqwest::header::AUTHORIZATION).is_none());
        assert_eq!(
            params,
            vec![("client_id", "id".to_string()), ("client_secret", "s3cret".to_string())]
        );

        let mut params = Vec::new();
        let request = apply_client_auth(
            http.post("https://auth.example.com/token"),
            ClientAuthMethod::ClientSecretBasic,
            &client,
            &mut params,
        )
        .build()
        .unwrap();
        assert!(params.is_empty());
        let header = request.headers()[reqwest::header::AUTHORIZATION].to_str().unwrap();
        assert!(header.starts_with("Basic "));
    }

    #[test]
    fn test_resource_indicator_prefers_metadata() {
        let server = Url::parse("https://mcp.example.com/mcp#frag").unwrap();
        let mut discovered = DiscoveredMetadata {
            authorization_server: Url::parse("https://auth.example.com").unwrap(),
            authorization_server_metadata: None,
            resource_metadata: None,
        };
        assert_eq!(
            resource_indicator(&server, &discovered).as_str(),
            "https://mcp.example.com/mcp"
        );

        discovered.resource_metadata = Some(crate::types::ProtectedResourceMetadata {
            resource: "https://mcp.example.com/".to_string(),
            authorization_servers: vec![],
            scopes_supported: None,
            extra: HashMap::new(),
        });
        assert_eq!(
            resource_indicator(&server, &discovered).as_str(),
            "https://mcp.example.com/"
        );
    }
}
