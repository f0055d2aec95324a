//! OAuth bearer-token middleware.
//!
//! Attaches `Authorization: Bearer <token>` from an [`OAuthClientProvider`],
//! refreshing the token shortly before it expires. On a 401 it reads the
//! `WWW-Authenticate` challenge, re-authorizes once and repeats the request
//! once with the new token.
//!
//! Refreshes are single-flight: concurrent requests that find the token
//! stale queue on one lock, and whoever gets it second reuses the first
//! caller's result instead of refreshing again.

use super::{HttpMiddleware, Next};
use crate::error::TransportError;
use async_trait::async_trait;
use mcpwire_auth::{
    AuthOptions, AuthResult, BearerChallenge, OAuthClient, OAuthClientProvider, OAuthTokens,
};
use reqwest::header::{AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Request, Response, StatusCode};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// Middleware that authenticates requests with OAuth 2.1 bearer tokens.
pub struct OAuthMiddleware {
    client: OAuthClient,
    provider: Arc<dyn OAuthClientProvider>,
    server_url: Url,
    scope: Option<String>,
    refresh_lock: Mutex<()>,
}

impl fmt::Debug for OAuthMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthMiddleware")
            .field("server_url", &self.server_url.as_str())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl OAuthMiddleware {
    /// Authenticate requests to `server_url` with tokens from `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn OAuthClientProvider>, server_url: Url) -> Self {
        Self {
            client: OAuthClient::default(),
            provider,
            server_url,
            scope: None,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Use a specific OAuth client.
    #[must_use]
    pub fn with_client(mut self, client: OAuthClient) -> Self {
        self.client = client;
        self
    }

    /// Request this scope when re-authorizing.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// The token to send, refreshed first if it is about to expire.
    ///
    /// An expired token without a refresh token is returned as is; the
    /// server's 401 then drives a full re-authorization.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Auth`] if storage or the refresh fails, and
    /// [`TransportError::Unauthorized`] if the refresh fell back to an
    /// interactive authorization.
    pub async fn access_token(&self) -> Result<Option<OAuthTokens>, TransportError> {
        if let Some(tokens) = usable(self.provider.tokens().await?) {
            return Ok(Some(tokens));
        }

        let _guard = self.refresh_lock.lock().await;
        let Some(tokens) = self.provider.tokens().await? else {
            return Ok(None);
        };
        if !tokens.is_expired() || tokens.refresh_token.is_none() {
            return Ok(Some(tokens));
        }

        debug!(server = %self.server_url, "access token about to expire, refreshing");
        self.authorize(None).await
    }

    /// Obtain new tokens after the server rejected `rejected`.
    async fn reauthorize(
        &self,
        rejected: Option<&OAuthTokens>,
        resource_metadata_url: Option<Url>,
    ) -> Result<Option<OAuthTokens>, TransportError> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.provider.tokens().await? {
            let replaced = rejected.is_none_or(|r| r.access_token != current.access_token);
            if replaced && !current.is_expired() {
                debug!("token already replaced by a concurrent request");
                return Ok(Some(current));
            }
        }

        info!(server = %self.server_url, "server rejected the access token, re-authorizing");
        match self.authorize(resource_metadata_url).await {
            Ok(tokens) => Ok(tokens),
            Err(TransportError::Unauthorized { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Run the OAuth flow. The caller holds `refresh_lock`.
    async fn authorize(
        &self,
        resource_metadata_url: Option<Url>,
    ) -> Result<Option<OAuthTokens>, TransportError> {
        let mut options = AuthOptions::new(self.server_url.clone());
        options.scope.clone_from(&self.scope);
        options.resource_metadata_url = resource_metadata_url;

        match self.client.auth(self.provider.as_ref(), &options).await? {
            AuthResult::Authorized => Ok(self.provider.tokens().await?),
            AuthResult::Redirect => {
                info!(server = %self.server_url, "authorization requires user interaction");
                Err(TransportError::Unauthorized {
                    www_authenticate: None,
                })
            }
        }
    }
}

fn usable(tokens: Option<OAuthTokens>) -> Option<OAuthTokens> {
    tokens.filter(|t| !t.is_expired())
}

fn set_bearer(request: &mut Request, tokens: &OAuthTokens) -> Result<(), TransportError> {
    let mut value = HeaderValue::from_str(&tokens.authorization_header())
        .map_err(|_| TransportError::connection("access token is not a valid header value"))?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

fn challenge(response: &Response) -> Option<String> {
    response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl HttpMiddleware for OAuthMiddleware {
    async fn handle(&self, mut request: Request, next: Next<'_>) -> Result<Response, TransportError> {
        let retry = request.try_clone();
        let sent = self.access_token().await?;
        if let Some(tokens) = &sent {
            set_bearer(&mut request, tokens)?;
        }

        let response = next.run(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let www_authenticate = challenge(&response);
        let Some(mut retry) = retry else {
            return Err(TransportError::Unauthorized { www_authenticate });
        };
        let resource_metadata_url = www_authenticate
            .as_deref()
            .and_then(BearerChallenge::parse)
            .and_then(|c| c.resource_metadata)
            .and_then(|raw| Url::parse(&raw).ok());

        let Some(tokens) = self.reauthorize(sent.as_ref(), resource_metadata_url).await? else {
            return Err(TransportError::Unauthorized { www_authenticate });
        };
        set_bearer(&mut retry, &tokens)?;

        let response = next.run(retry).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized {
                www_authenticate: challenge(&response),
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use mcpwire_auth::{MemoryTokenStorage, StorageProvider};

    fn provider() -> Arc<StorageProvider> {
        let server = Url::parse("http://127.0.0.1:9/mcp").unwrap();
        Arc::new(StorageProvider::new(
            &server,
            Arc::new(MemoryTokenStorage::new()),
            "http://127.0.0.1/callback",
        ))
    }

    #[tokio::test]
    async fn test_fresh_token_is_used_without_refresh() {
        let provider = provider();
        provider
            .save_tokens(OAuthTokens::bearer("fresh").with_expires_at(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        let middleware =
            OAuthMiddleware::new(provider, Url::parse("http://127.0.0.1:9/mcp").unwrap());

        let tokens = middleware.access_token().await.unwrap().unwrap();
        assert_eq!(tokens.access_token, "fresh");
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_is_passed_through() {
        let provider = provider();
        provider
            .save_tokens(OAuthTokens::bearer("stale").with_expires_at(Utc::now() - Duration::hours(1)))
            .await
            .unwrap();
        let middleware =
            OAuthMiddleware::new(provider, Url::parse("http://127.0.0.1:9/mcp").unwrap());

        let tokens = middleware.access_token().await.unwrap().unwrap();
        assert_eq!(tokens.access_token, "stale");
    }

    #[tokio::test]
    async fn test_no_tokens() {
        let middleware =
            OAuthMiddleware::new(provider(), Url::parse("http://127.0.0.1:9/mcp").unwrap());
        assert!(middleware.access_token().await.unwrap().is_none());
    }
}
