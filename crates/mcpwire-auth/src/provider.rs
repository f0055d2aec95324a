//! The provider contract the OAuth client drives.
//!
//! A provider owns everything user- or application-specific about an OAuth
//! flow: where redirects land, how the user is sent to the authorization
//! page, and where credentials are persisted.

use crate::error::Result;
use crate::storage::{StoredCredentials, TokenStorage};
use crate::types::{OAuthClientInformation, OAuthClientMetadata, OAuthTokens};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

/// Which stored credentials to discard after the server rejected them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScope {
    /// Client registration, tokens and verifier.
    All,
    /// Only the client registration.
    Client,
    /// Only the tokens.
    Tokens,
    /// Only the PKCE verifier and the `state` sent with it.
    Verifier,
}

/// Application side of an OAuth authorization.
#[async_trait]
pub trait OAuthClientProvider: Send + Sync {
    /// Redirect URI registered for this client.
    fn redirect_url(&self) -> &str;

    /// Metadata used for dynamic client registration.
    fn client_metadata(&self) -> OAuthClientMetadata;

    /// Optional `state` parameter for the authorization request.
    fn state(&self) -> Option<String> {
        None
    }

    /// Stored client registration, if any.
    async fn client_information(&self) -> Result<Option<OAuthClientInformation>>;

    /// Persist a client registration.
    async fn save_client_information(&self, info: OAuthClientInformation) -> Result<()>;

    /// Stored tokens, if any.
    async fn tokens(&self) -> Result<Option<OAuthTokens>>;

    /// Persist tokens.
    async fn save_tokens(&self, tokens: OAuthTokens) -> Result<()>;

    /// Send the user to the authorization URL.
    async fn redirect_to_authorization(&self, authorization_url: Url) -> Result<()>;

    /// Persist the PKCE verifier for the authorization in progress.
    async fn save_code_verifier(&self, verifier: String) -> Result<()>;

    /// The stored PKCE verifier.
    async fn code_verifier(&self) -> Result<Option<String>>;

    /// Persist the `state` sent with the authorization in progress, so the
    /// redirect callback can be checked against it. The default keeps
    /// nothing.
    async fn save_authorization_state(&self, _state: String) -> Result<()> {
        Ok(())
    }

    /// The stored authorization `state`.
    async fn authorization_state(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Discard credentials the server no longer accepts.
    async fn invalidate_credentials(&self, scope: CredentialScope) -> Result<()>;
}

type RedirectHandler = dyn Fn(&Url) + Send + Sync;

/// A provider that persists credentials in a [`TokenStorage`].
///
/// Credentials are stored under the MCP server URL. A statically configured
/// client registration takes precedence over a stored one. Redirects are
/// handed to a callback (by default they are only logged) and the most
/// recent authorization URL is kept for inspection.
pub struct StorageProvider {
    server_key: String,
    storage: Arc<dyn TokenStorage>,
    redirect_url: String,
    client_metadata: OAuthClientMetadata,
    static_client: Option<OAuthClientInformation>,
    generate_state: bool,
    on_redirect: Option<Arc<RedirectHandler>>,
    last_authorization_url: Mutex<Option<Url>>,
}

impl StorageProvider {
    /// Create a provider for `server_url`.
    pub fn new(
        server_url: &Url,
        storage: Arc<dyn TokenStorage>,
        redirect_url: impl Into<String>,
    ) -> Self {
        let redirect_url = redirect_url.into();
        Self {
            server_key: server_url.as_str().to_string(),
            storage,
            client_metadata: OAuthClientMetadata::new(redirect_url.clone()),
            redirect_url,
            static_client: None,
            generate_state: true,
            on_redirect: None,
            last_authorization_url: Mutex::new(None),
        }
    }

    /// Override the registration metadata.
    #[must_use]
    pub fn with_client_metadata(mut self, metadata: OAuthClientMetadata) -> Self {
        self.client_metadata = metadata;
        self
    }

    /// Use a pre-registered client instead of dynamic registration.
    #[must_use]
    pub fn with_client_information(mut self, info: OAuthClientInformation) -> Self {
        self.static_client = Some(info);
        self
    }

    /// Disable the random `state` parameter.
    #[must_use]
    pub fn without_state(mut self) -> Self {
        self.generate_state = false;
        self
    }

    /// Call `handler` with every authorization URL.
    #[must_use]
    pub fn on_redirect(mut self, handler: impl Fn(&Url) + Send + Sync + 'static) -> Self {
        self.on_redirect = Some(Arc::new(handler));
        self
    }

    /// The most recent authorization URL the user was sent to.
    #[must_use]
    pub fn last_authorization_url(&self) -> Option<Url> {
        self.last_authorization_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn load(&self) -> Result<StoredCredentials> {
        Ok(self.storage.load(&self.server_key).await?.unwrap_or_default())
    }

    async fn update(&self, f: impl FnOnce(&mut StoredCredentials) + Send) -> Result<()> {
        let mut credentials = self.load().await?;
        f(&mut credentials);
        self.storage.store(&self.server_key, &credentials).await
    }
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageProvider")
            .field("server_key", &self.server_key)
            .field("storage", &self.storage)
            .field("redirect_url", &self.redirect_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl OAuthClientProvider for StorageProvider {
    fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    fn client_metadata(&self) -> OAuthClientMetadata {
        self.client_metadata.clone()
    }

    fn state(&self) -> Option<String> {
        self.generate_state.then(crate::pkce::generate_state)
    }

    async fn client_information(&self) -> Result<Option<OAuthClientInformation>> {
        if let Some(info) = &self.static_client {
            return Ok(Some(info.clone()));
        }
        let stored = self.load().await?.client_information;
        match stored {
            Some(info) if info.is_secret_expired(Utc::now()) => {
                tracing::info!(server = %self.server_key, "stored client secret expired");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn save_client_information(&self, info: OAuthClientInformation) -> Result<()> {
        self.update(|c| c.client_information = Some(info)).await?;
        tracing::info!(server = %self.server_key, "saved client registration");
        Ok(())
    }

    async fn tokens(&self) -> Result<Option<OAuthTokens>> {
        Ok(self.load().await?.tokens)
    }

    async fn save_tokens(&self, tokens: OAuthTokens) -> Result<()> {
        self.update(|c| c.tokens = Some(tokens)).await?;
        tracing::debug!(server = %self.server_key, "saved OAuth tokens");
        Ok(())
    }

    async fn redirect_to_authorization(&self, authorization_url: Url) -> Result<()> {
        tracing::info!(url = %authorization_url, "authorization required");
        if let Some(handler) = &self.on_redirect {
            handler(&authorization_url);
        }
        *self
            .last_authorization_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(authorization_url);
        Ok(())
    }

    async fn save_code_verifier(&self, verifier: String) -> Result<()> {
        self.update(|c| c.code_verifier = Some(verifier)).await
    }

    async fn code_verifier(&self) -> Result<Option<String>> {
        Ok(self.load().await?.code_verifier)
    }

    async fn save_authorization_state(&self, state: String) -> Result<()> {
        self.update(|c| c.state = Some(state)).await
    }

    async fn authorization_state(&self) -> Result<Option<String>> {
        Ok(self.load().await?.state)
    }

    async fn invalidate_credentials(&self, scope: CredentialScope) -> Result<()> {
        tracing::debug!(server = %self.server_key, ?scope, "invalidating credentials");
        match scope {
            CredentialScope::All => self.storage.remove(&self.server_key).await,
            CredentialScope::Client => self.update(|c| c.client_information = None).await,
            CredentialScope::Tokens => self.update(|c| c.tokens = None).await,
            CredentialScope::Verifier => {
                self.update(|c| {
                    c.code_verifier = None;
                    c.state = None;
                })
                .await
            }
        }
    }
}
