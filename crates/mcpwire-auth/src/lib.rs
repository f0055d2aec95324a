//! # mcpwire-auth
//!
//! OAuth 2.1 client authentication for MCP servers.
//!
//! - **PKCE** (RFC 7636): [`pkce::PkceChallenge`]
//! - **Discovery**: protected resource metadata (RFC 9728) and authorization
//!   server metadata (RFC 8414) with OpenID Connect fallbacks
//! - **Dynamic client registration** (RFC 7591)
//! - **Token exchange, refresh and revocation** (RFC 6749, RFC 7009)
//! - **Token storage**: [`MemoryTokenStorage`] and [`FileTokenStorage`]
//!
//! The [`OAuthClient`] is stateless apart from its HTTP pool. Everything
//! that must survive between calls lives behind an [`OAuthClientProvider`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcpwire_auth::{AuthOptions, AuthResult, MemoryTokenStorage, OAuthClient, StorageProvider};
//! use url::Url;
//!
//! # async fn run() -> mcpwire_auth::Result<()> {
//! let server = Url::parse("https://mcp.example.com/mcp")?;
//! let provider = StorageProvider::new(
//!     &server,
//!     Arc::new(MemoryTokenStorage::new()),
//!     "http://127.0.0.1:8976/callback",
//! );
//!
//! let client = OAuthClient::default();
//! if client.auth(&provider, &AuthOptions::new(server.clone())).await? == AuthResult::Redirect {
//!     // Send the user to provider.last_authorization_url(), then:
//!     let code = "code-from-redirect";
//!     client
//!         .auth(&provider, &AuthOptions::new(server).with_authorization_code(code))
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::unwrap_used)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod discovery;
pub mod error;
pub mod pkce;
pub mod provider;
pub mod storage;
pub mod types;

pub use client::{AuthOptions, AuthResult, OAuthClient, OAuthClientConfig, start_authorization};
pub use discovery::DiscoveredMetadata;
pub use error::{AuthError, OAuthErrorResponse, Result};
pub use pkce::PkceChallenge;
pub use provider::{CredentialScope, OAuthClientProvider, StorageProvider};
pub use storage::{FileTokenStorage, MemoryTokenStorage, StoredCredentials, TokenStorage};
pub use types::{
    AuthorizationServerMetadata, BearerChallenge, ClientAuthMethod, EXPIRY_BUFFER,
    OAuthClientInformation, OAuthClientMetadata, OAuthTokens, ProtectedResourceMetadata,
};
