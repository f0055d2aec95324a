//! Authorization server (RFC 8414) and protected resource (RFC 9728)
//! metadata discovery.

use crate::client::OAuthClientConfig;
use crate::error::{AuthError, Result};
use crate::types::{AuthorizationServerMetadata, ProtectedResourceMetadata};
use serde::de::DeserializeOwned;
use url::Url;

const OAUTH_AUTHORIZATION_SERVER: &str = "/.well-known/oauth-authorization-server";
const OPENID_CONFIGURATION: &str = "/.well-known/openid-configuration";
const OAUTH_PROTECTED_RESOURCE: &str = "/.well-known/oauth-protected-resource";

/// What discovery found for one MCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredMetadata {
    /// The authorization server that issues tokens for the MCP server.
    pub authorization_server: Url,
    /// Its metadata, or `None` when it publishes none.
    pub authorization_server_metadata: Option<AuthorizationServerMetadata>,
    /// Protected resource metadata, when the MCP server publishes it.
    pub resource_metadata: Option<ProtectedResourceMetadata>,
}

impl DiscoveredMetadata {
    /// Server metadata, falling back to conventional endpoints under the
    /// authorization server's origin.
    #[must_use]
    pub fn metadata_or_default(&self) -> AuthorizationServerMetadata {
        self.authorization_server_metadata
            .clone()
            .unwrap_or_else(|| AuthorizationServerMetadata::from_issuer(&self.authorization_server))
    }
}

fn url_path(url: &Url) -> &str {
    url.path().trim_end_matches('/')
}

fn with_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// Candidate URLs for authorization server metadata, in probe order.
///
/// For an issuer with a path component the path-scoped OAuth document comes
/// first, then the root-scoped one, then the OpenID Connect variants (path
/// inserted, path appended, root).
#[must_use]
pub fn authorization_server_metadata_urls(issuer: &Url) -> Vec<Url> {
    let path = url_path(issuer);
    if path.is_empty() {
        return vec![
            with_path(issuer, OAUTH_AUTHORIZATION_SERVER),
            with_path(issuer, OPENID_CONFIGURATION),
        ];
    }
    vec![
        with_path(issuer, &format!("{OAUTH_AUTHORIZATION_SERVER}{path}")),
        with_path(issuer, OAUTH_AUTHORIZATION_SERVER),
        with_path(issuer, &format!("{OPENID_CONFIGURATION}{path}")),
        with_path(issuer, &format!("{path}{OPENID_CONFIGURATION}")),
        with_path(issuer, OPENID_CONFIGURATION),
    ]
}

/// Candidate URLs for protected resource metadata: path-scoped, then root.
#[must_use]
pub fn protected_resource_metadata_urls(server_url: &Url) -> Vec<Url> {
    let path = url_path(server_url);
    let root = with_path(server_url, OAUTH_PROTECTED_RESOURCE);
    if path.is_empty() {
        return vec![root];
    }
    vec![
        with_path(server_url, &format!("{OAUTH_PROTECTED_RESOURCE}{path}")),
        root,
    ]
}

/// Fetch a metadata document.
///
/// `Ok(None)` means "not here, try the next candidate" (any 4xx).
/// Server errors, timeouts and transport failures abort discovery.
async fn fetch_metadata<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &Url,
    config: &OAuthClientConfig,
) -> Result<Option<T>> {
    let response = http
        .get(url.clone())
        .header(reqwest::header::ACCEPT, "application/json")
        .header("mcp-protocol-version", config.protocol_version.as_str())
        .timeout(config.request_timeout)
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        let body = response.bytes().await?;
        return serde_json::from_slice(&body).map(Some).map_err(|e| {
            AuthError::Discovery(format!("invalid metadata document at {url}: {e}"))
        });
    }
    if status.is_client_error() {
        tracing::trace!(%url, status = status.as_u16(), "metadata not found");
        return Ok(None);
    }
    Err(AuthError::Http {
        endpoint: url.to_string(),
        status: status.as_u16(),
        body: response.text().await.unwrap_or_default(),
    })
}

/// Probe the authorization server metadata locations for `issuer`.
pub async fn discover_authorization_server_metadata(
    http: &reqwest::Client,
    issuer: &Url,
    config: &OAuthClientConfig,
) -> Result<Option<AuthorizationServerMetadata>> {
    for url in authorization_server_metadata_urls(issuer) {
        if let Some(metadata) = fetch_metadata(http, &url, config).await? {
            tracing::debug!(%url, "discovered authorization server metadata");
            return Ok(Some(metadata));
        }
    }
    tracing::debug!(%issuer, "no authorization server metadata published");
    Ok(None)
}

/// Fetch protected resource metadata for an MCP server.
///
/// An explicit `resource_metadata_url` (from a `WWW-Authenticate`
/// challenge) is the only location tried when given.
pub async fn discover_protected_resource_metadata(
    http: &reqwest::Client,
    server_url: &Url,
    resource_metadata_url: Option<&Url>,
    config: &OAuthClientConfig,
) -> Result<ProtectedResourceMetadata> {
    let candidates = match resource_metadata_url {
        Some(url) => vec![url.clone()],
        None => protected_resource_metadata_urls(server_url),
    };
    for url in &candidates {
        if let Some(metadata) = fetch_metadata(http, url, config).await? {
            tracing::debug!(%url, "discovered protected resource metadata");
            return Ok(metadata);
        }
    }
    Err(AuthError::Discovery(format!(
        "no protected resource metadata for {server_url}"
    )))
}

/// Run full discovery for an MCP server.
///
/// Protected resource metadata is optional: when it is missing the MCP
/// server's own origin is assumed to be the authorization server.
pub async fn discover(
    http: &reqwest::Client,
    server_url: &Url,
    resource_metadata_url: Option<&Url>,
    config: &OAuthClientConfig,
) -> Result<DiscoveredMetadata> {
    let resource_metadata = match discover_protected_resource_metadata(
        http,
        server_url,
        resource_metadata_url,
        config,
    )
    .await
    {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            tracing::debug!(error = %e, "protected resource metadata unavailable");
            None
        }
    };

    let authorization_server = match resource_metadata
        .as_ref()
        .and_then(|m| m.authorization_servers.first())
    {
        Some(server) => Url::parse(server)?,
        None => with_path(server_url, "/"),
    };

    let authorization_server_metadata =
        discover_authorization_server_metadata(http, &authorization_server, config)
            .await?;

    Ok(DiscoveredMetadata {
        authorization_server,
        authorization_server_metadata,
        resource_metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strings(urls: Vec<Url>) -> Vec<String> {
        urls.into_iter().map(String::from).collect()
    }

    #[test]
    fn test_root_issuer_candidates() {
        let issuer = Url::parse("https://auth.example.com").unwrap();
        assert_eq!(
            strings(authorization_server_metadata_urls(&issuer)),
            vec![
                "https://auth.example.com/.well-known/oauth-authorization-server",
                "https://auth.example.com/.well-known/openid-configuration",
            ]
        );
    }

    #[test]
    fn test_path_issuer_candidates() {
        let issuer = Url::parse("https://auth.example.com/tenant1/").unwrap();
        assert_eq!(
            strings(authorization_server_metadata_urls(&issuer)),
            vec![
                "https://auth.example.com/.well-known/oauth-authorization-server/tenant1",
                "https://auth.example.com/.well-known/oauth-authorization-server",
                "https://auth.example.com/.well-known/openid-configuration/tenant1",
                "https://auth.example.com/tenant1/.well-known/openid-configuration",
                "https://auth.example.com/.well-known/openid-configuration",
            ]
        );
    }

    #[test]
    fn test_protected_resource_candidates() {
        let server = Url::parse("https://mcp.example.com/v1/mcp?x=1").unwrap();
        assert_eq!(
            strings(protected_resource_metadata_urls(&server)),
            vec![
                "https://mcp.example.com/.well-known/oauth-protected-resource/v1/mcp",
                "https://mcp.example.com/.well-known/oauth-protected-resource",
            ]
        );
    }
}
