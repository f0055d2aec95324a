//! Pluggable persistence for OAuth credentials.
//!
//! Credentials are keyed by the MCP server URL they were issued for, so a
//! single store can serve several servers. Two backends ship with the crate:
//!
//! - [`MemoryTokenStorage`]: process-local, lost on exit
//! - [`FileTokenStorage`]: one JSON document on disk, written atomically

use crate::error::{AuthError, Result};
use crate::types::{OAuthClientInformation, OAuthTokens};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Everything persisted for one server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    /// Client registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_information: Option<OAuthClientInformation>,
    /// Current tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<OAuthTokens>,
    /// PKCE verifier of the authorization in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    /// `state` sent with the authorization in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl StoredCredentials {
    /// Whether nothing is stored.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.client_information.is_none()
            && self.tokens.is_none()
            && self.code_verifier.is_none()
            && self.state.is_none()
    }
}

/// Storage backend for OAuth credentials.
#[async_trait]
pub trait TokenStorage: Send + Sync + std::fmt::Debug {
    /// Load the credentials stored for `key`.
    async fn load(&self, key: &str) -> Result<Option<StoredCredentials>>;

    /// Replace the credentials stored for `key`.
    async fn store(&self, key: &str, credentials: &StoredCredentials) -> Result<()>;

    /// Remove everything stored for `key`.
    async fn remove(&self, key: &str) -> Result<()>;
}

// ============================================================================
// MemoryTokenStorage
// ============================================================================

/// In-memory storage. Credentials live as long as the value.
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    entries: RwLock<HashMap<String, StoredCredentials>>,
}

impl MemoryTokenStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn load(&self, key: &str) -> Result<Option<StoredCredentials>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(&self, key: &str, credentials: &StoredCredentials) -> Result<()> {
        let mut entries = self.entries.write().await;
        if credentials.is_empty() {
            entries.remove(key);
        } else {
            entries.insert(key.to_string(), credentials.clone());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

// ============================================================================
// FileTokenStorage
// ============================================================================

/// File-based storage.
///
/// All servers share one JSON file mapping server URL to credentials.
/// Writes go to a sibling temporary file that is renamed over the target,
/// and on Unix the file is created with mode `0600`.
#[derive(Debug)]
pub struct FileTokenStorage {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileTokenStorage {
    /// Store credentials at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<HashMap<String, StoredCredentials>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(HashMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                AuthError::Storage(format!(
                    "Failed to parse token file {}: {e}",
                    self.path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, entries: &HashMap<String, StoredCredentials>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(entries)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), "token file written");
        Ok(())
    }
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    async fn load(&self, key: &str) -> Result<Option<StoredCredentials>> {
        let _guard = self.lock.read().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn store(&self, key: &str, credentials: &StoredCredentials) -> Result<()> {
        let _guard = self.lock.write().await;
        let mut entries = self.read_all().await?;
        if credentials.is_empty() {
            entries.remove(key);
        } else {
            entries.insert(key.to_string(), credentials.clone());
        }
        self.write_all(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        let mut entries = self.read_all().await?;
        if entries.remove(key).is_some() {
            self.write_all(&entries).await?;
        }
        Ok(())
    }
}
