// Access token cache
// One record per credential set, keyed by CredentialSet::partition_key

use anyhow::{Context, Result};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{CachedToken, CredentialSet};

const TOKEN_FILE_SUFFIX: &str = "token.file";

/// Storage for minted access tokens
///
/// A missing or unreadable record is never an error on load; it simply
/// forces a new login.
pub trait TokenCache: Send + Sync {
    /// Read the record for this credential set, `None` if absent or malformed
    fn load(&self, credentials: &CredentialSet) -> Option<CachedToken>;

    /// Replace the record for this credential set
    fn store(&self, credentials: &CredentialSet, token: &CachedToken) -> Result<()>;

    /// Check whether `token` is still usable at `now`
    fn is_valid(&self, token: &CachedToken, now: f64) -> bool {
        token.is_valid_at(now)
    }
}

/// Token cache persisted as `<partition>.token.file` in a directory
#[derive(Debug, Clone)]
pub struct FileTokenCache {
    dir: PathBuf,
}

impl FileTokenCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the record for a credential set
    pub fn path_for(&self, credentials: &CredentialSet) -> PathBuf {
        self.dir.join(format!(
            "{}.{}",
            credentials.partition_key(),
            TOKEN_FILE_SUFFIX
        ))
    }
}

impl TokenCache for FileTokenCache {
    fn load(&self, credentials: &CredentialSet) -> Option<CachedToken> {
        let path = self.path_for(credentials);
        let record = match std::fs::read_to_string(&path) {
            Ok(record) => record,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No cached token at {}", path.display());
                return None;
            }
            Err(e) => {
                tracing::warn!("Failed to read token cache {}: {}", path.display(), e);
                return None;
            }
        };

        let token = CachedToken::from_record(&record);
        if token.is_none() {
            tracing::warn!("Ignoring malformed token cache {}", path.display());
        }
        token
    }

    fn store(&self, credentials: &CredentialSet, token: &CachedToken) -> Result<()> {
        let path = self.path_for(credentials);
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory: {}", self.dir.display()))?;
        atomic_write(&path, token.to_record().as_bytes())
            .with_context(|| format!("Failed to write token cache: {}", path.display()))?;

        tracing::debug!("Cached token at {}", path.display());
        Ok(())
    }
}

/// Write to a sibling temp file, then rename over the target
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_file_name(format!(
        "{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(TOKEN_FILE_SUFFIX),
        Uuid::new_v4()
    ));

    std::fs::write(&temp_path, data)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    Ok(())
}

/// In-process token cache
/// Used when on-disk caching is disabled, and by tests
#[derive(Debug, Default, Clone)]
pub struct MemoryTokenCache {
    tokens: Arc<DashMap<String, CachedToken>>,
}

impl MemoryTokenCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenCache for MemoryTokenCache {
    fn load(&self, credentials: &CredentialSet) -> Option<CachedToken> {
        self.tokens
            .get(&credentials.partition_key())
            .map(|entry| entry.value().clone())
    }

    fn store(&self, credentials: &CredentialSet, token: &CachedToken) -> Result<()> {
        self.tokens
            .insert(credentials.partition_key(), token.clone());
        Ok(())
    }
}
