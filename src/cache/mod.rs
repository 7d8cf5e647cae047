//! In-memory and persisted token cache.
//!
//! The persisted record is a single JSON object (token set fields plus a
//! capture timestamp). Persistence problems degrade to a cache miss; they
//! are never fatal.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::auth::tokens::{CachedTokenRecord, TokenSet};

pub struct TokenCache {
    path: Option<PathBuf>,
    record: Option<CachedTokenRecord>,
}

impl TokenCache {
    /// `path = None` keeps the cache memory-only.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path, record: None }
    }

    /// Current tokens, only while the decoded access-token expiry is
    /// strictly in the future. A stale in-memory record is reported absent
    /// but not deleted from disk.
    pub fn get(&self) -> Option<TokenSet> {
        let record = self.record.as_ref()?;
        if record.tokens.is_valid() {
            Some(record.tokens.clone())
        } else {
            debug!("cached token is no longer valid");
            None
        }
    }

    /// Replace the in-memory record and persist it. Persistence errors are
    /// returned for the caller to log; the in-memory record is installed
    /// either way.
    pub fn put(&mut self, tokens: TokenSet) -> Result<()> {
        let record = CachedTokenRecord::new(tokens);
        let result = match &self.path {
            Some(path) => persist(path, &record),
            None => Ok(()),
        };
        self.record = Some(record);
        result
    }

    /// Restore the persisted record if it exists and still holds a valid
    /// token. Decode failures and expired tokens mean "no cache".
    pub fn load(&mut self) -> Option<TokenSet> {
        let path = self.path.as_ref()?;
        if !path.exists() {
            return None;
        }

        let record: CachedTokenRecord = match fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|content| serde_json::from_str(&content).map_err(Into::into))
        {
            Ok(record) => record,
            Err(err) => {
                debug!("ignoring unreadable token cache: {err:#}");
                return None;
            }
        };

        if !record.tokens.is_valid() {
            debug!("persisted token is expired; ignoring cache");
            return None;
        }

        let tokens = record.tokens.clone();
        self.record = Some(record);
        debug!("token cache restored from disk");
        Some(tokens)
    }

    /// Drop the in-memory record and delete the persisted file. Deletion
    /// errors are logged, not fatal.
    pub fn clear(&mut self) {
        self.record = None;
        if let Some(path) = &self.path {
            if path.exists() {
                if let Err(err) = fs::remove_file(path) {
                    warn!("failed to delete token cache {}: {err}", path.display());
                }
            }
        }
    }
}

/// Atomic write: serialize next to the target, then rename over it.
fn persist(path: &Path, record: &CachedTokenRecord) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).context("failed to create token cache directory")?;
    }

    let content = serde_json::to_string_pretty(record).context("failed to serialize tokens")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).context("failed to write token cache")?;

    // The file carries tokens; keep it owner-readable only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(&tmp, perms).context("failed to set token cache permissions")?;
    }

    fs::rename(&tmp, path).context("failed to replace token cache")?;
    Ok(())
}
