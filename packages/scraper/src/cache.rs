//! Content-addressed response cache for offline scraper development.
//!
//! Responses are stored as JSON files at
//! `{cache_dir}/{pool_id}/{md5(method url params)}.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::FetchError;

/// Which direction the response cache is used in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, AsRefStr)]
pub enum CacheMode {
    /// No caching.
    #[default]
    #[strum(serialize = "false")]
    Disabled,
    /// Serve from cache when present, store fresh responses.
    #[strum(serialize = "true")]
    ReadWrite,
    /// Serve from cache when present, never store.
    #[strum(serialize = "read")]
    ReadOnly,
    /// Always fetch, store fresh responses.
    #[strum(serialize = "write")]
    WriteOnly,
}

impl CacheMode {
    /// Whether cached responses are served.
    #[must_use]
    pub const fn reads(self) -> bool {
        matches!(self, Self::ReadWrite | Self::ReadOnly)
    }

    /// Whether fresh responses are stored.
    #[must_use]
    pub const fn writes(self) -> bool {
        matches!(self, Self::ReadWrite | Self::WriteOnly)
    }
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    /// Response body.
    pub body: String,
}

/// File cache rooted at one pool's cache directory.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    mode: CacheMode,
}

impl ResponseCache {
    /// Creates a cache for `pool_id` under `cache_dir`.
    #[must_use]
    pub fn new(cache_dir: &Path, pool_id: &str, mode: CacheMode) -> Self {
        Self {
            dir: cache_dir.join(pool_id),
            mode,
        }
    }

    /// The configured mode.
    #[must_use]
    pub const fn mode(&self) -> CacheMode {
        self.mode
    }

    /// File path for a request key.
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = md5::compute(key.as_bytes());
        self.dir.join(format!("{digest:x}.json"))
    }

    /// Loads a cached response, if reading is enabled and one exists.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cache`] if the file exists but cannot be read
    /// or parsed.
    pub async fn load(&self, key: &str) -> Result<Option<CachedResponse>, FetchError> {
        if !self.mode.reads() {
            return Ok(None);
        }

        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(FetchError::Cache {
                    path,
                    message: e.to_string(),
                });
            }
        };

        log::debug!("loading cache {}", path.display());
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| FetchError::Cache {
                path,
                message: e.to_string(),
            })
    }

    /// Stores a response, if writing is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cache`] if the file cannot be written.
    pub async fn store(&self, key: &str, response: &CachedResponse) -> Result<(), FetchError> {
        if !self.mode.writes() {
            return Ok(());
        }

        let path = self.path_for(key);
        let to_cache_error = |message: String| FetchError::Cache {
            path: path.clone(),
            message,
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| to_cache_error(e.to_string()))?;
        let bytes = serde_json::to_vec(response).map_err(|e| to_cache_error(e.to_string()))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| to_cache_error(e.to_string()))?;

        log::debug!("writing cache to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> CachedResponse {
        CachedResponse {
            status: 200,
            url: "https://example.org/".to_string(),
            body: "<html></html>".to_string(),
        }
    }

    #[test]
    fn parses_cli_tokens() {
        assert_eq!("true".parse::<CacheMode>().unwrap(), CacheMode::ReadWrite);
        assert_eq!("false".parse::<CacheMode>().unwrap(), CacheMode::Disabled);
        assert_eq!("read".parse::<CacheMode>().unwrap(), CacheMode::ReadOnly);
        assert_eq!("write".parse::<CacheMode>().unwrap(), CacheMode::WriteOnly);
        assert!("sometimes".parse::<CacheMode>().is_err());
    }

    #[test]
    fn keys_are_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path(), "apag", CacheMode::ReadWrite);
        assert_eq!(cache.path_for("GET a"), cache.path_for("GET a"));
        assert_ne!(cache.path_for("GET a"), cache.path_for("GET b"));
        assert!(cache.path_for("GET a").starts_with(dir.path().join("apag")));
    }

    #[tokio::test]
    async fn read_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path(), "apag", CacheMode::ReadWrite);
        assert_eq!(cache.load("GET x").await.unwrap(), None);
        cache.store("GET x", &response()).await.unwrap();
        assert_eq!(cache.load("GET x").await.unwrap(), Some(response()));
    }

    #[tokio::test]
    async fn modes_restrict_direction() {
        let dir = tempfile::tempdir().unwrap();
        let write_only = ResponseCache::new(dir.path(), "apag", CacheMode::WriteOnly);
        write_only.store("GET x", &response()).await.unwrap();
        assert_eq!(write_only.load("GET x").await.unwrap(), None);

        let read_only = ResponseCache::new(dir.path(), "apag", CacheMode::ReadOnly);
        assert_eq!(read_only.load("GET x").await.unwrap(), Some(response()));
        read_only.store("GET y", &response()).await.unwrap();
        assert!(!read_only.path_for("GET y").exists());
    }
}
