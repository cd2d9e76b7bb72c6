//! Batch configuration: TOML file, then environment overrides.
//!
//! Every field has a default, so an empty (or absent) file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use park_api_scraper::{CacheMode, DEFAULT_REQUESTS_PER_SECOND, DEFAULT_TIMEOUT, FetchConfig};
use serde::{Deserialize, Serialize};

/// Overrides [`IngestConfig::database_path`].
pub const DATABASE_ENV: &str = "PARK_API_DATABASE";
/// Overrides [`IngestConfig::cache_dir`].
pub const CACHE_DIR_ENV: &str = "PARK_API_CACHE_DIR";
/// Comma-separated pool allow-list, overrides [`IngestConfig::pools`].
pub const POOLS_ENV: &str = "PARK_API_POOLS";

/// Errors loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`IngestConfig`].
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// Settings of a batch scrape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// `DuckDB` file the snapshots are stored in.
    pub database_path: PathBuf,
    /// Root of the response cache.
    pub cache_dir: PathBuf,
    /// Request rate per pool.
    pub requests_per_second: f64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// `User-Agent` header.
    pub user_agent: String,
    /// Pools to scrape; empty means all.
    pub pools: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let fetch = FetchConfig::default();
        Self {
            database_path: park_api_database::paths::default_db_path(),
            cache_dir: fetch.cache_dir,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            user_agent: fetch.user_agent,
            pools: Vec::new(),
        }
    }
}

/// Splits a comma-separated list, dropping blanks.
#[must_use]
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl IngestConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`toml::de::Error`] if the document is malformed or has
    /// unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Loads the config file (if given) and applies the environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                let config = Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
                log::debug!("loaded config from {}", path.display());
                config
            }
            None => Self::default(),
        };

        Ok(config.with_env(|key| std::env::var(key).ok()))
    }

    /// Applies [`DATABASE_ENV`], [`CACHE_DIR_ENV`] and [`POOLS_ENV`] as
    /// returned by `lookup`. Empty values are ignored.
    #[must_use]
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(path) = lookup(DATABASE_ENV) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup(CACHE_DIR_ENV) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(pools) = lookup(POOLS_ENV) {
            self.pools = split_list(&pools);
        }
        self
    }

    /// Fetch settings for the batch.
    #[must_use]
    pub fn fetch_config(&self, cache_mode: CacheMode) -> FetchConfig {
        FetchConfig {
            user_agent: self.user_agent.clone(),
            requests_per_second: self.requests_per_second,
            timeout: Duration::from_secs(self.timeout_secs),
            cache_dir: self.cache_dir.clone(),
            cache_mode,
            headers: std::collections::BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        assert_eq!(IngestConfig::from_toml_str("").unwrap(), IngestConfig::default());
    }

    #[test]
    fn parses_partial_document() {
        let config = IngestConfig::from_toml_str(
            r#"
            database_path = "/var/lib/park_api/park_api.duckdb"
            requests_per_second = 0.5
            pools = ["apag", "dresden"]
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/var/lib/park_api/park_api.duckdb"));
        assert!((config.requests_per_second - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.pools, ["apag", "dresden"]);
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(IngestConfig::from_toml_str("databse_path = \"x\"").is_err());
    }

    #[test]
    fn environment_overrides_file() {
        let config = IngestConfig::from_toml_str("pools = [\"apag\"]")
            .unwrap()
            .with_env(|key| match key {
                DATABASE_ENV => Some("/tmp/park.duckdb".to_string()),
                POOLS_ENV => Some(" dresden, ffh ,".to_string()),
                CACHE_DIR_ENV => Some(String::new()),
                _ => None,
            });

        assert_eq!(config.database_path, PathBuf::from("/tmp/park.duckdb"));
        assert_eq!(config.pools, ["dresden", "ffh"]);
        assert_eq!(config.cache_dir, IngestConfig::default().cache_dir);
    }

    #[test]
    fn loads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("park_api.toml");
        std::fs::write(&path, "timeout_secs = 10\n").unwrap();

        let config = IngestConfig::load(Some(&path)).unwrap();
        assert_eq!(config.fetch_config(CacheMode::Disabled).timeout, Duration::from_secs(10));

        let missing = IngestConfig::load(Some(&dir.path().join("missing.toml")));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
