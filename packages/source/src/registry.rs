//! Registry of the built-in sources.
//!
//! Every source module contributes one constructor to [`all_sources`].
//! [`Registry::new`] checks pool ids once at startup, so a second source
//! claiming an existing pool id fails before anything is scraped.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ParkingSource;
use crate::sources::{aarhus, apag, bahn, dresden, ffh, frankfurt};

/// Shared handle to a source.
pub type SourceRef = Arc<dyn ParkingSource>;

/// Errors building or querying a [`Registry`].
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two sources declare the same pool id.
    #[error("Duplicate pool id '{pool_id}'")]
    DuplicatePoolId {
        /// The duplicated pool id.
        pool_id: String,
    },

    /// A requested pool id matches no registered source.
    #[error("Unknown pool id '{pool_id}'")]
    UnknownPoolId {
        /// The requested pool id.
        pool_id: String,
    },
}

/// Instantiates every built-in source.
///
/// The Deutsche Bahn source needs an API token and is left out (with a
/// warning) when [`bahn::TOKEN_ENV`] is not set.
#[must_use]
pub fn all_sources() -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = vec![
        Arc::new(aarhus::AarhusSource::new()),
        Arc::new(apag::ApagSource::new()),
        Arc::new(dresden::DresdenSource::new()),
        Arc::new(ffh::FfhSource::new()),
        Arc::new(frankfurt::FrankfurtSource::new()),
    ];

    match bahn::BahnSource::from_env() {
        Some(source) => sources.push(Arc::new(source)),
        None => log::warn!(
            "Deutsche Bahn parking API disabled: set {} to enable it",
            bahn::TOKEN_ENV
        ),
    }

    sources
}

/// Sources keyed by pool id.
pub struct Registry {
    sources: BTreeMap<String, SourceRef>,
}

impl Registry {
    /// Registers `sources`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicatePoolId`] if two sources share a
    /// pool id.
    pub fn new(sources: impl IntoIterator<Item = SourceRef>) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for source in sources {
            let pool_id = source.pool_info().id.clone();
            if map.contains_key(&pool_id) {
                return Err(RegistryError::DuplicatePoolId { pool_id });
            }
            map.insert(pool_id, source);
        }
        Ok(Self { sources: map })
    }

    /// Registry of all built-in sources.
    ///
    /// # Errors
    ///
    /// See [`Registry::new`].
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new(all_sources())
    }

    /// Sorted pool ids.
    #[must_use]
    pub fn pool_ids(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    /// Source of pool `pool_id`.
    #[must_use]
    pub fn get(&self, pool_id: &str) -> Option<&SourceRef> {
        self.sources.get(pool_id)
    }

    /// Number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no source is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sources sorted by pool id, restricted to `allow` unless it is empty.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownPoolId`] if an allowed id matches no
    /// source.
    pub fn select(&self, allow: &[String]) -> Result<Vec<SourceRef>, RegistryError> {
        if allow.is_empty() {
            return Ok(self.sources.values().cloned().collect());
        }

        for pool_id in allow {
            if !self.sources.contains_key(pool_id) {
                return Err(RegistryError::UnknownPoolId {
                    pool_id: pool_id.clone(),
                });
            }
        }

        Ok(self
            .sources
            .iter()
            .filter(|(id, _)| allow.contains(id))
            .map(|(_, source)| Arc::clone(source))
            .collect())
    }
}
