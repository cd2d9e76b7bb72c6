#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Parking data sources and snapshot assembly.
//!
//! Each provider implements the [`ParkingSource`] capability trait: it owns
//! exactly one [`PoolInfo`], produces live [`LotData`] through the shared
//! [`Fetcher`], and optionally provides static [`LotInfo`] metadata either
//! by scraping it or from an embedded GeoJSON geo-index.
//!
//! The [`registry`] lists all built-in sources, [`snapshot`] merges info and
//! data into a [`Snapshot`](park_api_snapshot_models::Snapshot).

pub mod geojson;
pub mod html;
pub mod parsing;
pub mod progress;
pub mod registry;
pub mod snapshot;
pub mod sources;
pub mod xml;

use std::collections::BTreeMap;

use async_trait::async_trait;
use park_api_parking_models::{LotData, LotInfo, PoolInfo, ValidationError};
use park_api_scraper::{FetchConfig, FetchError, Fetcher};

/// Errors that can occur while scraping a pool.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Network, status or decode failure.
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// A value object rejected the extracted values.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Provider markup did not match the expected structure.
    #[error("Extraction failed: {message}")]
    Extraction {
        /// What was expected and not found.
        message: String,
    },

    /// The embedded geo-index is malformed.
    #[error("Invalid static lot infos: {message}")]
    StaticInfo {
        /// What is wrong with it.
        message: String,
    },

    /// Two lot infos of one pool share an id.
    #[error("Duplicate LotInfo id '{lot_id}' in pool '{pool_id}'")]
    DuplicateLotInfo {
        /// Pool slug.
        pool_id: String,
        /// Duplicated lot slug.
        lot_id: String,
    },

    /// A lot was reported twice in one scrape.
    #[error("Duplicate LotData id '{lot_id}' in pool '{pool_id}'")]
    DuplicateLotData {
        /// Pool slug.
        pool_id: String,
        /// Duplicated lot slug.
        lot_id: String,
    },

    /// Lot infos are required but a reported lot has none.
    #[error("No LotInfo for lot '{lot_id}' in pool '{pool_id}'")]
    MissingLotInfo {
        /// Pool slug.
        pool_id: String,
        /// Lot slug without info.
        lot_id: String,
    },

    /// Lot infos are required but the source provides none.
    #[error("Pool '{pool_id}' provides neither lot infos nor a static geo-index")]
    InfoNotImplemented {
        /// Pool slug.
        pool_id: String,
    },
}

impl SourceError {
    /// Creates an [`SourceError::Extraction`].
    #[must_use]
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
        }
    }

    /// Stable name of the error kind, used in failure records.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "FetchError",
            Self::Validation(_) => "ValidationError",
            Self::Extraction { .. } => "ExtractionError",
            Self::StaticInfo { .. } => "StaticInfoError",
            Self::DuplicateLotInfo { .. } => "DuplicateLotInfoError",
            Self::DuplicateLotData { .. } => "DuplicateLotDataError",
            Self::MissingLotInfo { .. } => "MissingLotInfoError",
            Self::InfoNotImplemented { .. } => "InfoNotImplementedError",
        }
    }
}

/// Capability set of one parking data provider.
///
/// Implementations are stateless per invocation; all I/O goes through the
/// [`Fetcher`] handed in by the caller.
#[async_trait]
pub trait ParkingSource: Send + Sync {
    /// The pool this source provides.
    fn pool_info(&self) -> &PoolInfo;

    /// Fetches and parses the live observations.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if fetching or extraction fails.
    async fn get_lot_data(&self, fetcher: &Fetcher) -> Result<Vec<LotData>, SourceError>;

    /// Fetches and parses static lot metadata. `Ok(None)` means the source
    /// does not scrape metadata.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if fetching or extraction fails.
    async fn get_lot_infos(&self, _fetcher: &Fetcher) -> Result<Option<Vec<LotInfo>>, SourceError> {
        Ok(None)
    }

    /// Embedded GeoJSON geo-index of the lots, if any. Takes precedence over
    /// [`ParkingSource::get_lot_infos`].
    fn static_lot_infos(&self) -> Option<&'static str> {
        None
    }

    /// Extra headers sent with every request of this source.
    fn headers(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Overrides the configured request rate for this source.
    fn requests_per_second(&self) -> Option<f64> {
        None
    }
}

/// Creates the fetcher for one scrape of `source`, applying its header and
/// rate overrides on top of `config`.
///
/// # Errors
///
/// Returns [`FetchError`] if the HTTP client cannot be built.
pub fn fetcher_for(source: &dyn ParkingSource, config: &FetchConfig) -> Result<Fetcher, FetchError> {
    let mut config = config.clone();
    config.headers.extend(source.headers());
    if let Some(rate) = source.requests_per_second() {
        config.requests_per_second = rate;
    }
    Fetcher::new(&source.pool_info().id, &config)
}
