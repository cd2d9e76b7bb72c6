#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Snapshot documents: one scrape cycle's output for one pool.
//!
//! A [`Snapshot`] is assembled from a pool's [`LotInfo`] map and its live
//! [`LotData`] observations via [`SnapshotLot::merge`], serialized to the
//! JSON document exchanged with the storage layer, and validated back from
//! JSON with [`validation::validate_snapshot`].

pub mod validation;

use chrono::{DateTime, Utc};
use park_api_parking_models::{LotData, LotInfo, LotStatus, LotType, PoolInfo};
use serde::{Deserialize, Serialize};

pub use validation::{SchemaError, SchemaWarning, ValidationReport, validate_snapshot};

/// Pool section of a snapshot document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPool {
    /// Pool slug.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Public website of the operator.
    #[serde(default)]
    pub public_url: Option<String>,
    /// URL the data is scraped from.
    #[serde(default)]
    pub source_url: Option<String>,
    /// IANA timezone of the source.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Data license.
    #[serde(default)]
    pub attribution_license: Option<String>,
    /// Contributor to credit.
    #[serde(default)]
    pub attribution_contributor: Option<String>,
    /// Attribution link.
    #[serde(default)]
    pub attribution_url: Option<String>,
}

impl From<&PoolInfo> for SnapshotPool {
    fn from(pool: &PoolInfo) -> Self {
        Self {
            id: pool.id.clone(),
            name: pool.name.clone(),
            public_url: pool.public_url.clone(),
            source_url: pool.source_url.clone(),
            timezone: Some(pool.timezone.clone()),
            attribution_license: pool.attribution_license.clone(),
            attribution_contributor: pool.attribution_contributor.clone(),
            attribution_url: pool.attribution_url.clone(),
        }
    }
}

/// One merged lot record: static [`LotInfo`] fields overlaid with the
/// live [`LotData`] fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLot {
    /// Lot slug.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Kind of facility.
    #[serde(rename = "type")]
    pub lot_type: LotType,
    /// Observed status.
    pub status: LotStatus,
    /// Scrape time.
    pub timestamp: DateTime<Utc>,
    /// Source-published update time.
    #[serde(default)]
    pub lot_timestamp: Option<DateTime<Utc>>,
    /// Free spaces.
    #[serde(default)]
    pub num_free: Option<i64>,
    /// Occupied spaces.
    #[serde(default)]
    pub num_occupied: Option<i64>,
    /// Total spaces.
    #[serde(default)]
    pub capacity: Option<i64>,
    /// WGS84 latitude.
    #[serde(default)]
    pub latitude: Option<f64>,
    /// WGS84 longitude.
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Postal address.
    #[serde(default)]
    pub address: Option<String>,
    /// Public page of the lot.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Source page of the lot.
    #[serde(default)]
    pub source_url: Option<String>,
    /// Whether capacity is published live.
    pub has_live_capacity: bool,
}

impl SnapshotLot {
    /// Merges static metadata with one live observation.
    ///
    /// Fields present on both sides (`id`, `capacity`) take the observation's
    /// value when it is non-null. Without `info` the record is bare: the
    /// name is the lot id and the type is [`LotType::Unknown`].
    #[must_use]
    pub fn merge(info: Option<&LotInfo>, data: &LotData) -> Self {
        let mut lot = info.map_or_else(
            || Self {
                id: data.id().to_string(),
                name: data.id().to_string(),
                lot_type: LotType::Unknown,
                status: data.status(),
                timestamp: data.timestamp(),
                lot_timestamp: None,
                num_free: None,
                num_occupied: None,
                capacity: None,
                latitude: None,
                longitude: None,
                address: None,
                public_url: None,
                source_url: None,
                has_live_capacity: false,
            },
            |info| Self {
                id: info.id.clone(),
                name: info.name.clone(),
                lot_type: info.lot_type,
                status: data.status(),
                timestamp: data.timestamp(),
                lot_timestamp: None,
                num_free: None,
                num_occupied: None,
                capacity: info.capacity,
                latitude: info.latitude,
                longitude: info.longitude,
                address: info.address.clone(),
                public_url: info.public_url.clone(),
                source_url: info.source_url.clone(),
                has_live_capacity: info.has_live_capacity,
            },
        );

        data.id().clone_into(&mut lot.id);
        lot.lot_timestamp = data.lot_timestamp();
        lot.num_free = data.num_free();
        lot.num_occupied = data.num_occupied();
        if data.capacity().is_some() {
            lot.capacity = data.capacity();
        }
        lot
    }
}

/// One pool's scrape cycle.
///
/// `error` is set iff the whole scrape failed, in which case `lots` is
/// empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The pool the lots belong to.
    pub pool: SnapshotPool,
    /// Merged lot records.
    pub lots: Vec<SnapshotLot>,
    /// Failure message of a failed scrape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Snapshot {
    /// Creates a successful snapshot.
    #[must_use]
    pub fn new(pool: &PoolInfo, lots: Vec<SnapshotLot>) -> Self {
        Self {
            pool: SnapshotPool::from(pool),
            lots,
            error: None,
        }
    }

    /// Creates the snapshot of a failed scrape.
    #[must_use]
    pub fn failed(pool: &PoolInfo, error: impl Into<String>) -> Self {
        Self {
            pool: SnapshotPool::from(pool),
            lots: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Renders the snapshot as a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if serialization fails.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Good-practice findings that do not make the snapshot invalid.
    #[must_use]
    pub fn warnings(&self) -> Vec<SchemaWarning> {
        validation::good_practice_warnings(self)
    }
}
