#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Database row types.
//!
//! These types represent the shapes of data as stored in and retrieved from
//! the `DuckDB` database. They are distinct from the scrape-side value
//! objects in `park_api_parking_models` and the exchanged documents in
//! `park_api_snapshot_models`.

use chrono::{DateTime, SubsecRound as _, Utc};
use park_api_parking_models::{Counts, LotStatus, LotType, ValidationError};
use park_api_snapshot_models::{SnapshotLot, SnapshotPool};
use serde::{Deserialize, Serialize};

/// A stored pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkingPoolRow {
    /// Pool slug (primary key).
    pub pool_id: String,
    /// Human-readable name.
    pub name: String,
    /// Public website of the operator.
    pub public_url: Option<String>,
    /// URL the data is scraped from.
    pub source_url: Option<String>,
    /// IANA timezone of the source.
    pub timezone: Option<String>,
    /// Data license.
    pub attribution_license: Option<String>,
    /// Contributor to credit.
    pub attribution_contributor: Option<String>,
    /// Attribution link.
    pub attribution_url: Option<String>,
    /// First time the pool was stored.
    pub date_created: DateTime<Utc>,
    /// Last time a field changed.
    pub date_updated: DateTime<Utc>,
}

impl ParkingPoolRow {
    /// New row for a pool first seen at `now`.
    #[must_use]
    pub fn from_snapshot(pool: &SnapshotPool, now: DateTime<Utc>) -> Self {
        Self {
            pool_id: pool.id.clone(),
            name: pool.name.clone(),
            public_url: pool.public_url.clone(),
            source_url: pool.source_url.clone(),
            timezone: pool.timezone.clone(),
            attribution_license: pool.attribution_license.clone(),
            attribution_contributor: pool.attribution_contributor.clone(),
            attribution_url: pool.attribution_url.clone(),
            date_created: now,
            date_updated: now,
        }
    }
}

/// A stored lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingLotRow {
    /// Lot slug (primary key).
    pub lot_id: String,
    /// Owning pool.
    pub pool_id: String,
    /// Human-readable name.
    pub name: String,
    /// Kind of facility.
    pub lot_type: LotType,
    /// Public page of the lot.
    pub public_url: Option<String>,
    /// Source page of the lot.
    pub source_url: Option<String>,
    /// Postal address.
    pub address: Option<String>,
    /// Last known capacity.
    pub capacity: Option<i64>,
    /// Largest capacity ever observed. Never decreases.
    pub max_capacity: Option<i64>,
    /// Whether capacity is published live.
    pub has_live_capacity: bool,
    /// WGS84 latitude.
    pub latitude: Option<f64>,
    /// WGS84 longitude.
    pub longitude: Option<f64>,
    /// Opaque id assigned by a location resolver.
    pub location_id: Option<String>,
    /// City assigned by a location resolver.
    pub city_name: Option<String>,
    /// First time the lot was stored.
    pub date_created: DateTime<Utc>,
    /// Last time a field changed.
    pub date_updated: DateTime<Utc>,
}

impl ParkingLotRow {
    /// New row for a lot of `pool_id` first seen at `now`.
    #[must_use]
    pub fn from_snapshot(pool_id: &str, lot: &SnapshotLot, now: DateTime<Utc>) -> Self {
        Self {
            lot_id: lot.id.clone(),
            pool_id: pool_id.to_string(),
            name: lot.name.clone(),
            lot_type: lot.lot_type,
            public_url: lot.public_url.clone(),
            source_url: lot.source_url.clone(),
            address: lot.address.clone(),
            capacity: lot.capacity,
            max_capacity: lot.capacity,
            has_live_capacity: lot.has_live_capacity,
            latitude: lot.latitude,
            longitude: lot.longitude,
            location_id: None,
            city_name: None,
            date_created: now,
            date_updated: now,
        }
    }
}

/// Running maximum where `None` does not participate.
#[must_use]
pub fn max_capacity(current: Option<i64>, incoming: Option<i64>) -> Option<i64> {
    match (current, incoming) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// One observation of a lot. Stored append-only in `parking_data` and
/// overwritten in place in `latest_parking_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingDataRow {
    /// Observed lot.
    pub lot_id: String,
    /// Scrape time.
    pub timestamp: DateTime<Utc>,
    /// Source-published update time.
    pub lot_timestamp: Option<DateTime<Utc>>,
    /// Observed status.
    pub status: LotStatus,
    /// Free spaces.
    pub num_free: Option<i64>,
    /// Occupied spaces.
    pub num_occupied: Option<i64>,
    /// Total spaces.
    pub capacity: Option<i64>,
    /// `num_free` as a percentage of `capacity`, two decimals.
    pub percent_free: Option<f64>,
}

impl ParkingDataRow {
    /// Builds the observation row of a snapshot lot, re-validating its
    /// counts. Timestamps are truncated to microseconds, the precision
    /// they are stored with.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InconsistentCounts`] if free, occupied and
    /// capacity do not add up.
    pub fn from_snapshot(lot: &SnapshotLot) -> Result<Self, ValidationError> {
        let counts = Counts::new(lot.num_free, lot.num_occupied, lot.capacity).reconcile(&lot.id)?;
        Ok(Self {
            lot_id: lot.id.clone(),
            timestamp: lot.timestamp.trunc_subsecs(6),
            lot_timestamp: lot.lot_timestamp.map(|ts| ts.trunc_subsecs(6)),
            status: lot.status,
            num_free: counts.num_free,
            num_occupied: counts.num_occupied,
            capacity: counts.capacity,
            percent_free: counts.percent_free(),
        })
    }
}

/// One recorded scrape failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogRow {
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
    /// Component that failed (`pool` for scrape failures).
    pub source: String,
    /// Source module of the failing pool.
    pub module_name: Option<String>,
    /// Failing pool.
    pub pool_id: Option<String>,
    /// Error kind and message.
    pub text: String,
    /// Error cause chain.
    pub stacktrace: Option<String>,
}
