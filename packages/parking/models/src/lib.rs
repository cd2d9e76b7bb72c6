#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Value objects shared by every parking data source.
//!
//! [`PoolInfo`] describes one data provider, [`LotInfo`] the slow-changing
//! metadata of one parking facility and [`LotData`] a single live
//! observation. All of them enforce their invariants at construction time
//! so invalid values never reach the snapshot or storage layers.

pub mod counts;
pub mod slug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use counts::Counts;
pub use slug::slugify;

/// Timezone assumed for pools that do not specify one.
pub const DEFAULT_TIMEZONE: &str = "Europe/Berlin";

/// Errors raised when a value object's invariant is violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A status token outside the five-value status enum.
    #[error("Lot '{lot_id}' status '{token}' must be one of open, closed, unknown, nodata, error")]
    InvalidStatus {
        /// Lot the status belongs to.
        lot_id: String,
        /// The rejected token.
        token: String,
    },

    /// Free, occupied and capacity counts do not add up.
    #[error(
        "Lot '{lot_id}' has inconsistent counts: free={num_free} + occupied={num_occupied} != capacity={capacity}"
    )]
    InconsistentCounts {
        /// Lot the counts belong to.
        lot_id: String,
        /// Reported free spaces.
        num_free: i64,
        /// Reported occupied spaces.
        num_occupied: i64,
        /// Reported capacity.
        capacity: i64,
    },

    /// Deriving or summing the counts leaves the `i64` range.
    #[error("Lot '{lot_id}' has counts outside the representable range")]
    CountOverflow {
        /// Lot the counts belong to.
        lot_id: String,
    },

    /// No lot type was given and none could be guessed from the name.
    #[error("Can not guess the type of lot '{name}', please specify it explicitly")]
    UnknownLotType {
        /// Name of the lot.
        name: String,
    },

    /// A lot type token outside the lot type enum.
    #[error("Invalid lot type '{token}'")]
    InvalidLotType {
        /// The rejected token.
        token: String,
    },
}

/// Status of a parking lot as published by its source.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LotStatus {
    /// Listed as open.
    Open,
    /// Listed as closed.
    Closed,
    /// Status is not listed.
    Unknown,
    /// Free/occupied counts are not listed.
    #[serde(rename = "nodata")]
    #[strum(serialize = "nodata")]
    NoData,
    /// Connection, server or scraper error.
    Error,
}

impl LotStatus {
    /// All statuses in wire order.
    pub const ALL: &'static [Self] = &[
        Self::Open,
        Self::Closed,
        Self::Unknown,
        Self::NoData,
        Self::Error,
    ];

    /// Parses a canonical status token.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidStatus`] for anything but the
    /// five canonical tokens.
    pub fn from_token(lot_id: &str, token: &str) -> Result<Self, ValidationError> {
        token
            .parse()
            .map_err(|_| ValidationError::InvalidStatus {
                lot_id: lot_id.to_string(),
                token: token.to_string(),
            })
    }
}

/// Kind of parking facility.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LotType {
    /// Open-air parking lot.
    Lot,
    /// Multi-storey car park.
    Garage,
    /// Underground car park.
    Underground,
    /// Parking deck / level.
    Level,
    /// Bus parking.
    Bus,
    /// Type not known.
    Unknown,
}

impl LotType {
    /// Parses a lot type token.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidLotType`] for unknown tokens.
    pub fn from_token(token: &str) -> Result<Self, ValidationError> {
        token.parse().map_err(|_| ValidationError::InvalidLotType {
            token: token.to_string(),
        })
    }
}

/// Keyword table for [`guess_lot_type`]. Order matters: the first keyword
/// contained in the name wins.
const LOT_TYPE_KEYWORDS: &[(&str, LotType)] = &[
    ("busparkplatz", LotType::Bus),
    ("parkplatz", LotType::Lot),
    ("parkplätze", LotType::Lot),
    ("parkhaus", LotType::Garage),
    ("parkgarage", LotType::Garage),
    ("tiefgarage", LotType::Underground),
    ("parkdeck", LotType::Level),
    ("parklevel", LotType::Level),
];

/// Guesses the lot type from keywords in its name (case-insensitive).
#[must_use]
pub fn guess_lot_type(name: &str) -> Option<LotType> {
    let lower = name.to_lowercase();
    LOT_TYPE_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, lot_type)| *lot_type)
}

/// Turns empty strings into `None`.
fn non_empty(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// A data source / operator grouping one or more lots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    /// Stable slug identifying the pool.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Public website of the operator.
    pub public_url: Option<String>,
    /// URL the data is scraped from.
    pub source_url: Option<String>,
    /// IANA timezone of timestamps published by the source.
    pub timezone: String,
    /// License of the published data.
    pub attribution_license: Option<String>,
    /// Contributor to credit.
    pub attribution_contributor: Option<String>,
    /// Attribution link.
    pub attribution_url: Option<String>,
}

impl PoolInfo {
    /// Creates a pool with the given id (slugified) and name.
    #[must_use]
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: slugify(id),
            name: name.to_string(),
            public_url: None,
            source_url: None,
            timezone: DEFAULT_TIMEZONE.to_string(),
            attribution_license: None,
            attribution_contributor: None,
            attribution_url: None,
        }
    }

    /// Sets the public website.
    #[must_use]
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = non_empty(url);
        self
    }

    /// Sets the data source URL.
    #[must_use]
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = non_empty(url);
        self
    }

    /// Sets the timezone of source-published timestamps.
    #[must_use]
    pub fn with_timezone(mut self, timezone: &str) -> Self {
        timezone.clone_into(&mut self.timezone);
        self
    }

    /// Sets the data license.
    #[must_use]
    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.attribution_license = non_empty(license);
        self
    }

    /// Sets the contributor to credit.
    #[must_use]
    pub fn with_contributor(mut self, contributor: impl Into<String>) -> Self {
        self.attribution_contributor = non_empty(contributor);
        self
    }

    /// Sets the attribution link.
    #[must_use]
    pub fn with_attribution_url(mut self, url: impl Into<String>) -> Self {
        self.attribution_url = non_empty(url);
        self
    }
}

/// Static or slow-changing metadata of one parking facility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotInfo {
    /// Globally stable slug of the lot.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Kind of facility.
    #[serde(rename = "type")]
    pub lot_type: LotType,
    /// Public page of the lot.
    pub public_url: Option<String>,
    /// URL the lot metadata was scraped from.
    pub source_url: Option<String>,
    /// Postal address, lines separated by `\n`.
    pub address: Option<String>,
    /// Total number of spaces, if published.
    pub capacity: Option<i64>,
    /// Whether the source publishes capacity with each observation.
    pub has_live_capacity: bool,
    /// WGS84 latitude.
    pub latitude: Option<f64>,
    /// WGS84 longitude.
    pub longitude: Option<f64>,
}

impl LotInfo {
    /// Creates lot metadata. `id` is slugified; a missing `lot_type` is
    /// guessed from the name.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownLotType`] if `lot_type` is `None`
    /// and [`guess_lot_type`] finds no keyword in `name`.
    pub fn new(id: &str, name: &str, lot_type: Option<LotType>) -> Result<Self, ValidationError> {
        let lot_type = match lot_type {
            Some(lot_type) => lot_type,
            None => guess_lot_type(name).ok_or_else(|| ValidationError::UnknownLotType {
                name: name.to_string(),
            })?,
        };

        Ok(Self {
            id: slugify(id),
            name: name.to_string(),
            lot_type,
            public_url: None,
            source_url: None,
            address: None,
            capacity: None,
            has_live_capacity: false,
            latitude: None,
            longitude: None,
        })
    }

    /// Sets the public page.
    #[must_use]
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = non_empty(url);
        self
    }

    /// Sets the source page.
    #[must_use]
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = non_empty(url);
        self
    }

    /// Sets the address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = non_empty(address);
        self
    }

    /// Sets the capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: Option<i64>) -> Self {
        self.capacity = capacity;
        self
    }

    /// Marks whether capacity is published live.
    #[must_use]
    pub const fn with_live_capacity(mut self, has_live_capacity: bool) -> Self {
        self.has_live_capacity = has_live_capacity;
        self
    }

    /// Sets the coordinates.
    #[must_use]
    pub const fn with_coordinates(mut self, latitude: Option<f64>, longitude: Option<f64>) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }
}

/// One live observation of a lot.
///
/// Only constructible through [`LotData::builder`], which enforces the
/// count invariant (see [`Counts::reconcile`]). Deserialization goes through
/// the builder as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLotData")]
pub struct LotData {
    id: String,
    timestamp: DateTime<Utc>,
    lot_timestamp: Option<DateTime<Utc>>,
    status: LotStatus,
    num_free: Option<i64>,
    num_occupied: Option<i64>,
    capacity: Option<i64>,
}

impl LotData {
    /// Starts building an observation for lot `id` (slugified) scraped at
    /// `timestamp`.
    #[must_use]
    pub fn builder(timestamp: DateTime<Utc>, id: &str, status: LotStatus) -> LotDataBuilder {
        LotDataBuilder {
            id: slugify(id),
            timestamp,
            lot_timestamp: None,
            status,
            counts: Counts::default(),
        }
    }

    /// Lot slug.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Scrape time (UTC).
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Update time published by the source (UTC).
    #[must_use]
    pub const fn lot_timestamp(&self) -> Option<DateTime<Utc>> {
        self.lot_timestamp
    }

    /// Published status.
    #[must_use]
    pub const fn status(&self) -> LotStatus {
        self.status
    }

    /// Free spaces.
    #[must_use]
    pub const fn num_free(&self) -> Option<i64> {
        self.num_free
    }

    /// Occupied spaces.
    #[must_use]
    pub const fn num_occupied(&self) -> Option<i64> {
        self.num_occupied
    }

    /// Total spaces.
    #[must_use]
    pub const fn capacity(&self) -> Option<i64> {
        self.capacity
    }

    /// The three counts.
    #[must_use]
    pub const fn counts(&self) -> Counts {
        Counts::new(self.num_free, self.num_occupied, self.capacity)
    }
}

/// Unchecked wire form of [`LotData`].
#[derive(Deserialize)]
struct RawLotData {
    id: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    lot_timestamp: Option<DateTime<Utc>>,
    status: LotStatus,
    #[serde(default)]
    num_free: Option<i64>,
    #[serde(default)]
    num_occupied: Option<i64>,
    #[serde(default)]
    capacity: Option<i64>,
}

impl TryFrom<RawLotData> for LotData {
    type Error = ValidationError;

    fn try_from(raw: RawLotData) -> Result<Self, Self::Error> {
        Self::builder(raw.timestamp, &raw.id, raw.status)
            .lot_timestamp(raw.lot_timestamp)
            .num_free(raw.num_free)
            .num_occupied(raw.num_occupied)
            .capacity(raw.capacity)
            .build()
    }
}

/// Builder for [`LotData`].
#[derive(Debug, Clone)]
#[must_use]
pub struct LotDataBuilder {
    id: String,
    timestamp: DateTime<Utc>,
    lot_timestamp: Option<DateTime<Utc>>,
    status: LotStatus,
    counts: Counts,
}

impl LotDataBuilder {
    /// Sets the source-published update time.
    pub const fn lot_timestamp(mut self, lot_timestamp: Option<DateTime<Utc>>) -> Self {
        self.lot_timestamp = lot_timestamp;
        self
    }

    /// Sets the number of free spaces.
    pub const fn num_free(mut self, num_free: Option<i64>) -> Self {
        self.counts.num_free = num_free;
        self
    }

    /// Sets the number of occupied spaces.
    pub const fn num_occupied(mut self, num_occupied: Option<i64>) -> Self {
        self.counts.num_occupied = num_occupied;
        self
    }

    /// Sets the capacity.
    pub const fn capacity(mut self, capacity: Option<i64>) -> Self {
        self.counts.capacity = capacity;
        self
    }

    /// Validates the counts and builds the observation.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InconsistentCounts`] if free, occupied and
    /// capacity are all given and do not add up.
    pub fn build(self) -> Result<LotData, ValidationError> {
        let counts = self.counts.reconcile(&self.id)?;
        Ok(LotData {
            id: self.id,
            timestamp: self.timestamp,
            lot_timestamp: self.lot_timestamp,
            status: self.status,
            num_free: counts.num_free,
            num_occupied: counts.num_occupied,
            capacity: counts.capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn status_tokens_are_wire_stable() {
        let tokens: Vec<&str> = LotStatus::ALL.iter().map(AsRef::as_ref).collect();
        assert_eq!(tokens, ["open", "closed", "unknown", "nodata", "error"]);
        assert_eq!(
            serde_json::to_string(&LotStatus::NoData).unwrap(),
            "\"nodata\""
        );
    }

    #[test]
    fn rejects_unknown_status_token() {
        assert_eq!(LotStatus::from_token("x", "nodata").unwrap(), LotStatus::NoData);
        let err = LotStatus::from_token("x", "Frei").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidStatus { .. }));
    }

    #[test]
    fn guesses_lot_types() {
        assert_eq!(guess_lot_type("Parkhaus Kaiserplatz"), Some(LotType::Garage));
        assert_eq!(guess_lot_type("TIEFGARAGE am Markt"), Some(LotType::Underground));
        assert_eq!(guess_lot_type("Parkplatz Nord"), Some(LotType::Lot));
        assert_eq!(guess_lot_type("Parkdeck 2"), Some(LotType::Level));
        assert_eq!(guess_lot_type("Busparkplatz Altstadt"), Some(LotType::Bus));
        assert_eq!(guess_lot_type("Centrum Galerie"), None);
    }

    #[test]
    fn lot_info_requires_a_type() {
        let info = LotInfo::new("Aachen Parkhaus Kaiserplatz", "Parkhaus Kaiserplatz", None).unwrap();
        assert_eq!(info.id, "aachen-parkhaus-kaiserplatz");
        assert_eq!(info.lot_type, LotType::Garage);

        let err = LotInfo::new("x", "Centrum Galerie", None).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownLotType { .. }));

        let explicit = LotInfo::new("x", "Centrum Galerie", Some(LotType::Lot)).unwrap();
        assert_eq!(explicit.lot_type, LotType::Lot);
    }

    #[test]
    fn lot_info_drops_empty_strings() {
        let info = LotInfo::new("x", "Parkplatz", None)
            .unwrap()
            .with_address("  ")
            .with_public_url("https://example.org/x");
        assert_eq!(info.address, None);
        assert_eq!(info.public_url.as_deref(), Some("https://example.org/x"));
    }

    #[test]
    fn pool_info_slugifies_id() {
        let pool = PoolInfo::new("Frankfurt Main", "Frankfurt am Main").with_source_url("");
        assert_eq!(pool.id, "frankfurt-main");
        assert_eq!(pool.timezone, DEFAULT_TIMEZONE);
        assert_eq!(pool.source_url, None);
    }

    #[test]
    fn lot_data_derives_missing_count() {
        let data = LotData::builder(now(), "aachen-Kaiserplatz", LotStatus::Open)
            .num_free(Some(45))
            .capacity(Some(300))
            .build()
            .unwrap();
        assert_eq!(data.id(), "aachen-kaiserplatz");
        assert_eq!(data.num_occupied(), Some(255));
    }

    #[test]
    fn lot_data_keeps_free_without_capacity() {
        let data = LotData::builder(now(), "aachen-Kaiserplatz", LotStatus::Open)
            .num_free(Some(120))
            .build()
            .unwrap();
        assert_eq!(data.num_free(), Some(120));
        assert_eq!(data.num_occupied(), None);
        assert_eq!(data.capacity(), None);
    }

    #[test]
    fn lot_data_rejects_inconsistent_counts() {
        let result = LotData::builder(now(), "x", LotStatus::Open)
            .num_free(Some(10))
            .num_occupied(Some(10))
            .capacity(Some(30))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn lot_data_deserializes_through_builder() {
        let data: LotData = serde_json::from_str(
            r#"{"id":"aachen-kaiserplatz","timestamp":"2024-03-01T12:00:00Z","status":"open","num_free":45,"capacity":300}"#,
        )
        .unwrap();
        assert_eq!(data.num_occupied(), Some(255));

        let result = serde_json::from_str::<LotData>(
            r#"{"id":"x","timestamp":"2024-03-01T12:00:00Z","status":"open","num_free":10,"num_occupied":10,"capacity":30}"#,
        );
        assert!(result.unwrap_err().to_string().contains("inconsistent counts"));
    }
}
