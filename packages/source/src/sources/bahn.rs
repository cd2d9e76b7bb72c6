//! Deutsche Bahn parking API (station car parks).
//!
//! Requires an API token; the source is only registered when
//! [`TOKEN_ENV`] is set.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use park_api_parking_models::{LotData, LotStatus, PoolInfo};
use park_api_scraper::Fetcher;
use serde::Deserialize;
use serde_json::Value;

use crate::parsing::{json_int, now, parse_datetime, timezone};
use crate::{ParkingSource, SourceError};

/// Environment variable holding the API bearer token.
pub const TOKEN_ENV: &str = "BAHN_API_TOKEN";

const SOURCE_URL: &str = "https://api.deutschebahn.com/bahnpark/v1/spaces/occupancies";

/// The API only publishes occupancy classes; each maps to a representative
/// free count.
const ALLOCATION_TEXT_TO_FREE: &[(&str, i64)] = &[("bis 10", 5), ("> 10", 11), ("> 30", 31), ("> 50", 51)];

#[derive(Debug, Deserialize)]
struct OccupancyResponse {
    allocations: Vec<SpaceAllocation>,
}

#[derive(Debug, Deserialize)]
struct SpaceAllocation {
    space: Space,
    allocation: Allocation,
}

#[derive(Debug, Deserialize)]
struct Space {
    id: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Allocation {
    #[serde(default)]
    time_segment: Option<String>,
    #[serde(default)]
    valid_data: bool,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    capacity: Option<Value>,
}

/// Deutsche Bahn source.
pub struct BahnSource {
    pool: PoolInfo,
    token: String,
}

impl BahnSource {
    /// Creates the source with an API token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            pool: PoolInfo::new("bahn", "Deutsche Bahn Parkplätze API")
                .with_public_url("https://data.deutschebahn.com/dataset/api-parkplatz.html")
                .with_source_url(SOURCE_URL)
                .with_license("Creative Commons Attribution 4.0 International (CC BY 4.0)"),
            token: token.into(),
        }
    }

    /// Creates the source from [`TOKEN_ENV`], or `None` if it is unset or
    /// empty.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .map(Self::new)
    }
}

fn space_id(id: &Value) -> Option<String> {
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lot_data_from_response(
    response: &OccupancyResponse,
    timestamp: DateTime<Utc>,
    tz: Tz,
) -> Result<Vec<LotData>, SourceError> {
    response
        .allocations
        .iter()
        .map(|entry| {
            let id = space_id(&entry.space.id)
                .ok_or_else(|| SourceError::extraction("Bahn allocation without space id"))?;
            let allocation = &entry.allocation;

            let lot_timestamp = allocation
                .time_segment
                .as_deref()
                .map(|segment| parse_datetime(segment, tz))
                .transpose()?;

            let mut status = if allocation.valid_data {
                LotStatus::Open
            } else {
                LotStatus::NoData
            };

            let mut num_free = None;
            match allocation.text.as_deref().filter(|t| !t.is_empty()) {
                None if status == LotStatus::Open => status = LotStatus::Error,
                None => {}
                Some(text) => {
                    num_free = ALLOCATION_TEXT_TO_FREE
                        .iter()
                        .find(|(token, _)| *token == text)
                        .map(|(_, free)| *free);
                    if num_free.is_none() {
                        log::warn!("bahn: unknown allocation text '{text}' for space {id}");
                        status = LotStatus::NoData;
                    }
                }
            }

            Ok(LotData::builder(timestamp, &format!("db-{id}"), status)
                .lot_timestamp(lot_timestamp)
                .num_free(num_free)
                .capacity(allocation.capacity.as_ref().and_then(json_int))
                .build()?)
        })
        .collect()
}

#[async_trait]
impl ParkingSource for BahnSource {
    fn pool_info(&self) -> &PoolInfo {
        &self.pool
    }

    async fn get_lot_data(&self, fetcher: &Fetcher) -> Result<Vec<LotData>, SourceError> {
        let response: OccupancyResponse = fetcher.get_json(SOURCE_URL).await?;
        lot_data_from_response(&response, now(), timezone(&self.pool.timezone)?)
    }

    fn headers(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("Authorization".to_string(), format!("Bearer {}", self.token))])
    }
}
