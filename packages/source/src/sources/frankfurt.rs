//! Open data parking feeds of Frankfurt am Main (DATEX II XML).
//!
//! The dynamic feed carries occupancy per facility, the static feed names,
//! coordinates and capacities.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use park_api_parking_models::{LotData, LotInfo, LotStatus, LotType, PoolInfo};
use park_api_scraper::Fetcher;
use roxmltree::Node;

use crate::parsing::{float_or_none, int_or_none, now, parse_datetime, timezone};
use crate::xml::{self, attribute, children, descendants, find, find_text};
use crate::{ParkingSource, SourceError};

const SOURCE_URL: &str = "https://offenedaten.frankfurt.de/dataset/912fe0ab-8976-4837-b591-57dbf163d6e5/resource/48378186-5732-41f3-9823-9d1938f2695e/download/parkdaten_dyn.xml";
const STATIC_URL: &str = "https://offenedaten.frankfurt.de/dataset/e821f156-69cf-4dd0-9ffe-13d9d6218597/resource/eac5ca3d-4285-48f4-bfe3-d3116a262e5f/download/parkdaten_sta.xml";

const ID_PREFIX: &str = "fam";

/// Frankfurt am Main source.
pub struct FrankfurtSource {
    pool: PoolInfo,
}

impl FrankfurtSource {
    /// Creates the Frankfurt source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool: PoolInfo::new("frankfurt-main", "Frankfurt am Main")
                .with_public_url("https://offenedaten.frankfurt.de/dataset/parkdaten-dynamisch")
                .with_source_url(SOURCE_URL),
        }
    }
}

impl Default for FrankfurtSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Feed status vocabulary; anything else has no usable data.
fn map_status(token: Option<&str>) -> LotStatus {
    match token {
        Some("open") => LotStatus::Open,
        Some("closed") => LotStatus::Closed,
        _ => LotStatus::NoData,
    }
}

fn required_int(node: Node<'_, '_>, name: &str, lot_id: &str) -> Result<i64, SourceError> {
    find_text(node, name).and_then(int_or_none).ok_or_else(|| {
        SourceError::extraction(format!("Frankfurt facility '{lot_id}' has no numeric {name}"))
    })
}

fn parse_lot_data(xml_text: &str, timestamp: DateTime<Utc>, tz: Tz) -> Result<Vec<LotData>, SourceError> {
    let doc = xml::parse(xml_text)?;
    let root = doc.root_element();

    let lot_timestamp = find_text(root, "publicationTime")
        .map(|text| parse_datetime(text, tz))
        .transpose()?;

    let mut lots = Vec::new();
    for publication in descendants(root, "parkingFacilityTableStatusPublication") {
        for facility in children(publication, "parkingFacilityStatus") {
            let lot_id = find(facility, "parkingFacilityReference")
                .and_then(|reference| attribute(reference, "id"))
                .ok_or_else(|| SourceError::extraction("Frankfurt facility without reference id"))?;

            let capacity = required_int(facility, "totalParkingCapacityShortTermOverride", lot_id)?;
            let occupied = required_int(facility, "totalNumberOfOccupiedParkingSpaces", lot_id)?;
            let status = map_status(find_text(facility, "parkingFacilityStatus"));

            lots.push(
                LotData::builder(timestamp, &format!("{ID_PREFIX}-{lot_id}"), status)
                    .lot_timestamp(lot_timestamp)
                    .num_occupied(Some(occupied))
                    .capacity(Some(capacity))
                    .build()?,
            );
        }
    }

    Ok(lots)
}

fn parse_lot_infos(xml_text: &str) -> Result<Vec<LotInfo>, SourceError> {
    let doc = xml::parse(xml_text)?;

    descendants(doc.root_element(), "parkingFacility")
        .filter_map(|facility| attribute(facility, "id").map(|lot_id| (facility, lot_id)))
        .map(|(facility, lot_id)| {
            let name = find(facility, "parkingFacilityDescription")
                .map(|description| {
                    description
                        .descendants()
                        .filter_map(|n| n.text())
                        .collect::<String>()
                        .trim()
                        .to_string()
                })
                .filter(|name| !name.is_empty())
                .ok_or_else(|| {
                    SourceError::extraction(format!("Frankfurt facility '{lot_id}' has no description"))
                })?;

            let coordinates = find(facility, "pointCoordinates");
            let coordinate = |name: &str| coordinates.and_then(|c| find_text(c, name)).and_then(float_or_none);

            Ok(LotInfo::new(&format!("{ID_PREFIX}-{lot_id}"), &name, Some(LotType::Lot))?
                .with_source_url(SOURCE_URL)
                .with_capacity(find_text(facility, "totalParkingCapacity").and_then(int_or_none))
                .with_live_capacity(true)
                .with_coordinates(coordinate("latitude"), coordinate("longitude")))
        })
        .collect()
}

#[async_trait]
impl ParkingSource for FrankfurtSource {
    fn pool_info(&self) -> &PoolInfo {
        &self.pool
    }

    async fn get_lot_data(&self, fetcher: &Fetcher) -> Result<Vec<LotData>, SourceError> {
        let text = fetcher.get_text(SOURCE_URL).await?;
        parse_lot_data(&text, now(), timezone(&self.pool.timezone)?)
    }

    async fn get_lot_infos(&self, fetcher: &Fetcher) -> Result<Option<Vec<LotInfo>>, SourceError> {
        let text = fetcher.get_text(STATIC_URL).await?;
        parse_lot_infos(&text).map(Some)
    }
}
