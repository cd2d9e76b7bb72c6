//! Car park occupancy of Aarhus from the ODAA open data portal (CKAN
//! datastore API).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use park_api_parking_models::{LotData, LotStatus, PoolInfo, slugify};
use park_api_scraper::Fetcher;
use serde::Deserialize;
use serde_json::Value;

use crate::parsing::{json_int, now, parse_datetime, timezone};
use crate::{ParkingSource, SourceError};

const PUBLIC_URL: &str = "https://www.odaa.dk/dataset/parkeringshuse-i-aarhus";
const SOURCE_URL: &str =
    "https://www.odaa.dk/api/action/datastore_search?resource_id=2a82a145-0195-4081-a13c-b0e587e9b89c";

/// Garage codes of the feed and the lot they count towards. Several codes
/// may share a lot; their counts are summed.
const GARAGES: &[(&str, &str)] = &[
    ("NORREPORT", "Nørreport"),
    ("SCANDCENTER", "Scandinavian Center"),
    ("BRUUNS", "Bruuns Galleri"),
    ("MAGASIN", "Magasin"),
    ("KALKVAERKSVEJ", "Kalkværksvej"),
    ("SALLING", "Salling"),
    ("Navitas", "Navitas"),
    ("NewBusgadehuset", "Busgadehuset"),
    ("Urban Level 1", "Dokk1"),
    ("Urban Level 2+3", "Dokk1"),
];

#[derive(Debug, Deserialize)]
struct DatastoreResponse {
    result: DatastoreResult,
}

#[derive(Debug, Deserialize)]
struct DatastoreResult {
    records: Vec<GarageRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GarageRecord {
    garage_code: String,
    total_spaces: Value,
    vehicle_count: Value,
    #[serde(default)]
    date: Option<String>,
}

/// Summed counts of one lot.
struct GarageTotals {
    lot_id: String,
    lot_timestamp: Option<DateTime<Utc>>,
    capacity: i64,
    occupied: i64,
}

/// Aarhus source. Lot metadata comes from the embedded geo-index.
pub struct AarhusSource {
    pool: PoolInfo,
}

impl AarhusSource {
    /// Creates the Aarhus source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool: PoolInfo::new("aarhus", "Aarhus")
                .with_public_url(PUBLIC_URL)
                .with_source_url(SOURCE_URL)
                .with_contributor("Manuel R. Ciosici")
                .with_license(
                    "Aarhus License – https://www.odaa.dk/base/image/Vilkår%20for%20brug%20af%20danske%20offentlige%20data%20-%20Aarhus%20Kommune.%20docx.pdf",
                )
                .with_attribution_url(PUBLIC_URL),
        }
    }
}

impl Default for AarhusSource {
    fn default() -> Self {
        Self::new()
    }
}

fn lot_data_from_records(
    records: &[GarageRecord],
    timestamp: DateTime<Utc>,
    tz: Tz,
) -> Result<Vec<LotData>, SourceError> {
    let mut totals: Vec<GarageTotals> = Vec::new();

    for record in records {
        let Some((_, lot_name)) = GARAGES.iter().find(|(code, _)| *code == record.garage_code) else {
            log::debug!("aarhus: ignoring garage code '{}'", record.garage_code);
            continue;
        };

        let capacity = json_int(&record.total_spaces).ok_or_else(|| {
            SourceError::extraction(format!("Aarhus garage '{}' has no total", record.garage_code))
        })?;
        let occupied = json_int(&record.vehicle_count).ok_or_else(|| {
            SourceError::extraction(format!("Aarhus garage '{}' has no count", record.garage_code))
        })?;

        let lot_id = slugify(&format!("aarhus-{lot_name}"));
        if let Some(existing) = totals.iter_mut().find(|t| t.lot_id == lot_id) {
            existing.capacity += capacity;
            existing.occupied += occupied;
            continue;
        }

        totals.push(GarageTotals {
            lot_id,
            lot_timestamp: record.date.as_deref().map(|d| parse_datetime(d, tz)).transpose()?,
            capacity,
            occupied,
        });
    }

    totals
        .into_iter()
        .map(|t| {
            LotData::builder(timestamp, &t.lot_id, LotStatus::Open)
                .lot_timestamp(t.lot_timestamp)
                .num_occupied(Some(t.occupied))
                .capacity(Some(t.capacity))
                .build()
                .map_err(SourceError::from)
        })
        .collect()
}

#[async_trait]
impl ParkingSource for AarhusSource {
    fn pool_info(&self) -> &PoolInfo {
        &self.pool
    }

    async fn get_lot_data(&self, fetcher: &Fetcher) -> Result<Vec<LotData>, SourceError> {
        let response: DatastoreResponse = fetcher.get_json(SOURCE_URL).await?;
        lot_data_from_records(&response.result.records, now(), timezone(&self.pool.timezone)?)
    }

    fn static_lot_infos(&self) -> Option<&'static str> {
        Some(include_str!("aarhus.geojson"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;
    use crate::geojson::lot_infos_from_geojson;

    const RESPONSE: &str = r#"{
      "success": true,
      "result": {
        "records": [
          {"garageCode": "NORREPORT", "totalSpaces": 80, "vehicleCount": 62, "date": "2024/03/01 12:55:03"},
          {"garageCode": "SKOLEBAKKEN", "totalSpaces": 100, "vehicleCount": 20, "date": "2024/03/01 12:55:03"},
          {"garageCode": "Urban Level 1", "totalSpaces": "319", "vehicleCount": "100", "date": "2024/03/01 12:55:03"},
          {"garageCode": "Urban Level 2+3", "totalSpaces": "654", "vehicleCount": "300", "date": "2024/03/01 12:55:03"},
          {"garageCode": "KALKVAERKSVEJ", "totalSpaces": 210, "vehicleCount": 0, "date": "2024-03-01T12:55:03"}
        ]
      }
    }"#;

    fn parse() -> Vec<LotData> {
        let response: DatastoreResponse = serde_json::from_str(RESPONSE).unwrap();
        lot_data_from_records(
            &response.result.records,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            chrono_tz::Europe::Berlin,
        )
        .unwrap()
    }

    #[test]
    fn maps_codes_and_sums_dokk1_levels() {
        let lots = parse();
        let ids: Vec<_> = lots.iter().map(LotData::id).collect();
        assert_eq!(ids, ["aarhus-nrreport", "aarhus-dokk1", "aarhus-kalkvrksvej"]);

        let dokk1 = &lots[1];
        assert_eq!(dokk1.capacity(), Some(973));
        assert_eq!(dokk1.num_occupied(), Some(400));
        assert_eq!(dokk1.num_free(), Some(573));
        assert_eq!(dokk1.status(), LotStatus::Open);
    }

    #[test]
    fn lot_timestamp_is_local_time() {
        let lots = parse();
        assert_eq!(
            lots[2].lot_timestamp(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 11, 55, 3).unwrap())
        );
    }

    #[test]
    fn geo_index_matches_lot_ids() {
        let infos = lot_infos_from_geojson(AarhusSource::new().static_lot_infos().unwrap()).unwrap();
        assert_eq!(infos.len(), 9);
        for lot in parse() {
            assert!(infos.iter().any(|info| info.id == lot.id()), "{}", lot.id());
        }
    }
}
