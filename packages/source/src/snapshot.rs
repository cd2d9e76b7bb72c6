//! Merging static lot metadata with live observations into a [`Snapshot`].

use std::collections::{BTreeMap, BTreeSet};

use park_api_parking_models::{LotData, LotInfo, PoolInfo};
use park_api_scraper::Fetcher;
use park_api_snapshot_models::{Snapshot, SnapshotLot};

use crate::geojson::lot_infos_from_geojson;
use crate::{ParkingSource, SourceError};

/// Lot infos of one pool keyed by lot id.
pub type LotInfoMap = BTreeMap<String, LotInfo>;

/// Builds the id -> info map of a pool.
///
/// # Errors
///
/// Returns [`SourceError::DuplicateLotInfo`] if two infos share an id.
pub fn build_lot_info_map(pool_id: &str, infos: Vec<LotInfo>) -> Result<LotInfoMap, SourceError> {
    let mut map = LotInfoMap::new();
    for info in infos {
        if map.contains_key(&info.id) {
            return Err(SourceError::DuplicateLotInfo {
                pool_id: pool_id.to_string(),
                lot_id: info.id,
            });
        }
        map.insert(info.id.clone(), info);
    }
    Ok(map)
}

/// Collects a source's lot infos from its geo-index or, failing that, by
/// scraping them.
///
/// Without `required`, a source that provides no infos yields an empty map.
///
/// # Errors
///
/// Returns [`SourceError::InfoNotImplemented`] if `required` and the source
/// has no infos, or any error of the geo-index/scrape.
pub async fn get_lot_info_map(
    source: &dyn ParkingSource,
    fetcher: &Fetcher,
    required: bool,
) -> Result<LotInfoMap, SourceError> {
    let pool_id = &source.pool_info().id;

    let static_infos = match source.static_lot_infos() {
        Some(text) => lot_infos_from_geojson(text)?,
        None => Vec::new(),
    };

    let infos = if static_infos.is_empty() {
        match source.get_lot_infos(fetcher).await? {
            Some(infos) => infos,
            None if required => {
                return Err(SourceError::InfoNotImplemented {
                    pool_id: pool_id.clone(),
                });
            }
            None => return Ok(LotInfoMap::new()),
        }
    } else {
        static_infos
    };

    build_lot_info_map(pool_id, infos)
}

/// Merges observations with their infos.
///
/// # Errors
///
/// Returns [`SourceError::DuplicateLotData`] if a lot is reported twice and
/// [`SourceError::MissingLotInfo`] if `infos_required` and a lot has no
/// info.
pub fn assemble_snapshot(
    pool: &PoolInfo,
    info_map: &LotInfoMap,
    lot_data: &[LotData],
    infos_required: bool,
) -> Result<Snapshot, SourceError> {
    let mut seen = BTreeSet::new();
    let mut lots = Vec::with_capacity(lot_data.len());

    for data in lot_data {
        if !seen.insert(data.id()) {
            return Err(SourceError::DuplicateLotData {
                pool_id: pool.id.clone(),
                lot_id: data.id().to_string(),
            });
        }

        let info = info_map.get(data.id());
        if info.is_none() && infos_required {
            return Err(SourceError::MissingLotInfo {
                pool_id: pool.id.clone(),
                lot_id: data.id().to_string(),
            });
        }

        lots.push(SnapshotLot::merge(info, data));
    }

    Ok(Snapshot::new(pool, lots))
}

/// Scrapes one pool into a snapshot.
///
/// # Errors
///
/// Returns the first [`SourceError`] of info collection, data scraping or
/// assembly; nothing is partially returned.
pub async fn make_snapshot(
    source: &dyn ParkingSource,
    fetcher: &Fetcher,
    infos_required: bool,
) -> Result<Snapshot, SourceError> {
    let pool = source.pool_info();
    let info_map = get_lot_info_map(source, fetcher, infos_required).await?;
    let lot_data = source.get_lot_data(fetcher).await?;

    log::debug!(
        "pool '{}': {} lot infos, {} observations",
        pool.id,
        info_map.len(),
        lot_data.len()
    );

    assemble_snapshot(pool, &info_map, &lot_data, infos_required)
}

/// Lot infos for a geo-index export. With `include_unknown`, lots that are
/// only known from live data are added as bare entries.
///
/// # Errors
///
/// See [`get_lot_info_map`] and [`ParkingSource::get_lot_data`].
pub async fn export_lot_infos(
    source: &dyn ParkingSource,
    fetcher: &Fetcher,
    include_unknown: bool,
) -> Result<Vec<LotInfo>, SourceError> {
    let mut info_map = get_lot_info_map(source, fetcher, false).await?;

    if include_unknown {
        for data in source.get_lot_data(fetcher).await? {
            if !info_map.contains_key(data.id()) {
                let info = LotInfo::new(
                    data.id(),
                    data.id(),
                    Some(park_api_parking_models::LotType::Unknown),
                )?;
                info_map.insert(info.id.clone(), info);
            }
        }
    }

    Ok(info_map.into_values().collect())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone as _, Utc};
    use park_api_parking_models::{LotStatus, LotType};
    use park_api_scraper::FetchConfig;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn info(id: &str) -> LotInfo {
        LotInfo::new(id, "Parkhaus Test", None).unwrap()
    }

    fn data(id: &str) -> LotData {
        LotData::builder(now(), id, LotStatus::Open)
            .num_free(Some(5))
            .build()
            .unwrap()
    }

    struct FakeSource {
        pool: PoolInfo,
        infos: Option<Vec<LotInfo>>,
        geo_index: Option<&'static str>,
    }

    #[async_trait]
    impl ParkingSource for FakeSource {
        fn pool_info(&self) -> &PoolInfo {
            &self.pool
        }

        async fn get_lot_data(&self, _fetcher: &Fetcher) -> Result<Vec<LotData>, SourceError> {
            Ok(vec![data("a"), data("b")])
        }

        async fn get_lot_infos(
            &self,
            _fetcher: &Fetcher,
        ) -> Result<Option<Vec<LotInfo>>, SourceError> {
            Ok(self.infos.clone())
        }

        fn static_lot_infos(&self) -> Option<&'static str> {
            self.geo_index
        }
    }

    fn fake(infos: Option<Vec<LotInfo>>, geo_index: Option<&'static str>) -> FakeSource {
        FakeSource {
            pool: PoolInfo::new("fake", "Fake"),
            infos,
            geo_index,
        }
    }

    fn fetcher() -> Fetcher {
        Fetcher::new("fake", &FetchConfig::default()).unwrap()
    }

    #[test]
    fn duplicate_info_ids_are_rejected() {
        let err = build_lot_info_map("fake", vec![info("a"), info("A")]).unwrap_err();
        assert!(matches!(err, SourceError::DuplicateLotInfo { ref lot_id, .. } if lot_id == "a"));
    }

    #[test]
    fn duplicate_data_ids_are_rejected() {
        let pool = PoolInfo::new("fake", "Fake");
        let err = assemble_snapshot(&pool, &LotInfoMap::new(), &[data("a"), data("a")], false)
            .unwrap_err();
        assert!(matches!(err, SourceError::DuplicateLotData { .. }));
    }

    #[test]
    fn missing_info_fails_only_when_required() {
        let pool = PoolInfo::new("fake", "Fake");
        let map = build_lot_info_map("fake", vec![info("a")]).unwrap();
        let lots = [data("a"), data("b")];

        assert!(matches!(
            assemble_snapshot(&pool, &map, &lots, true),
            Err(SourceError::MissingLotInfo { .. })
        ));

        let snapshot = assemble_snapshot(&pool, &map, &lots, false).unwrap();
        assert_eq!(snapshot.lots[0].lot_type, LotType::Garage);
        assert_eq!(snapshot.lots[1].lot_type, LotType::Unknown);
        assert_eq!(snapshot.lots[1].name, "b");
    }

    #[tokio::test]
    async fn geo_index_takes_precedence() {
        let index = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","geometry":null,"properties":{"id":"a","name":"Parkplatz A"}}]}"#;
        let source = fake(Some(vec![info("a"), info("b")]), Some(index));
        let map = get_lot_info_map(&source, &fetcher(), true).await.unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["a"].lot_type, LotType::Lot);
    }

    #[tokio::test]
    async fn no_infos_is_an_error_only_when_required() {
        let source = fake(None, None);
        assert!(matches!(
            get_lot_info_map(&source, &fetcher(), true).await,
            Err(SourceError::InfoNotImplemented { .. })
        ));
        assert!(get_lot_info_map(&source, &fetcher(), false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn makes_snapshot_from_source() {
        let source = fake(Some(vec![info("a"), info("b")]), None);
        let snapshot = make_snapshot(&source, &fetcher(), true).await.unwrap();
        assert_eq!(snapshot.pool.id, "fake");
        assert_eq!(snapshot.lots.len(), 2);
        assert_eq!(snapshot.error, None);
    }

    #[tokio::test]
    async fn export_includes_unknown_lots() {
        let source = fake(Some(vec![info("a")]), None);
        let infos = export_lot_infos(&source, &fetcher(), true).await.unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[1].lot_type, LotType::Unknown);
        let infos = export_lot_infos(&source, &fetcher(), false).await.unwrap();
        assert_eq!(infos.len(), 1);
    }
}
