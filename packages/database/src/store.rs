//! Idempotent persistence of one pool's snapshot.
//!
//! All writes of a snapshot run in one transaction: a validation or
//! constraint error leaves the database unchanged for that pool.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use duckdb::Connection;
use park_api_database_models::{ParkingDataRow, ParkingLotRow, ParkingPoolRow, max_capacity};
use park_api_parking_models::LotType;
use park_api_snapshot_models::{Snapshot, SnapshotLot, SnapshotPool, validate_snapshot};
use serde_json::Value;

use crate::{DbError, queries, storage_precision};

/// Overwrites `current` with `incoming` if it is set and differs.
fn overwrite<T: PartialEq + Clone>(current: &mut Option<T>, incoming: Option<&T>) -> bool {
    match incoming {
        Some(value) if current.as_ref() != Some(value) => {
            *current = Some(value.clone());
            true
        }
        _ => false,
    }
}

fn upsert_pool(conn: &Connection, pool: &SnapshotPool, update_infos: bool, now: DateTime<Utc>) -> Result<bool, DbError> {
    let Some(mut row) = queries::get_pool(conn, &pool.id)? else {
        log::info!("creating pool '{}'", pool.id);
        queries::insert_pool(conn, &ParkingPoolRow::from_snapshot(pool, now))?;
        return Ok(true);
    };

    if !update_infos {
        return Ok(false);
    }

    let mut changed = false;
    if row.name != pool.name {
        row.name.clone_from(&pool.name);
        changed = true;
    }
    changed |= overwrite(&mut row.public_url, pool.public_url.as_ref());
    changed |= overwrite(&mut row.source_url, pool.source_url.as_ref());
    changed |= overwrite(&mut row.timezone, pool.timezone.as_ref());
    changed |= overwrite(&mut row.attribution_license, pool.attribution_license.as_ref());
    changed |= overwrite(&mut row.attribution_contributor, pool.attribution_contributor.as_ref());
    changed |= overwrite(&mut row.attribution_url, pool.attribution_url.as_ref());

    if changed {
        log::debug!("updating pool '{}'", pool.id);
        row.date_updated = now;
        queries::update_pool(conn, &row)?;
    }
    Ok(changed)
}

/// Applies a snapshot lot onto its stored row. Returns whether anything
/// changed.
///
/// A bare record (no static metadata) never overwrites the stored name or
/// type: its name is the lot id and its type is `unknown`.
fn merge_lot(row: &mut ParkingLotRow, pool_id: &str, lot: &SnapshotLot, update_infos: bool) -> bool {
    let mut changed = false;

    let max = max_capacity(row.max_capacity, lot.capacity);
    if max != row.max_capacity {
        row.max_capacity = max;
        changed = true;
    }

    if !update_infos {
        return changed;
    }

    let bare = lot.name == lot.id && lot.lot_type == LotType::Unknown;

    if row.pool_id != pool_id {
        log::warn!(
            "lot '{}' of pool '{}' is also reported by pool '{pool_id}', moving it",
            row.lot_id,
            row.pool_id
        );
        row.pool_id = pool_id.to_string();
        changed = true;
    }
    if lot.name != lot.id && row.name != lot.name {
        row.name.clone_from(&lot.name);
        changed = true;
    }
    if lot.lot_type != LotType::Unknown && row.lot_type != lot.lot_type {
        row.lot_type = lot.lot_type;
        changed = true;
    }
    if !bare && row.has_live_capacity != lot.has_live_capacity {
        row.has_live_capacity = lot.has_live_capacity;
        changed = true;
    }
    changed |= overwrite(&mut row.public_url, lot.public_url.as_ref());
    changed |= overwrite(&mut row.source_url, lot.source_url.as_ref());
    changed |= overwrite(&mut row.address, lot.address.as_ref());
    changed |= overwrite(&mut row.capacity, lot.capacity.as_ref());

    if let (Some(latitude), Some(longitude)) = (lot.latitude, lot.longitude)
        && (row.latitude != Some(latitude) || row.longitude != Some(longitude))
    {
        row.latitude = Some(latitude);
        row.longitude = Some(longitude);
        changed = true;
    }

    changed
}

fn upsert_lot(
    conn: &Connection,
    pool_id: &str,
    lot: &SnapshotLot,
    update_infos: bool,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    let Some(mut row) = queries::get_lot(conn, &lot.id)? else {
        log::debug!("creating lot '{}' of pool '{pool_id}'", lot.id);
        return queries::insert_lot(conn, &ParkingLotRow::from_snapshot(pool_id, lot, now));
    };

    if merge_lot(&mut row, pool_id, lot, update_infos) {
        row.date_updated = now;
        queries::update_lot(conn, &row)?;
    }
    Ok(())
}

fn store_observation(conn: &Connection, lot: &SnapshotLot) -> Result<ParkingDataRow, DbError> {
    let data = ParkingDataRow::from_snapshot(lot)?;
    queries::insert_parking_data(conn, &data)?;

    match queries::get_latest(conn, &lot.id)? {
        None => queries::insert_latest(conn, &data)?,
        Some(latest) if latest != data => queries::update_latest(conn, &data)?,
        Some(_) => {}
    }

    Ok(data)
}

fn store_in_transaction(
    conn: &Connection,
    snapshot: &Snapshot,
    update_infos: bool,
    now: DateTime<Utc>,
) -> Result<Vec<ParkingDataRow>, DbError> {
    let pool_id = &snapshot.pool.id;
    upsert_pool(conn, &snapshot.pool, update_infos, now)?;

    snapshot
        .lots
        .iter()
        .map(|lot| {
            upsert_lot(conn, pool_id, lot, update_infos, now)?;
            store_observation(conn, lot)
        })
        .collect()
}

/// Persists one pool's snapshot and returns the stored observations.
///
/// Creates the pool and unknown lots, updates their metadata if
/// `update_infos` is set, tracks the maximum capacity of every lot, appends
/// one observation per lot and refreshes the latest observation.
///
/// # Errors
///
/// * [`DbError::FailedSnapshot`] if the snapshot carries a scrape error
/// * [`DbError::DuplicateLot`] if a lot id appears twice
/// * [`DbError::Validation`] if a lot's counts do not add up
/// * [`DbError::DuckDb`] on storage errors, e.g. a second observation of a
///   lot at the same timestamp
///
/// Nothing is written if an error is returned.
pub fn store_snapshot(
    conn: &Connection,
    snapshot: &Snapshot,
    update_infos: bool,
) -> Result<Vec<ParkingDataRow>, DbError> {
    let pool_id = &snapshot.pool.id;

    if let Some(error) = &snapshot.error {
        return Err(DbError::FailedSnapshot {
            pool_id: pool_id.clone(),
            error: error.clone(),
        });
    }

    let mut seen = BTreeSet::new();
    for lot in &snapshot.lots {
        if !seen.insert(lot.id.as_str()) {
            return Err(DbError::DuplicateLot {
                pool_id: pool_id.clone(),
                lot_id: lot.id.clone(),
            });
        }
    }

    conn.execute_batch("BEGIN TRANSACTION")?;
    match store_in_transaction(conn, snapshot, update_infos, storage_precision(Utc::now())) {
        Ok(rows) => {
            conn.execute_batch("COMMIT")?;
            log::info!("stored {} observations of pool '{pool_id}'", rows.len());
            Ok(rows)
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                log::error!("rollback of pool '{pool_id}' failed: {rollback}");
            }
            Err(e)
        }
    }
}

/// Validates a snapshot document against the schema and stores it.
///
/// # Errors
///
/// Returns [`DbError::Schema`] naming the offending path if the document is
/// malformed, otherwise the errors of [`store_snapshot`].
pub fn store_snapshot_value(
    conn: &Connection,
    document: &Value,
    update_infos: bool,
) -> Result<Vec<ParkingDataRow>, DbError> {
    let snapshot = validate_snapshot(document)?;
    store_snapshot(conn, &snapshot, update_infos)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use park_api_parking_models::{LotStatus, ValidationError};
    use serde_json::json;

    use super::*;
    use crate::open_in_memory;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    fn pool() -> SnapshotPool {
        SnapshotPool {
            id: "apag".to_string(),
            name: "Aachener Parkhaus GmbH".to_string(),
            public_url: Some("https://www.apag.de".to_string()),
            source_url: None,
            timezone: Some("Europe/Berlin".to_string()),
            attribution_license: None,
            attribution_contributor: None,
            attribution_url: None,
        }
    }

    fn kaiserplatz(minute: u32, num_free: Option<i64>, capacity: Option<i64>) -> SnapshotLot {
        SnapshotLot {
            id: "aachen-kaiserplatz".to_string(),
            name: "Kaiserplatz".to_string(),
            lot_type: LotType::Garage,
            status: LotStatus::Open,
            timestamp: at(minute),
            lot_timestamp: None,
            num_free,
            num_occupied: None,
            capacity,
            latitude: Some(50.7753),
            longitude: Some(6.0898),
            address: None,
            public_url: None,
            source_url: None,
            has_live_capacity: false,
        }
    }

    fn snapshot(lots: Vec<SnapshotLot>) -> Snapshot {
        Snapshot {
            pool: pool(),
            lots,
            error: None,
        }
    }

    #[test]
    fn repeated_snapshot_appends_one_observation() {
        let conn = open_in_memory().unwrap();
        store_snapshot(&conn, &snapshot(vec![kaiserplatz(0, Some(120), Some(300))]), true).unwrap();
        store_snapshot(&conn, &snapshot(vec![kaiserplatz(5, Some(100), Some(300))]), true).unwrap();

        assert_eq!(queries::count_parking_data(&conn).unwrap(), 2);
        assert_eq!(queries::list_pools(&conn).unwrap().len(), 1);
        assert_eq!(queries::lots_of_pool(&conn, "apag").unwrap().len(), 1);

        let latest = queries::get_latest(&conn, "aachen-kaiserplatz").unwrap().unwrap();
        assert_eq!(latest.timestamp, at(5));
        assert_eq!(latest.num_free, Some(100));
        assert_eq!(latest.num_occupied, Some(200));
    }

    #[test]
    fn max_capacity_is_monotonic() {
        let conn = open_in_memory().unwrap();
        for (minute, capacity) in [(0, Some(50)), (5, None), (10, Some(80)), (15, Some(60))] {
            store_snapshot(&conn, &snapshot(vec![kaiserplatz(minute, Some(10), capacity)]), true).unwrap();
        }

        let lot = queries::get_lot(&conn, "aachen-kaiserplatz").unwrap().unwrap();
        assert_eq!(lot.max_capacity, Some(80));
        assert_eq!(lot.capacity, Some(60));
    }

    #[test]
    fn derives_occupied_once_capacity_is_known() {
        let conn = open_in_memory().unwrap();

        let rows = store_snapshot(&conn, &snapshot(vec![kaiserplatz(0, Some(120), None)]), true).unwrap();
        assert_eq!(rows[0].num_free, Some(120));
        assert_eq!(rows[0].num_occupied, None);
        assert_eq!(rows[0].capacity, None);
        assert_eq!(queries::get_latest(&conn, "aachen-kaiserplatz").unwrap().as_ref(), Some(&rows[0]));

        let rows = store_snapshot(&conn, &snapshot(vec![kaiserplatz(5, Some(45), Some(300))]), true).unwrap();
        assert_eq!(rows[0].num_occupied, Some(255));
        assert_eq!(rows[0].percent_free, Some(15.0));

        let lot = queries::get_lot(&conn, "aachen-kaiserplatz").unwrap().unwrap();
        assert_eq!(lot.max_capacity, Some(300));
    }

    #[test]
    fn inconsistent_counts_roll_back() {
        let conn = open_in_memory().unwrap();
        let mut lot = kaiserplatz(0, Some(10), Some(30));
        lot.num_occupied = Some(10);

        let err = store_snapshot(&conn, &snapshot(vec![lot]), true).unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
        assert_eq!(queries::get_pool(&conn, "apag").unwrap(), None);
        assert_eq!(queries::get_lot(&conn, "aachen-kaiserplatz").unwrap(), None);
        assert_eq!(queries::count_parking_data(&conn).unwrap(), 0);
    }

    #[test]
    fn same_timestamp_twice_is_a_storage_error() {
        let conn = open_in_memory().unwrap();
        store_snapshot(&conn, &snapshot(vec![kaiserplatz(0, Some(120), None)]), true).unwrap();
        let err = store_snapshot(&conn, &snapshot(vec![kaiserplatz(0, Some(100), None)]), true).unwrap_err();
        assert!(matches!(err, DbError::DuckDb(_)));
        assert_eq!(queries::count_parking_data(&conn).unwrap(), 1);
    }

    #[test]
    fn sub_second_observations_are_stored_as_returned() {
        let conn = open_in_memory().unwrap();
        let mut first = kaiserplatz(0, Some(120), None);
        first.timestamp += chrono::Duration::nanoseconds(100_000_500);
        let mut second = kaiserplatz(0, Some(119), None);
        second.timestamp += chrono::Duration::milliseconds(600);

        let mut returned = store_snapshot(&conn, &snapshot(vec![first]), true).unwrap();
        returned.extend(store_snapshot(&conn, &snapshot(vec![second]), true).unwrap());

        assert_eq!(queries::parking_data_of_lot(&conn, "aachen-kaiserplatz").unwrap(), returned);
    }

    #[test]
    fn lot_reported_by_another_pool_moves_on_update() {
        let conn = open_in_memory().unwrap();
        store_snapshot(&conn, &snapshot(vec![kaiserplatz(0, Some(120), None)]), true).unwrap();

        let mut other = snapshot(vec![kaiserplatz(5, Some(100), None)]);
        other.pool.id = "aachen".to_string();
        store_snapshot(&conn, &other, false).unwrap();
        assert_eq!(queries::get_lot(&conn, "aachen-kaiserplatz").unwrap().unwrap().pool_id, "apag");

        other.lots[0].timestamp = at(10);
        store_snapshot(&conn, &other, true).unwrap();
        assert_eq!(queries::get_lot(&conn, "aachen-kaiserplatz").unwrap().unwrap().pool_id, "aachen");
    }

    #[test]
    fn rejects_failed_and_duplicate_snapshots() {
        let conn = open_in_memory().unwrap();

        let mut failed = snapshot(Vec::new());
        failed.error = Some("ExtractionError: no table".to_string());
        assert!(matches!(
            store_snapshot(&conn, &failed, true),
            Err(DbError::FailedSnapshot { .. })
        ));

        let duplicated = snapshot(vec![kaiserplatz(0, Some(1), None), kaiserplatz(0, Some(2), None)]);
        assert!(matches!(
            store_snapshot(&conn, &duplicated, true),
            Err(DbError::DuplicateLot { .. })
        ));
        assert_eq!(queries::get_pool(&conn, "apag").unwrap(), None);
    }

    #[test]
    fn bare_records_keep_stored_metadata() {
        let conn = open_in_memory().unwrap();
        store_snapshot(&conn, &snapshot(vec![kaiserplatz(0, Some(120), None)]), true).unwrap();

        let mut bare = kaiserplatz(5, Some(100), None);
        bare.name = bare.id.clone();
        bare.lot_type = LotType::Unknown;
        bare.latitude = None;
        bare.longitude = None;
        store_snapshot(&conn, &snapshot(vec![bare]), true).unwrap();

        let lot = queries::get_lot(&conn, "aachen-kaiserplatz").unwrap().unwrap();
        assert_eq!(lot.name, "Kaiserplatz");
        assert_eq!(lot.lot_type, LotType::Garage);
        assert_eq!(lot.latitude, Some(50.7753));
    }

    #[test]
    fn metadata_updates_only_when_enabled() {
        let conn = open_in_memory().unwrap();
        store_snapshot(&conn, &snapshot(vec![kaiserplatz(0, Some(120), None)]), true).unwrap();

        let mut renamed = kaiserplatz(5, Some(100), None);
        renamed.name = "Parkhaus Kaiserplatz".to_string();
        renamed.address = Some("Kaiserplatz, 52062 Aachen".to_string());
        let mut pool_update = snapshot(vec![renamed.clone()]);
        pool_update.pool.source_url = Some("https://www.apag.de/parkobjekte".to_string());
        store_snapshot(&conn, &pool_update, false).unwrap();

        assert_eq!(queries::get_lot(&conn, "aachen-kaiserplatz").unwrap().unwrap().name, "Kaiserplatz");
        assert_eq!(queries::get_pool(&conn, "apag").unwrap().unwrap().source_url, None);

        renamed.timestamp = at(10);
        let mut pool_update = snapshot(vec![renamed]);
        pool_update.pool.source_url = Some("https://www.apag.de/parkobjekte".to_string());
        store_snapshot(&conn, &pool_update, true).unwrap();

        let lot = queries::get_lot(&conn, "aachen-kaiserplatz").unwrap().unwrap();
        assert_eq!(lot.name, "Parkhaus Kaiserplatz");
        assert_eq!(lot.address.as_deref(), Some("Kaiserplatz, 52062 Aachen"));
        let pool = queries::get_pool(&conn, "apag").unwrap().unwrap();
        assert_eq!(pool.source_url.as_deref(), Some("https://www.apag.de/parkobjekte"));
    }

    #[test]
    fn schema_errors_name_the_path() {
        let conn = open_in_memory().unwrap();
        let document = json!({
            "pool": {"id": "apag", "name": "Aachener Parkhaus GmbH"},
            "lots": [{
                "name": "Kaiserplatz",
                "type": "garage",
                "status": "open",
                "timestamp": "2024-03-01T12:00:00Z",
                "has_live_capacity": false
            }]
        });

        let err = store_snapshot_value(&conn, &document, true).unwrap_err();
        let DbError::Schema(schema) = err else {
            panic!("expected a schema error, got {err:?}");
        };
        assert_eq!(schema.path, "lots.0.id");
        assert_eq!(queries::get_pool(&conn, "apag").unwrap(), None);
    }

    #[test]
    fn overflowing_counts_are_rejected() {
        let conn = open_in_memory().unwrap();
        let document = json!({
            "pool": {"id": "apag", "name": "Aachener Parkhaus GmbH"},
            "lots": [{
                "id": "aachen-kaiserplatz",
                "name": "Kaiserplatz",
                "type": "garage",
                "status": "open",
                "timestamp": "2024-03-01T12:00:00Z",
                "num_occupied": -2,
                "capacity": i64::MAX,
                "has_live_capacity": false
            }]
        });

        let err = store_snapshot_value(&conn, &document, true).unwrap_err();
        assert!(matches!(err, DbError::Validation(ValidationError::CountOverflow { .. })));
        assert_eq!(queries::count_parking_data(&conn).unwrap(), 0);
    }

    #[test]
    fn stores_valid_document() {
        let conn = open_in_memory().unwrap();
        let document = json!({
            "pool": {"id": "apag", "name": "Aachener Parkhaus GmbH"},
            "lots": [{
                "id": "aachen-kaiserplatz",
                "name": "Kaiserplatz",
                "type": "garage",
                "status": "open",
                "timestamp": "2024-03-01T12:00:00Z",
                "num_free": 120,
                "has_live_capacity": false
            }]
        });

        let rows = store_snapshot_value(&conn, &document, true).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, at(0));
    }
}
