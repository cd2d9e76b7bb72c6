//! Row-level reads and writes of pools, lots and observations.
//!
//! Timestamps are bound as text and read back through `::TEXT` casts, see
//! [`crate::format_timestamp`] and [`crate::parse_timestamp`].

use std::str::FromStr;

use chrono::{DateTime, Utc};
use duckdb::{Connection, Row};
use park_api_database_models::{ParkingDataRow, ParkingLotRow, ParkingPoolRow};
use park_api_parking_models::{LotStatus, LotType};

use crate::{DbError, format_timestamp, parse_timestamp};

const POOL_COLUMNS: &str = "pool_id, name, public_url, source_url, timezone, attribution_license,
    attribution_contributor, attribution_url, date_created::TEXT, date_updated::TEXT";

const LOT_COLUMNS: &str = "lot_id, pool_id, name, lot_type, public_url, source_url, address,
    capacity, max_capacity, has_live_capacity, latitude, longitude, location_id, city_name,
    date_created::TEXT, date_updated::TEXT";

const DATA_COLUMNS: &str = "lot_id, timestamp::TEXT, lot_timestamp::TEXT, status, num_free,
    num_occupied, capacity, percent_free";

/// Result of mapping one row: `DuckDB` errors outside, conversion errors
/// inside.
type Mapped<T> = duckdb::Result<Result<T, DbError>>;

fn parse_enum<T: FromStr>(column: &str, token: &str) -> Result<T, DbError> {
    token.parse().map_err(|_| DbError::Conversion {
        message: format!("invalid {column} '{token}'"),
    })
}

fn parse_optional_timestamp(text: Option<String>) -> Result<Option<DateTime<Utc>>, DbError> {
    text.as_deref().map(parse_timestamp).transpose()
}

fn pool_from_row(row: &Row<'_>) -> Mapped<ParkingPoolRow> {
    let pool_id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let public_url: Option<String> = row.get(2)?;
    let source_url: Option<String> = row.get(3)?;
    let timezone: Option<String> = row.get(4)?;
    let attribution_license: Option<String> = row.get(5)?;
    let attribution_contributor: Option<String> = row.get(6)?;
    let attribution_url: Option<String> = row.get(7)?;
    let date_created: String = row.get(8)?;
    let date_updated: String = row.get(9)?;

    Ok((|| {
        Ok(ParkingPoolRow {
            pool_id,
            name,
            public_url,
            source_url,
            timezone,
            attribution_license,
            attribution_contributor,
            attribution_url,
            date_created: parse_timestamp(&date_created)?,
            date_updated: parse_timestamp(&date_updated)?,
        })
    })())
}

fn lot_from_row(row: &Row<'_>) -> Mapped<ParkingLotRow> {
    let lot_type: String = row.get(3)?;
    let date_created: String = row.get(14)?;
    let date_updated: String = row.get(15)?;
    let lot_id: String = row.get(0)?;
    let pool_id: String = row.get(1)?;
    let name: String = row.get(2)?;
    let public_url: Option<String> = row.get(4)?;
    let source_url: Option<String> = row.get(5)?;
    let address: Option<String> = row.get(6)?;
    let capacity: Option<i64> = row.get(7)?;
    let max_capacity: Option<i64> = row.get(8)?;
    let has_live_capacity: bool = row.get(9)?;
    let latitude: Option<f64> = row.get(10)?;
    let longitude: Option<f64> = row.get(11)?;
    let location_id: Option<String> = row.get(12)?;
    let city_name: Option<String> = row.get(13)?;

    Ok((|| {
        Ok(ParkingLotRow {
            lot_id,
            pool_id,
            name,
            lot_type: parse_enum::<LotType>("lot type", &lot_type)?,
            public_url,
            source_url,
            address,
            capacity,
            max_capacity,
            has_live_capacity,
            latitude,
            longitude,
            location_id,
            city_name,
            date_created: parse_timestamp(&date_created)?,
            date_updated: parse_timestamp(&date_updated)?,
        })
    })())
}

fn data_from_row(row: &Row<'_>) -> Mapped<ParkingDataRow> {
    let lot_id: String = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let lot_timestamp: Option<String> = row.get(2)?;
    let status: String = row.get(3)?;
    let num_free: Option<i64> = row.get(4)?;
    let num_occupied: Option<i64> = row.get(5)?;
    let capacity: Option<i64> = row.get(6)?;
    let percent_free: Option<f64> = row.get(7)?;

    Ok((|| {
        Ok(ParkingDataRow {
            lot_id,
            timestamp: parse_timestamp(&timestamp)?,
            lot_timestamp: parse_optional_timestamp(lot_timestamp)?,
            status: parse_enum::<LotStatus>("status", &status)?,
            num_free,
            num_occupied,
            capacity,
            percent_free,
        })
    })())
}

/// Maps a single-row lookup, treating "no rows" as `None`.
fn optional<T>(mapped: duckdb::Result<Result<T, DbError>>) -> Result<Option<T>, DbError> {
    match mapped {
        Ok(row) => row.map(Some),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Fetches a pool by id.
///
/// # Errors
///
/// Returns [`DbError`] if the query or a conversion fails.
pub fn get_pool(conn: &Connection, pool_id: &str) -> Result<Option<ParkingPoolRow>, DbError> {
    let mut stmt = conn.prepare(&format!("SELECT {POOL_COLUMNS} FROM parking_pool WHERE pool_id = ?"))?;
    optional(stmt.query_row([pool_id], pool_from_row))
}

/// All pools ordered by id.
///
/// # Errors
///
/// Returns [`DbError`] if the query or a conversion fails.
pub fn list_pools(conn: &Connection) -> Result<Vec<ParkingPoolRow>, DbError> {
    let mut stmt = conn.prepare(&format!("SELECT {POOL_COLUMNS} FROM parking_pool ORDER BY pool_id"))?;
    let rows = stmt.query_map([], pool_from_row)?;
    rows.map(|row| row?).collect()
}

/// Inserts a new pool.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails (e.g. the pool exists).
pub fn insert_pool(conn: &Connection, pool: &ParkingPoolRow) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO parking_pool (
            pool_id, name, public_url, source_url, timezone, attribution_license,
            attribution_contributor, attribution_url, date_created, date_updated
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        duckdb::params![
            pool.pool_id,
            pool.name,
            pool.public_url,
            pool.source_url,
            pool.timezone,
            pool.attribution_license,
            pool.attribution_contributor,
            pool.attribution_url,
            format_timestamp(&pool.date_created),
            format_timestamp(&pool.date_updated),
        ],
    )?;
    Ok(())
}

/// Overwrites the mutable fields of an existing pool.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub fn update_pool(conn: &Connection, pool: &ParkingPoolRow) -> Result<(), DbError> {
    conn.execute(
        "UPDATE parking_pool SET
            name = ?, public_url = ?, source_url = ?, timezone = ?, attribution_license = ?,
            attribution_contributor = ?, attribution_url = ?, date_updated = ?
         WHERE pool_id = ?",
        duckdb::params![
            pool.name,
            pool.public_url,
            pool.source_url,
            pool.timezone,
            pool.attribution_license,
            pool.attribution_contributor,
            pool.attribution_url,
            format_timestamp(&pool.date_updated),
            pool.pool_id,
        ],
    )?;
    Ok(())
}

/// Fetches a lot by id.
///
/// # Errors
///
/// Returns [`DbError`] if the query or a conversion fails.
pub fn get_lot(conn: &Connection, lot_id: &str) -> Result<Option<ParkingLotRow>, DbError> {
    let mut stmt = conn.prepare(&format!("SELECT {LOT_COLUMNS} FROM parking_lot WHERE lot_id = ?"))?;
    optional(stmt.query_row([lot_id], lot_from_row))
}

/// Lots of a pool ordered by id.
///
/// # Errors
///
/// Returns [`DbError`] if the query or a conversion fails.
pub fn lots_of_pool(conn: &Connection, pool_id: &str) -> Result<Vec<ParkingLotRow>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LOT_COLUMNS} FROM parking_lot WHERE pool_id = ? ORDER BY lot_id"
    ))?;
    let rows = stmt.query_map([pool_id], lot_from_row)?;
    rows.map(|row| row?).collect()
}

/// Lots with coordinates but no assigned location, ordered by id.
///
/// # Errors
///
/// Returns [`DbError`] if the query or a conversion fails.
pub fn lots_without_location(conn: &Connection) -> Result<Vec<ParkingLotRow>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LOT_COLUMNS} FROM parking_lot
         WHERE location_id IS NULL AND latitude IS NOT NULL AND longitude IS NOT NULL
         ORDER BY lot_id"
    ))?;
    let rows = stmt.query_map([], lot_from_row)?;
    rows.map(|row| row?).collect()
}

/// Inserts a new lot.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails (e.g. the lot exists).
pub fn insert_lot(conn: &Connection, lot: &ParkingLotRow) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO parking_lot (
            lot_id, pool_id, name, lot_type, public_url, source_url, address, capacity,
            max_capacity, has_live_capacity, latitude, longitude, location_id, city_name,
            date_created, date_updated
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        duckdb::params![
            lot.lot_id,
            lot.pool_id,
            lot.name,
            lot.lot_type.as_ref(),
            lot.public_url,
            lot.source_url,
            lot.address,
            lot.capacity,
            lot.max_capacity,
            lot.has_live_capacity,
            lot.latitude,
            lot.longitude,
            lot.location_id,
            lot.city_name,
            format_timestamp(&lot.date_created),
            format_timestamp(&lot.date_updated),
        ],
    )?;
    Ok(())
}

/// Overwrites the mutable fields of an existing lot.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub fn update_lot(conn: &Connection, lot: &ParkingLotRow) -> Result<(), DbError> {
    conn.execute(
        "UPDATE parking_lot SET
            pool_id = ?, name = ?, lot_type = ?, public_url = ?, source_url = ?, address = ?,
            capacity = ?, max_capacity = ?, has_live_capacity = ?, latitude = ?, longitude = ?,
            location_id = ?, city_name = ?, date_updated = ?
         WHERE lot_id = ?",
        duckdb::params![
            lot.pool_id,
            lot.name,
            lot.lot_type.as_ref(),
            lot.public_url,
            lot.source_url,
            lot.address,
            lot.capacity,
            lot.max_capacity,
            lot.has_live_capacity,
            lot.latitude,
            lot.longitude,
            lot.location_id,
            lot.city_name,
            format_timestamp(&lot.date_updated),
            lot.lot_id,
        ],
    )?;
    Ok(())
}

/// Appends one observation to the time series.
///
/// # Errors
///
/// Returns [`DbError::DuckDb`] on a constraint violation, i.e. when the lot
/// already has an observation at this timestamp.
pub fn insert_parking_data(conn: &Connection, data: &ParkingDataRow) -> Result<(), DbError> {
    write_data_row(conn, "parking_data", data)
}

/// Time series of a lot, oldest first.
///
/// # Errors
///
/// Returns [`DbError`] if the query or a conversion fails.
pub fn parking_data_of_lot(conn: &Connection, lot_id: &str) -> Result<Vec<ParkingDataRow>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DATA_COLUMNS} FROM parking_data WHERE lot_id = ? ORDER BY timestamp"
    ))?;
    let rows = stmt.query_map([lot_id], data_from_row)?;
    rows.map(|row| row?).collect()
}

/// Number of stored observations.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn count_parking_data(conn: &Connection) -> Result<u64, DbError> {
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM parking_data")?;
    let count: i64 = stmt.query_row([], |row| row.get(0))?;
    #[allow(clippy::cast_sign_loss)]
    Ok(count as u64)
}

/// The latest observation of a lot.
///
/// # Errors
///
/// Returns [`DbError`] if the query or a conversion fails.
pub fn get_latest(conn: &Connection, lot_id: &str) -> Result<Option<ParkingDataRow>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DATA_COLUMNS} FROM latest_parking_data WHERE lot_id = ?"
    ))?;
    optional(stmt.query_row([lot_id], data_from_row))
}

/// Creates the latest observation of a lot.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub fn insert_latest(conn: &Connection, data: &ParkingDataRow) -> Result<(), DbError> {
    write_data_row(conn, "latest_parking_data", data)
}

/// Overwrites the latest observation of a lot.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub fn update_latest(conn: &Connection, data: &ParkingDataRow) -> Result<(), DbError> {
    conn.execute(
        "UPDATE latest_parking_data SET
            timestamp = ?, lot_timestamp = ?, status = ?, num_free = ?, num_occupied = ?,
            capacity = ?, percent_free = ?
         WHERE lot_id = ?",
        duckdb::params![
            format_timestamp(&data.timestamp),
            data.lot_timestamp.as_ref().map(format_timestamp),
            data.status.as_ref(),
            data.num_free,
            data.num_occupied,
            data.capacity,
            data.percent_free,
            data.lot_id,
        ],
    )?;
    Ok(())
}

fn write_data_row(conn: &Connection, table: &str, data: &ParkingDataRow) -> Result<(), DbError> {
    conn.execute(
        &format!(
            "INSERT INTO {table} (
                lot_id, timestamp, lot_timestamp, status, num_free, num_occupied, capacity,
                percent_free
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        ),
        duckdb::params![
            data.lot_id,
            format_timestamp(&data.timestamp),
            data.lot_timestamp.as_ref().map(format_timestamp),
            data.status.as_ref(),
            data.num_free,
            data.num_occupied,
            data.capacity,
            data.percent_free,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};

    use super::*;
    use crate::open_in_memory;

    fn pool() -> ParkingPoolRow {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        ParkingPoolRow {
            pool_id: "apag".to_string(),
            name: "Aachener Parkhaus GmbH".to_string(),
            public_url: Some("https://www.apag.de".to_string()),
            source_url: None,
            timezone: Some("Europe/Berlin".to_string()),
            attribution_license: None,
            attribution_contributor: None,
            attribution_url: None,
            date_created: now,
            date_updated: now,
        }
    }

    fn data(minute: u32) -> ParkingDataRow {
        ParkingDataRow {
            lot_id: "aachen-kaiserplatz".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap(),
            lot_timestamp: None,
            status: LotStatus::Open,
            num_free: Some(45),
            num_occupied: Some(255),
            capacity: Some(300),
            percent_free: Some(15.0),
        }
    }

    #[test]
    fn pool_round_trip() {
        let conn = open_in_memory().unwrap();
        assert_eq!(get_pool(&conn, "apag").unwrap(), None);
        insert_pool(&conn, &pool()).unwrap();
        assert_eq!(get_pool(&conn, "apag").unwrap(), Some(pool()));
        assert_eq!(list_pools(&conn).unwrap().len(), 1);
    }

    #[test]
    fn parking_data_is_unique_per_timestamp() {
        let conn = open_in_memory().unwrap();
        insert_parking_data(&conn, &data(0)).unwrap();
        insert_parking_data(&conn, &data(5)).unwrap();
        assert!(insert_parking_data(&conn, &data(5)).is_err());

        let series = parking_data_of_lot(&conn, "aachen-kaiserplatz").unwrap();
        assert_eq!(series, vec![data(0), data(5)]);
        assert_eq!(count_parking_data(&conn).unwrap(), 2);
    }

    #[test]
    fn latest_is_overwritten() {
        let conn = open_in_memory().unwrap();
        insert_latest(&conn, &data(0)).unwrap();
        update_latest(&conn, &data(5)).unwrap();
        assert_eq!(get_latest(&conn, "aachen-kaiserplatz").unwrap(), Some(data(5)));
    }
}
