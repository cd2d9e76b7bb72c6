#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` storage of parking snapshots.
//!
//! One database file holds the pools, lots, the append-only observation
//! time series, the latest observation per lot and the scrape error log.
//! [`store::store_snapshot`] persists one pool's snapshot in a single
//! transaction.

pub mod error_log;
pub mod locations;
pub mod paths;
pub mod queries;
pub mod store;

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, SubsecRound as _, Utc};
use duckdb::Connection;
use park_api_parking_models::ValidationError;
use park_api_snapshot_models::SchemaError;

/// Storage format of timestamps (UTC, microseconds like `DuckDB`'s
/// `TIMESTAMP`).
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error (includes constraint violations).
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot document does not match the schema.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// An observation's counts do not add up.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Snapshots of failed scrapes are not stored.
    #[error("Snapshot of pool '{pool_id}' is a failed scrape: {error}")]
    FailedSnapshot {
        /// Pool of the snapshot.
        pool_id: String,
        /// The scrape error.
        error: String,
    },

    /// A lot appears twice in one snapshot.
    #[error("Lot '{lot_id}' appears twice in snapshot of pool '{pool_id}'")]
    DuplicateLot {
        /// Pool of the snapshot.
        pool_id: String,
        /// Duplicated lot.
        lot_id: String,
    },

    /// A location resolver failed.
    #[error("Location lookup for lot '{lot_id}' failed: {message}")]
    Location {
        /// Lot being resolved.
        lot_id: String,
        /// Resolver error.
        message: String,
    },

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

impl DbError {
    /// Stable name of the error kind, used in failure records.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Schema(_) => "SchemaError",
            Self::Validation(_) => "ValidationError",
            Self::DuckDb(_) | Self::Io(_) | Self::Conversion { .. } => "StorageError",
            Self::FailedSnapshot { .. } => "FailedSnapshotError",
            Self::DuplicateLot { .. } => "DuplicateLotError",
            Self::Location { .. } => "LocationError",
        }
    }
}

/// Opens (or creates) the database at `path` and ensures the schema
/// exists.
///
/// # Errors
///
/// Returns [`DbError`] if the directory, connection or schema creation
/// fails.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent() {
        paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;
    create_schema(&conn)?;
    log::debug!("opened parking database at {}", path.display());

    Ok(conn)
}

/// Opens an in-memory database with the schema.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open_in_memory() -> Result<Connection, DbError> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(conn)
}

/// Creates all tables if they do not exist.
///
/// # Errors
///
/// Returns [`DbError`] if a statement fails.
pub fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS parking_pool (
            pool_id TEXT NOT NULL PRIMARY KEY,
            name TEXT NOT NULL,
            public_url TEXT,
            source_url TEXT,
            timezone TEXT,
            attribution_license TEXT,
            attribution_contributor TEXT,
            attribution_url TEXT,
            date_created TIMESTAMP NOT NULL,
            date_updated TIMESTAMP NOT NULL
        );

        CREATE TABLE IF NOT EXISTS parking_lot (
            lot_id TEXT NOT NULL PRIMARY KEY,
            pool_id TEXT NOT NULL,
            name TEXT NOT NULL,
            lot_type TEXT NOT NULL,
            public_url TEXT,
            source_url TEXT,
            address TEXT,
            capacity BIGINT,
            max_capacity BIGINT,
            has_live_capacity BOOLEAN NOT NULL DEFAULT FALSE,
            latitude DOUBLE,
            longitude DOUBLE,
            location_id TEXT,
            city_name TEXT,
            date_created TIMESTAMP NOT NULL,
            date_updated TIMESTAMP NOT NULL
        );

        CREATE TABLE IF NOT EXISTS parking_data (
            lot_id TEXT NOT NULL,
            timestamp TIMESTAMP NOT NULL,
            lot_timestamp TIMESTAMP,
            status TEXT NOT NULL,
            num_free BIGINT,
            num_occupied BIGINT,
            capacity BIGINT,
            percent_free DOUBLE,
            UNIQUE (timestamp, lot_id)
        );

        CREATE TABLE IF NOT EXISTS latest_parking_data (
            lot_id TEXT NOT NULL PRIMARY KEY,
            timestamp TIMESTAMP NOT NULL,
            lot_timestamp TIMESTAMP,
            status TEXT NOT NULL,
            num_free BIGINT,
            num_occupied BIGINT,
            capacity BIGINT,
            percent_free DOUBLE
        );

        CREATE TABLE IF NOT EXISTS error_log (
            timestamp TIMESTAMP NOT NULL,
            source TEXT NOT NULL,
            module_name TEXT,
            pool_id TEXT,
            text TEXT NOT NULL,
            stacktrace TEXT
        );",
    )?;

    Ok(())
}

/// Truncates a timestamp to the precision it is stored with.
#[must_use]
pub fn storage_precision(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(6)
}

/// Formats a timestamp for storage.
#[must_use]
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a `DuckDB` timestamp text representation into a UTC `DateTime`.
///
/// `DuckDB`'s `::TEXT` cast can produce fractional seconds and offsets
/// depending on the stored precision; naive values are UTC.
///
/// # Errors
///
/// Returns [`DbError::Conversion`] if no known format matches.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, DbError> {
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%#z") {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(DbError::Conversion {
        message: format!("unparsable timestamp {text:?}"),
    })
}
