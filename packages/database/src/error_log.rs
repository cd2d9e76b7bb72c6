//! Persisted scrape failures.

use duckdb::{Connection, Row};
use park_api_database_models::ErrorLogRow;

use crate::{DbError, format_timestamp, parse_timestamp};

/// Records one failure.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub fn insert_error(conn: &Connection, entry: &ErrorLogRow) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO error_log (timestamp, source, module_name, pool_id, text, stacktrace)
         VALUES (?, ?, ?, ?, ?, ?)",
        duckdb::params![
            format_timestamp(&entry.timestamp),
            entry.source,
            entry.module_name,
            entry.pool_id,
            entry.text,
            entry.stacktrace,
        ],
    )?;
    log::debug!("logged {} failure of {:?}", entry.source, entry.pool_id);
    Ok(())
}

fn error_from_row(row: &Row<'_>) -> duckdb::Result<Result<ErrorLogRow, DbError>> {
    let timestamp: String = row.get(0)?;
    let source: String = row.get(1)?;
    let module_name: Option<String> = row.get(2)?;
    let pool_id: Option<String> = row.get(3)?;
    let text: String = row.get(4)?;
    let stacktrace: Option<String> = row.get(5)?;

    Ok(parse_timestamp(&timestamp).map(|timestamp| ErrorLogRow {
        timestamp,
        source,
        module_name,
        pool_id,
        text,
        stacktrace,
    }))
}

/// The most recent failures, newest first.
///
/// # Errors
///
/// Returns [`DbError`] if the query or a conversion fails.
pub fn recent_errors(conn: &Connection, limit: usize) -> Result<Vec<ErrorLogRow>, DbError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT timestamp::TEXT, source, module_name, pool_id, text, stacktrace
         FROM error_log ORDER BY timestamp DESC LIMIT ?",
    )?;
    let rows = stmt.query_map([limit], error_from_row)?;
    rows.map(|row| row?).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};

    use super::*;
    use crate::open_in_memory;

    fn entry(minute: u32, pool_id: &str) -> ErrorLogRow {
        ErrorLogRow {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap(),
            source: "pool".to_string(),
            module_name: Some("dresden".to_string()),
            pool_id: Some(pool_id.to_string()),
            text: "ExtractionError: no lot table".to_string(),
            stacktrace: Some("ExtractionError: no lot table".to_string()),
        }
    }

    #[test]
    fn returns_newest_first() {
        let conn = open_in_memory().unwrap();
        insert_error(&conn, &entry(0, "dresden")).unwrap();
        insert_error(&conn, &entry(5, "apag")).unwrap();
        insert_error(&conn, &entry(10, "ffh")).unwrap();

        let errors = recent_errors(&conn, 2).unwrap();
        assert_eq!(errors, vec![entry(10, "ffh"), entry(5, "apag")]);
    }
}
