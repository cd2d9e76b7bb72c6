//! Central validation of snapshot documents at the ingestion boundary.
//!
//! Documents are checked against the embedded JSON schema
//! (`snapshot.schema.json`) and only then deserialized into a typed
//! [`Snapshot`]. Good-practice checks produce non-fatal
//! [`SchemaWarning`]s.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, JSONSchema};
use park_api_parking_models::LotType;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{Snapshot, SnapshotLot, SnapshotPool};

/// Lot fields the schema only types as strings.
const TIMESTAMP_FIELDS: [&str; 2] = ["timestamp", "lot_timestamp"];

static SCHEMA: LazyLock<JSONSchema> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(include_str!("snapshot.schema.json"))
        .expect("valid snapshot schema JSON");
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .expect("valid snapshot schema")
});

/// A snapshot document that violates the required shape or typing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("Schema error at '{path}': {message}")]
pub struct SchemaError {
    /// Dotted path of the offending value (e.g. `lots.3.id`).
    pub path: String,
    /// What is wrong with it.
    pub message: String,
}

/// A good-practice finding that does not invalidate the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaWarning {
    /// Dotted path of the value concerned.
    pub path: String,
    /// Description of the finding.
    pub message: String,
}

/// Full result of validating one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Fatal findings.
    pub errors: Vec<SchemaError>,
    /// Non-fatal findings.
    pub warnings: Vec<SchemaWarning>,
}

impl ValidationReport {
    /// `true` if the document has no fatal findings.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Converts a JSON pointer (`/lots/3`) into a dotted path (`lots.3`).
fn dotted(pointer: &str) -> String {
    pointer.trim_start_matches('/').replace('/', ".")
}

fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{base}.{key}")
    }
}

/// Returns every schema violation of `document`.
#[must_use]
pub fn schema_errors(document: &Value) -> Vec<SchemaError> {
    let Err(errors) = SCHEMA.validate(document) else {
        return Vec::new();
    };

    errors
        .map(|error| {
            let base = dotted(&error.instance_path.to_string());
            let path = match &error.kind {
                ValidationErrorKind::Required { property } => {
                    join_path(&base, property.as_str().unwrap_or_default())
                }
                _ => base,
            };
            SchemaError {
                path,
                message: error.to_string(),
            }
        })
        .collect()
}

/// Deserializes `value`, reporting failures at `path`.
fn typed<T: DeserializeOwned>(value: &Value, path: impl FnOnce() -> String) -> Result<T, SchemaError> {
    serde_json::from_value(value.clone()).map_err(|e| SchemaError {
        path: path(),
        message: e.to_string(),
    })
}

fn typed_lot(index: usize, lot: &Value) -> Result<SnapshotLot, SchemaError> {
    for key in TIMESTAMP_FIELDS {
        if let Some(value) = lot.get(key) {
            typed::<Option<DateTime<Utc>>>(value, || format!("lots.{index}.{key}"))?;
        }
    }
    typed(lot, || format!("lots.{index}"))
}

/// Validates a snapshot document and deserializes it.
///
/// # Errors
///
/// Returns the first [`SchemaError`] if the document does not match the
/// snapshot schema or cannot be deserialized (e.g. a malformed timestamp
/// at `lots.0.timestamp`).
pub fn validate_snapshot(document: &Value) -> Result<Snapshot, SchemaError> {
    if let Some(error) = schema_errors(document).into_iter().next() {
        return Err(error);
    }

    let pool: SnapshotPool = typed(&document["pool"], || "pool".to_string())?;
    let lots = document["lots"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(index, lot)| typed_lot(index, lot))
        .collect::<Result<Vec<_>, _>>()?;
    let error = typed(&document["error"], || "error".to_string())?;

    Ok(Snapshot { pool, lots, error })
}

/// Validates a document and collects errors and good-practice warnings.
///
/// A set `error` field counts as a fatal finding.
#[must_use]
pub fn validation_report(document: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();

    match validate_snapshot(document) {
        Err(error) => {
            report.errors = schema_errors(document);
            // deserialization failures are not schema violations
            if report.errors.is_empty() {
                report.errors.push(error);
            }
        }
        Ok(snapshot) => {
            if let Some(message) = &snapshot.error {
                report.errors.push(SchemaError {
                    path: "error".to_string(),
                    message: message.clone(),
                });
            }
            report.warnings = good_practice_warnings(&snapshot);
        }
    }

    report
}

/// Non-fatal checks on a well-formed snapshot.
pub(crate) fn good_practice_warnings(snapshot: &Snapshot) -> Vec<SchemaWarning> {
    let mut warnings = Vec::new();
    let pool = &snapshot.pool;

    for (key, value) in [
        ("attribution_license", &pool.attribution_license),
        ("attribution_contributor", &pool.attribution_contributor),
        ("attribution_url", &pool.attribution_url),
    ] {
        if value.is_none() {
            warnings.push(SchemaWarning {
                path: format!("pool.{key}"),
                message: format!("Pool '{}' should have '{key}'", pool.id),
            });
        }
    }

    for (i, lot) in snapshot.lots.iter().enumerate() {
        if lot.lot_type == LotType::Unknown {
            warnings.push(SchemaWarning {
                path: format!("lots.{i}.type"),
                message: format!("Lot '{}' should have a type other than 'unknown'", lot.id),
            });
        }

        for (key, missing) in [
            ("latitude", lot.latitude.is_none()),
            ("longitude", lot.longitude.is_none()),
            ("address", lot.address.is_none()),
            ("capacity", lot.capacity.is_none()),
        ] {
            if missing {
                warnings.push(SchemaWarning {
                    path: format!("lots.{i}.{key}"),
                    message: format!("Lot '{}' should have '{key}'", lot.id),
                });
            }
        }

        if lot.num_free.is_none() && lot.num_occupied.is_none() {
            warnings.push(SchemaWarning {
                path: format!("lots.{i}.num_free"),
                message: format!("Lot '{}' should have 'num_free' or 'num_occupied'", lot.id),
            });
        }

        if lot.num_occupied.is_some() && lot.num_free.is_none() && lot.capacity.is_none() {
            warnings.push(SchemaWarning {
                path: format!("lots.{i}.capacity"),
                message: format!(
                    "Lot '{}' should have 'capacity' when defining 'num_occupied'",
                    lot.id
                ),
            });
        }
    }

    if !warnings.is_empty() {
        log::debug!(
            "Snapshot of pool '{}' has {} good-practice warnings",
            pool.id,
            warnings.len()
        );
    }

    warnings
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn lot(id: &str) -> Value {
        json!({
            "id": id,
            "name": "Parkhaus Kaiserplatz",
            "type": "garage",
            "status": "open",
            "timestamp": "2024-03-01T12:00:00Z",
            "num_free": 120,
            "capacity": 300,
            "latitude": 50.7753,
            "longitude": 6.0931,
            "address": "Kaiserplatz",
            "has_live_capacity": false
        })
    }

    fn document(lots: Vec<Value>) -> Value {
        json!({
            "pool": {
                "id": "apag",
                "name": "Aachener Parkhaus GmbH",
                "attribution_license": "CC-BY",
                "attribution_contributor": "APAG",
                "attribution_url": "https://www.apag.de"
            },
            "lots": lots
        })
    }

    #[test]
    fn accepts_valid_document() {
        let snapshot = validate_snapshot(&document(vec![lot("aachen-kaiserplatz")])).unwrap();
        assert_eq!(snapshot.lots.len(), 1);
        assert!(snapshot.warnings().is_empty());
    }

    #[test]
    fn names_missing_lot_field_path() {
        let mut lots: Vec<Value> = (0..4).map(|i| lot(&format!("lot-{i}"))).collect();
        if let Some(object) = lots[3].as_object_mut() {
            object.remove("id");
        }
        let err = validate_snapshot(&document(lots)).unwrap_err();
        assert_eq!(err.path, "lots.3.id");
    }

    #[test]
    fn rejects_unknown_status_token() {
        let mut bad = lot("aachen-kaiserplatz");
        bad["status"] = json!("Frei");
        let err = validate_snapshot(&document(vec![bad])).unwrap_err();
        assert_eq!(err.path, "lots.0.status");
    }

    #[test]
    fn rejects_negative_capacity() {
        let mut bad = lot("aachen-kaiserplatz");
        bad["capacity"] = json!(-1);
        let err = validate_snapshot(&document(vec![bad])).unwrap_err();
        assert_eq!(err.path, "lots.0.capacity");
    }

    #[test]
    fn rejects_missing_pool() {
        let err = validate_snapshot(&json!({ "lots": [] })).unwrap_err();
        assert_eq!(err.path, "pool");
    }

    #[test]
    fn names_malformed_timestamp_path() {
        let mut bad = lot("aachen-kaiserplatz");
        bad["timestamp"] = json!("yesterday");
        let err = validate_snapshot(&document(vec![lot("aachen-elisenbrunnen"), bad])).unwrap_err();
        assert_eq!(err.path, "lots.1.timestamp");

        let mut bad = lot("aachen-kaiserplatz");
        bad["lot_timestamp"] = json!("2024-13-01T00:00:00Z");
        let report = validation_report(&document(vec![bad]));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, "lots.0.lot_timestamp");
    }

    #[test]
    fn reports_good_practice_warnings() {
        let mut sparse = lot("aachen-kaiserplatz");
        sparse["type"] = json!("unknown");
        sparse["num_free"] = Value::Null;
        sparse["capacity"] = Value::Null;
        sparse["num_occupied"] = json!(10);
        let report = validation_report(&document(vec![sparse]));
        assert!(report.is_valid());
        let paths: Vec<&str> = report.warnings.iter().map(|w| w.path.as_str()).collect();
        assert!(paths.contains(&"lots.0.type"));
        assert!(paths.contains(&"lots.0.capacity"));
        assert!(!paths.contains(&"lots.0.num_free"));
    }

    #[test]
    fn error_field_is_fatal_in_report() {
        let mut failed = document(vec![]);
        failed["error"] = json!("HTTP 500");
        let report = validation_report(&failed);
        assert!(!report.is_valid());
        assert_eq!(report.errors[0].path, "error");
    }
}
