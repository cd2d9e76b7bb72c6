//! Static geo-index: lot metadata stored as a GeoJSON `FeatureCollection`.
//!
//! Feature properties hold the [`LotInfo`] fields, a `Point` geometry holds
//! `[longitude, latitude]`. The same format is produced by
//! [`lot_infos_to_geojson`] to seed new geo-index files.

use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use park_api_parking_models::{LotInfo, LotType};
use serde::Deserialize;

use crate::SourceError;

#[derive(Debug, Deserialize)]
struct LotProperties {
    id: String,
    name: String,
    #[serde(default, rename = "type")]
    lot_type: Option<LotType>,
    #[serde(default)]
    public_url: Option<String>,
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    capacity: Option<i64>,
    #[serde(default)]
    has_live_capacity: bool,
}

fn static_error(message: impl Into<String>) -> SourceError {
    SourceError::StaticInfo {
        message: message.into(),
    }
}

fn geometry_name(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

/// Parses a geo-index into lot infos.
///
/// # Errors
///
/// Returns [`SourceError::StaticInfo`] if the text is not a GeoJSON
/// `FeatureCollection`, a feature lacks required properties, or a geometry
/// is not a `Point` with at least two coordinates; [`SourceError::Validation`] if a lot type cannot be
/// determined.
pub fn lot_infos_from_geojson(text: &str) -> Result<Vec<LotInfo>, SourceError> {
    let geojson: GeoJson = text
        .parse()
        .map_err(|e| static_error(format!("invalid GeoJSON: {e}")))?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(static_error("expected a FeatureCollection"));
    };

    collection
        .features
        .into_iter()
        .map(|feature| {
            let properties = feature.properties.unwrap_or_default();
            let props: LotProperties =
                serde_json::from_value(serde_json::Value::Object(properties))
                    .map_err(|e| static_error(format!("invalid lot properties: {e}")))?;

            let (latitude, longitude) = match feature.geometry.map(|g| g.value) {
                None => (None, None),
                Some(Value::Point(coordinates)) => match coordinates[..] {
                    [longitude, latitude, ..] => (Some(latitude), Some(longitude)),
                    _ => {
                        return Err(static_error(format!(
                            "Point of lot '{}' needs longitude and latitude, got {} coordinates",
                            props.id,
                            coordinates.len()
                        )));
                    }
                },
                Some(other) => {
                    return Err(static_error(format!(
                        "geometry type '{}' for lot '{}' not supported",
                        geometry_name(&other),
                        props.id
                    )));
                }
            };

            let mut info = LotInfo::new(&props.id, &props.name, props.lot_type)?
                .with_capacity(props.capacity)
                .with_live_capacity(props.has_live_capacity)
                .with_coordinates(latitude, longitude);
            if let Some(url) = props.public_url {
                info = info.with_public_url(url);
            }
            if let Some(url) = props.source_url {
                info = info.with_source_url(url);
            }
            if let Some(address) = props.address {
                info = info.with_address(address);
            }
            Ok(info)
        })
        .collect()
}

/// Renders lot infos as a geo-index `FeatureCollection`.
///
/// # Errors
///
/// Returns [`SourceError::StaticInfo`] if a lot cannot be serialized.
pub fn lot_infos_to_geojson(infos: &[LotInfo]) -> Result<FeatureCollection, SourceError> {
    let features = infos
        .iter()
        .map(|info| {
            let mut properties: JsonObject = match serde_json::to_value(info) {
                Ok(serde_json::Value::Object(map)) => map,
                Ok(_) => return Err(static_error("lot info is not an object")),
                Err(e) => return Err(static_error(e.to_string())),
            };
            properties.remove("latitude");
            properties.remove("longitude");

            let geometry = match (info.latitude, info.longitude) {
                (Some(latitude), Some(longitude)) => {
                    Some(Geometry::new(Value::Point(vec![longitude, latitude])))
                }
                _ => None,
            };

            Ok(Feature {
                bbox: None,
                geometry,
                id: None,
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}
