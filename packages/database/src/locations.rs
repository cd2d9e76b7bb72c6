//! Assignment of locations to stored lots.
//!
//! The lookup itself (live API, cache, local dataset) is left to a
//! [`LocationResolver`] implementation.

use std::fmt::Display;

use duckdb::Connection;

use crate::{DbError, queries};

/// Location of a point as returned by a resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    /// Opaque location identifier.
    pub location_id: String,
    /// Name of the containing city.
    pub city_name: String,
}

/// Resolves coordinates to a location.
pub trait LocationResolver {
    /// Lookup failure.
    type Error: Display;

    /// Location containing the point, or `None` if unknown.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error if the lookup fails.
    fn resolve(&self, latitude: f64, longitude: f64) -> Result<Option<ResolvedLocation>, Self::Error>;
}

/// Fills `location_id` and `city_name` of every lot with coordinates and no
/// location yet. Returns the number of lots updated.
///
/// # Errors
///
/// Returns [`DbError::Location`] on the first resolver failure, or
/// [`DbError`] if a query fails. Lots updated before the failure stay
/// updated.
pub fn assign_locations<R: LocationResolver>(conn: &Connection, resolver: &R) -> Result<usize, DbError> {
    let mut assigned = 0;

    for mut lot in queries::lots_without_location(conn)? {
        let (Some(latitude), Some(longitude)) = (lot.latitude, lot.longitude) else {
            continue;
        };

        let resolved = resolver
            .resolve(latitude, longitude)
            .map_err(|e| DbError::Location {
                lot_id: lot.lot_id.clone(),
                message: e.to_string(),
            })?;

        let Some(location) = resolved else {
            log::debug!("no location for lot '{}' at ({latitude}, {longitude})", lot.lot_id);
            continue;
        };

        lot.location_id = Some(location.location_id);
        lot.city_name = Some(location.city_name);
        queries::update_lot(conn, &lot)?;
        assigned += 1;
    }

    log::info!("assigned locations to {assigned} lots");
    Ok(assigned)
}
