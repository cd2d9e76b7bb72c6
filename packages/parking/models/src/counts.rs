//! Free/occupied/capacity reconciliation.
//!
//! Shared by [`LotData`](crate::LotData) construction and by the storage
//! layer, which re-validates counts before persisting an observation.

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// The three occupancy counts of one observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    /// Number of free spaces.
    pub num_free: Option<i64>,
    /// Number of occupied spaces.
    pub num_occupied: Option<i64>,
    /// Number of total spaces.
    pub capacity: Option<i64>,
}

impl Counts {
    /// Creates a new set of counts.
    #[must_use]
    pub const fn new(num_free: Option<i64>, num_occupied: Option<i64>, capacity: Option<i64>) -> Self {
        Self {
            num_free,
            num_occupied,
            capacity,
        }
    }

    /// Derives the missing count from `capacity` and checks consistency.
    ///
    /// With a known capacity and exactly one of `num_free`/`num_occupied`,
    /// the other is set to `capacity - given`. With all three known they
    /// must satisfy `num_free + num_occupied == capacity`. Without a
    /// capacity the counts are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InconsistentCounts`] if all three counts
    /// are given and do not add up, and [`ValidationError::CountOverflow`]
    /// if the arithmetic leaves the `i64` range.
    pub fn reconcile(self, lot_id: &str) -> Result<Self, ValidationError> {
        let Some(capacity) = self.capacity else {
            return Ok(self);
        };

        let overflow = || ValidationError::CountOverflow {
            lot_id: lot_id.to_string(),
        };

        match (self.num_free, self.num_occupied) {
            (Some(free), None) => Ok(Self {
                num_occupied: Some(capacity.checked_sub(free).ok_or_else(overflow)?),
                ..self
            }),
            (None, Some(occupied)) => Ok(Self {
                num_free: Some(capacity.checked_sub(occupied).ok_or_else(overflow)?),
                ..self
            }),
            (Some(free), Some(occupied)) if free.checked_add(occupied).ok_or_else(overflow)? != capacity => {
                Err(ValidationError::InconsistentCounts {
                    lot_id: lot_id.to_string(),
                    num_free: free,
                    num_occupied: occupied,
                    capacity,
                })
            }
            _ => Ok(self),
        }
    }

    /// Percentage of free spaces, rounded to two decimals.
    ///
    /// `None` unless both `num_free` and a positive `capacity` are known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent_free(&self) -> Option<f64> {
        match (self.num_free, self.capacity) {
            (Some(free), Some(capacity)) if capacity > 0 => {
                Some((free as f64 * 10_000.0 / capacity as f64).round() / 100.0)
            }
            _ => None,
        }
    }
}
