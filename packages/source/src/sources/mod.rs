//! Built-in parking data sources.
//!
//! Each module implements [`ParkingSource`](crate::ParkingSource) for one
//! provider and is listed in [`crate::registry`].

pub mod aarhus;
pub mod apag;
pub mod bahn;
pub mod dresden;
pub mod ffh;
pub mod frankfurt;
