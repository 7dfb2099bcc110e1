//! Geographic coordinates and great-circle distance.
//!
//! Coordinates follow the GeoJSON convention of longitude first. Distances are
//! computed on a spherical earth with the haversine formula, which is what a
//! `2dsphere`-style proximity index reports as well.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Mean earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lng: f64,
    pub lat: f64,
}

impl GeoPoint {
    /// Builds a point, rejecting non-finite or out-of-range coordinates.
    pub fn new(lng: f64, lat: f64) -> Result<Self> {
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(Error::InvalidRequest {
                reason: format!("longitude {lng} is outside [-180, 180]"),
            });
        }
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(Error::InvalidRequest {
                reason: format!("latitude {lat} is outside [-90, 90]"),
            });
        }
        Ok(Self { lng, lat })
    }

    /// Great-circle distance to `other`, in meters.
    #[must_use]
    pub fn distance_m(&self, other: &Self) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
    }

    /// Returns the point `meters` due north of this one.
    ///
    /// Handy for laying out fixtures at known distances.
    #[must_use]
    pub fn north_by(&self, meters: f64) -> Self {
        Self {
            lng: self.lng,
            lat: self.lat + (meters / EARTH_RADIUS_M).to_degrees(),
        }
    }
}
