//! Geofence description attached to a session.

use serde::{Deserialize, Serialize};

/// A WGS-84 coordinate in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether both coordinates are finite and within range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Where a session takes place and how strictly that is checked.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub center: GeoPoint,
    pub radius_m: f64,
    /// Out-of-radius scans are blocked when set, otherwise only flagged.
    pub enforce: bool,
    /// Access-point BSSIDs that count as being in the room.
    pub allowed_bssids: Vec<String>,
}
