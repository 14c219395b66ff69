//! Geofence validation.
//!
//! Distance is the great-circle (haversine) distance on a spherical Earth,
//! which is accurate to well under a metre at classroom scale.

use baton_types::{GeoPoint, Geofence};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance between two points, in metres.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Result of a location check.
#[derive(Clone, Debug, PartialEq)]
pub enum LocationVerdict {
    /// Inside the fence, matched by BSSID, or no fence configured.
    Allowed { distance_m: Option<f64> },
    /// Suspicious but not blocking; the reason goes into the audit row.
    Warn { reason: String, distance_m: Option<f64> },
    /// Rejected with `LOCATION_VIOLATION`.
    Block { reason: String, distance_m: Option<f64> },
}

impl LocationVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Block { .. })
    }

    pub fn distance_m(&self) -> Option<f64> {
        match self {
            Self::Allowed { distance_m }
            | Self::Warn { distance_m, .. }
            | Self::Block { distance_m, .. } => *distance_m,
        }
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            Self::Warn { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

fn bssid_matches(allowed: &[String], bssid: Option<&str>) -> bool {
    let Some(bssid) = bssid.map(str::trim).filter(|b| !b.is_empty()) else {
        return false;
    };
    allowed.iter().any(|a| a.trim().eq_ignore_ascii_case(bssid))
}

/// Check a scan's reported position against the session geofence.
///
/// `require_location` turns "no usable GPS fix" into a block on enforced
/// fences; otherwise a missing fix only ever warns.
pub fn validate_location(
    fence: Option<&Geofence>,
    gps: Option<GeoPoint>,
    bssid: Option<&str>,
    require_location: bool,
) -> LocationVerdict {
    let Some(fence) = fence else {
        return LocationVerdict::Allowed { distance_m: None };
    };

    if bssid_matches(&fence.allowed_bssids, bssid) {
        return LocationVerdict::Allowed {
            distance_m: gps.filter(GeoPoint::is_valid).map(|p| haversine_m(fence.center, p)),
        };
    }

    let Some(point) = gps.filter(GeoPoint::is_valid) else {
        let reason = if gps.is_some() {
            "invalid GPS coordinates"
        } else {
            "no GPS fix supplied"
        };
        return if fence.enforce && require_location {
            LocationVerdict::Block {
                reason: reason.to_string(),
                distance_m: None,
            }
        } else {
            LocationVerdict::Warn {
                reason: reason.to_string(),
                distance_m: None,
            }
        };
    };

    let distance = haversine_m(fence.center, point);
    if distance <= fence.radius_m {
        return LocationVerdict::Allowed {
            distance_m: Some(distance),
        };
    }

    let reason = format!(
        "{distance:.0} m from session location (radius {:.0} m)",
        fence.radius_m
    );
    if fence.enforce {
        LocationVerdict::Block {
            reason,
            distance_m: Some(distance),
        }
    } else {
        LocationVerdict::Warn {
            reason,
            distance_m: Some(distance),
        }
    }
}
