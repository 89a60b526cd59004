//! Great-circle distance and uncertainty-aware proximity classification
//!
//! Distances are computed on a sphere with the WGS84 equatorial radius.
//! The position error budget is a 3-sigma bound derived from `eph`; a
//! geofence is `Near` only when the whole error disc lies inside it and
//! `Far` only when the whole disc lies outside it.

use crate::domain::types::{Fix, Proximity};
use serde::Deserialize;

/// Equatorial Earth radius (meters)
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Error radius is this many standard deviations of `eph`
const ERROR_SIGMAS: f64 = 3.0;

/// Fraction of the geofence radius used when the error radius would swallow it
const CLAMPED_ERROR_FRACTION: f64 = 0.2;

#[inline]
pub fn is_finite(x: f64) -> bool {
    x.is_finite()
}

#[inline]
pub fn deg_to_rad(deg: f64) -> f64 {
    deg.to_radians()
}

/// Combine two horizontal error components into one RMS estimate.
///
/// Returns `None` when the result is NaN.
pub fn rms(x: f64, y: f64) -> Option<f64> {
    let h = x.hypot(y);
    if h.is_nan() {
        None
    } else {
        Some(h)
    }
}

/// Error radius for a fix against a geofence of `radius_m`.
///
/// When `3 * eph` reaches the geofence radius it is clamped to
/// `0.2 * radius_m`, otherwise nothing could ever classify as `Near`.
pub fn error_radius(eph: f64, radius_m: f64) -> f64 {
    let error = ERROR_SIGMAS * eph;
    if error >= radius_m {
        tracing::debug!(error_radius_m = %error, radius_m = %radius_m, "error_radius_clamped");
        CLAMPED_ERROR_FRACTION * radius_m
    } else {
        error
    }
}

/// Classify a distance against a geofence given an error radius
pub fn classify(distance_m: f64, error_m: f64, radius_m: f64) -> Proximity {
    if !is_finite(distance_m) || !is_finite(error_m) {
        Proximity::Unknown
    } else if distance_m + error_m <= radius_m {
        Proximity::Near
    } else if distance_m - error_m > radius_m {
        Proximity::Far
    } else {
        // Error disc straddles the boundary
        Proximity::Unknown
    }
}

/// Pluggable great-circle distance computation.
///
/// Implementations must agree on classification for geofences from a few
/// hundred meters to tens of kilometers.
pub trait DistanceStrategy: Send + Sync + std::fmt::Debug {
    /// Distance in meters between two points given in degrees
    fn distance_m(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64;

    fn name(&self) -> &'static str;
}

/// Spherical law of cosines on co-latitudes
#[derive(Debug, Clone, Copy, Default)]
pub struct SphericalCosines;

impl DistanceStrategy for SphericalCosines {
    fn distance_m(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        let colat1 = deg_to_rad(90.0 - lat1);
        let colat2 = deg_to_rad(90.0 - lat2);
        let dlon = deg_to_rad(lon1) - deg_to_rad(lon2);

        let cos_delta = colat1.cos() * colat2.cos() + colat1.sin() * colat2.sin() * dlon.cos();
        // Rounding can push coincident or antipodal points just outside [-1, 1]
        let angular_delta = cos_delta.clamp(-1.0, 1.0).acos();

        angular_delta * EARTH_RADIUS_M
    }

    fn name(&self) -> &'static str {
        "cosines"
    }
}

/// Haversine formulation, well conditioned for small separations
#[derive(Debug, Clone, Copy, Default)]
pub struct Haversine;

impl DistanceStrategy for Haversine {
    fn distance_m(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        let phi1 = deg_to_rad(lat1);
        let phi2 = deg_to_rad(lat2);
        let dphi = phi2 - phi1;
        let dlambda = deg_to_rad(lon2 - lon1);

        let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
        let a = a.clamp(0.0, 1.0);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        c * EARTH_RADIUS_M
    }

    fn name(&self) -> &'static str {
        "haversine"
    }
}

/// Distance backend selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceBackend {
    #[default]
    Cosines,
    Haversine,
}

impl DistanceStrategy for DistanceBackend {
    fn distance_m(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        match self {
            DistanceBackend::Cosines => SphericalCosines.distance_m(lat1, lon1, lat2, lon2),
            DistanceBackend::Haversine => Haversine.distance_m(lat1, lon1, lat2, lon2),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            DistanceBackend::Cosines => SphericalCosines.name(),
            DistanceBackend::Haversine => Haversine.name(),
        }
    }
}

/// Distance from `fix` to a geofence center and the resulting classification,
/// using the law-of-cosines backend.
pub fn distance_and_classify(
    fix: &Fix,
    target_lat: f64,
    target_lon: f64,
    target_radius_m: f64,
) -> (f64, Proximity) {
    distance_and_classify_with(&SphericalCosines, fix, target_lat, target_lon, target_radius_m)
}

/// As [`distance_and_classify`] with an explicit distance backend.
///
/// Never fails: numeric trouble degrades to `Proximity::Unknown`.
pub fn distance_and_classify_with(
    strategy: &dyn DistanceStrategy,
    fix: &Fix,
    target_lat: f64,
    target_lon: f64,
    target_radius_m: f64,
) -> (f64, Proximity) {
    let distance = strategy.distance_m(fix.latitude, fix.longitude, target_lat, target_lon).abs();
    if distance.is_nan() {
        tracing::debug!(backend = strategy.name(), "distance_nan");
    }

    let error = error_radius(fix.eph, target_radius_m);
    (distance, classify(distance, error, target_radius_m))
}
