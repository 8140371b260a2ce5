//! # Geo Math
//!
//! Great-circle distance and initial bearing on a spherical Earth.
//! Inputs are assumed to be validated upstream; out-of-range coordinates
//! produce meaningless but finite results.

use crate::models::{Location, Report};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Radius used to warn a user about existing reports before they create one.
pub const PROXIMITY_RADIUS_METERS: f64 = 50.0;

/// Haversine distance in meters.
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Forward azimuth from point 1 to point 2, in degrees `[0, 360)`.
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();

    let degrees = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if degrees >= 360.0 {
        0.0
    } else {
        degrees
    }
}

pub fn distance_between(a: Location, b: Location) -> f64 {
    distance(a.latitude, a.longitude, b.latitude, b.longitude)
}

pub fn is_within_proximity(a: Location, b: Location, radius_meters: f64) -> bool {
    distance_between(a, b) <= radius_meters
}

/// Closest report to `origin` and its distance, or `None` for an empty set.
/// Ties keep the earlier report.
pub fn find_nearest(origin: Location, reports: &[Report]) -> Option<(&Report, f64)> {
    reports
        .iter()
        .map(|report| (report, distance_between(origin, report.location())))
        .fold(None, |best: Option<(&Report, f64)>, candidate| match best {
            Some(current) if current.1 <= candidate.1 => Some(current),
            _ => Some(candidate),
        })
}

/// "430m" below one kilometre, "1.2km" above.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{}m", meters.round() as i64)
    } else {
        format!("{:.1}km", meters / 1000.0)
    }
}
