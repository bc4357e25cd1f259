//! Great-circle distance between two coordinates.

/// Mean Earth radius used by the haversine formula, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Meters spanned by one degree of latitude on the haversine sphere.
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;

/// Haversine distance in meters between `(lat1, lon1)` and `(lat2, lon2)`,
/// all in decimal degrees.
///
/// Callers validate coordinates first; within the valid ranges the result is
/// always finite and non-negative, and exactly zero for identical points.
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h slightly past 1 for antipodal points
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// Round a distance to two decimals for reporting.
pub fn round_meters(meters: f64) -> f64 {
    (meters * 100.0).round() / 100.0
}
