use serde::{Deserialize, Serialize};

/// Metres per degree used for both latitude and longitude deltas.
///
/// Mission logs were recorded with this flat-earth factor, so it must not be
/// replaced with a latitude-corrected projection.
pub const METERS_PER_DEGREE: f64 = 1.113195e5;

/// A geodetic point. `alt` is metres relative to the home position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }

    /// Same horizontal position at a different altitude.
    pub fn with_alt(self, alt: f64) -> Self {
        Self { alt, ..self }
    }

    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        distance_meters(self, other)
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.lat, self.lon)
    }
}

/// Horizontal ground distance in metres (equirectangular, no longitude
/// compression). Altitude is ignored.
pub fn distance_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat) * METERS_PER_DEGREE;
    let d_lon = (b.lon - a.lon) * METERS_PER_DEGREE;
    (d_lat * d_lat + d_lon * d_lon).sqrt()
}
