//! Spherical (Web) Mercator projection, EPSG:3857.

use std::f64::consts::PI;

use crate::Projection;

/// Sphere radius used by Web Mercator.
const RADIUS: f64 = 6_378_137.0;

/// Latitude limit where the Web Mercator square ends.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercator;

impl Projection for WebMercator {
    fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        if !(-90.0..=90.0).contains(&lat) {
            return (f64::NAN, f64::NAN);
        }
        let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
        let x = RADIUS * lon.to_radians();
        let y = RADIUS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
        (x, y)
    }

    fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let lon = (x / RADIUS).to_degrees();
        let lat = (2.0 * (y / RADIUS).exp().atan() - PI / 2.0).to_degrees();
        (lon, lat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_antimeridian_extent() {
        let (x, _) = WebMercator.forward(180.0, 0.0);
        assert!((x - 20_037_508.342_789_244).abs() < 1e-6);
    }

    #[test]
    fn test_roundtrip() {
        let (x, y) = WebMercator.forward(-122.4, 37.8);
        let (lon, lat) = WebMercator.inverse(x, y);
        assert!((lon + 122.4).abs() < 1e-9);
        assert!((lat - 37.8).abs() < 1e-9);
    }
}
