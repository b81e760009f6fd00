//! Geographic (plate carrée) pseudo-projection.

use crate::Projection;

/// Identity projection for geographic CRSs; longitudes are wrapped to [-180, 180].
#[derive(Debug, Clone, Copy, Default)]
pub struct Geographic;

impl Projection for Geographic {
    fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        if !(-90.0..=90.0).contains(&lat) {
            return (f64::NAN, f64::NAN);
        }
        (lon, lat)
    }

    fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let lon = if (-180.0..=180.0).contains(&x) {
            x
        } else {
            (x + 180.0).rem_euclid(360.0) - 180.0
        };
        (lon, y)
    }
}
