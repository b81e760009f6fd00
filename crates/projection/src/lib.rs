//! Coordinate reference system transformations.
//!
//! Implements the map projections the catalog needs from scratch, without
//! binding to PROJ. All supported datums (WGS84, GRS80, NAD83) are treated
//! as one; sub-metre datum shifts are ignored.

pub mod albers;
pub mod ellipsoid;
pub mod geographic;
pub mod geometry;
pub mod lambert;
pub mod mercator;
pub mod transform;
pub mod transverse_mercator;

pub use albers::AlbersEqualArea;
pub use ellipsoid::Ellipsoid;
pub use geographic::Geographic;
pub use geometry::Geometry;
pub use lambert::LambertConformal;
pub use mercator::WebMercator;
pub use transform::{projection_for, transform_point, Transformer};
pub use transverse_mercator::TransverseMercator;

/// A map projection between geographic degrees and projected coordinates.
///
/// Points outside the projection's domain map to NaN.
pub trait Projection: Send + Sync + std::fmt::Debug {
    /// Geographic (lon, lat) in degrees to projected (x, y).
    fn forward(&self, lon: f64, lat: f64) -> (f64, f64);

    /// Projected (x, y) to geographic (lon, lat) in degrees.
    fn inverse(&self, x: f64, y: f64) -> (f64, f64);
}

/// Wrap a longitude difference into [-π, π].
pub(crate) fn wrap_pi(mut value: f64) -> f64 {
    use std::f64::consts::PI;
    while value > PI {
        value -= 2.0 * PI;
    }
    while value < -PI {
        value += 2.0 * PI;
    }
    value
}
