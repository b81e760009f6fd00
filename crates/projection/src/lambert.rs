//! Lambert Conformal Conic projection (ellipsoidal, two standard parallels).
//!
//! Maps a cone secant to the Earth's surface onto a flat plane. Used here
//! for NAD83 / Canada Atlas Lambert (EPSG:3978).
//!
//! The projection parameters include:
//! - Latitude of origin (lat0)
//! - Central meridian (lon0)
//! - Standard parallels: latin1 and latin2 (can be equal for tangent cone)
//! - False easting / northing in meters

use std::f64::consts::PI;

use crate::ellipsoid::Ellipsoid;
use crate::{wrap_pi, Projection};

/// Lambert Conformal Conic projection parameters.
#[derive(Debug, Clone)]
pub struct LambertConformal {
    /// Central meridian in radians
    pub lon0: f64,
    /// Latitude of origin in radians
    pub lat0: f64,
    /// First standard parallel in radians
    pub latin1: f64,
    /// Second standard parallel in radians
    pub latin2: f64,
    pub false_easting: f64,
    pub false_northing: f64,
    pub ellipsoid: Ellipsoid,
    /// Cone constant (n)
    n: f64,
    /// F constant
    f: f64,
    /// Rho at the latitude of origin
    rho0: f64,
}

impl LambertConformal {
    /// Create a new Lambert Conformal projection.
    ///
    /// # Arguments
    /// * `lat0_deg` - Latitude of origin (degrees)
    /// * `lon0_deg` - Central meridian (degrees)
    /// * `latin1_deg` - First standard parallel (degrees)
    /// * `latin2_deg` - Second standard parallel (degrees)
    /// * `false_easting`, `false_northing` - Offsets in meters
    pub fn new(
        lat0_deg: f64,
        lon0_deg: f64,
        latin1_deg: f64,
        latin2_deg: f64,
        false_easting: f64,
        false_northing: f64,
        ellipsoid: Ellipsoid,
    ) -> Self {
        let lat0 = lat0_deg.to_radians();
        let lon0 = lon0_deg.to_radians();
        let latin1 = latin1_deg.to_radians();
        let latin2 = latin2_deg.to_radians();

        let m1 = ellipsoid.m(latin1);
        let m2 = ellipsoid.m(latin2);
        let t0 = t(&ellipsoid, lat0);
        let t1 = t(&ellipsoid, latin1);
        let t2 = t(&ellipsoid, latin2);

        // Compute cone constant n
        let n = if (latin1 - latin2).abs() < 1e-10 {
            // Tangent cone (single standard parallel)
            latin1.sin()
        } else {
            // Secant cone (two standard parallels)
            (m1.ln() - m2.ln()) / (t1.ln() - t2.ln())
        };

        let f = m1 / (n * t1.powf(n));
        let rho0 = ellipsoid.a * f * t0.powf(n);

        Self {
            lon0,
            lat0,
            latin1,
            latin2,
            false_easting,
            false_northing,
            ellipsoid,
            n,
            f,
            rho0,
        }
    }

    /// NAD83 / Canada Atlas Lambert.
    pub fn canada_atlas() -> Self {
        Self::new(49.0, -95.0, 49.0, 77.0, 0.0, 0.0, Ellipsoid::GRS80)
    }
}

/// Snyder eq. 15-9.
fn t(ellipsoid: &Ellipsoid, phi: f64) -> f64 {
    let e = ellipsoid.e();
    let s = phi.sin();
    (PI / 4.0 - phi / 2.0).tan() / ((1.0 - e * s) / (1.0 + e * s)).powf(e / 2.0)
}

impl Projection for LambertConformal {
    fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        if !(-90.0..=90.0).contains(&lat) {
            return (f64::NAN, f64::NAN);
        }
        let phi = lat.to_radians();
        let rho = self.ellipsoid.a * self.f * t(&self.ellipsoid, phi).powf(self.n);

        // Compute theta (angle from central meridian)
        let theta = self.n * wrap_pi(lon.to_radians() - self.lon0);

        let x = rho * theta.sin() + self.false_easting;
        let y = self.rho0 - rho * theta.cos() + self.false_northing;
        (x, y)
    }

    fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let e = self.ellipsoid.e();
        let x = x - self.false_easting;
        let dy = self.rho0 - (y - self.false_northing);

        let (rho, theta) = if self.n >= 0.0 {
            ((x * x + dy * dy).sqrt(), x.atan2(dy))
        } else {
            (-(x * x + dy * dy).sqrt(), (-x).atan2(-dy))
        };

        let t = (rho / (self.ellipsoid.a * self.f)).powf(1.0 / self.n);

        // Iterate for latitude (Snyder eq. 7-9)
        let mut phi = PI / 2.0 - 2.0 * t.atan();
        for _ in 0..15 {
            let s = phi.sin();
            let next = PI / 2.0 - 2.0 * (t * ((1.0 - e * s) / (1.0 + e * s)).powf(e / 2.0)).atan();
            let done = (next - phi).abs() < 1e-12;
            phi = next;
            if done {
                break;
            }
        }

        let lambda = theta / self.n + self.lon0;
        (wrap_pi(lambda).to_degrees(), phi.to_degrees())
    }
}
