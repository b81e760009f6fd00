//! Albers Equal Area Conic projection (ellipsoidal).
//!
//! Used for continental equal-area grids: GDA94 / Australian Albers
//! (EPSG:3577) and NAD83 / CONUS Albers (EPSG:5070).

use crate::ellipsoid::Ellipsoid;
use crate::{wrap_pi, Projection};

/// Albers Equal Area projection parameters.
#[derive(Debug, Clone)]
pub struct AlbersEqualArea {
    /// Central meridian in radians
    pub lon0: f64,
    pub false_easting: f64,
    pub false_northing: f64,
    pub ellipsoid: Ellipsoid,
    /// Cone constant
    n: f64,
    c: f64,
    /// Rho at the latitude of origin
    rho0: f64,
}

impl AlbersEqualArea {
    /// Build from origin and standard parallels, all in degrees.
    pub fn new(
        lat0_deg: f64,
        lon0_deg: f64,
        sp1_deg: f64,
        sp2_deg: f64,
        false_easting: f64,
        false_northing: f64,
        ellipsoid: Ellipsoid,
    ) -> Self {
        let phi0 = lat0_deg.to_radians();
        let phi1 = sp1_deg.to_radians();
        let phi2 = sp2_deg.to_radians();

        let m1 = ellipsoid.m(phi1);
        let m2 = ellipsoid.m(phi2);
        let q0 = q(&ellipsoid, phi0);
        let q1 = q(&ellipsoid, phi1);
        let q2 = q(&ellipsoid, phi2);

        let n = if (phi1 - phi2).abs() < 1e-10 {
            phi1.sin()
        } else {
            (m1 * m1 - m2 * m2) / (q2 - q1)
        };
        let c = m1 * m1 + n * q1;
        let rho0 = ellipsoid.a * (c - n * q0).sqrt() / n;

        Self {
            lon0: lon0_deg.to_radians(),
            false_easting,
            false_northing,
            ellipsoid,
            n,
            c,
            rho0,
        }
    }

    /// GDA94 / Australian Albers.
    pub fn australia() -> Self {
        Self::new(0.0, 132.0, -18.0, -36.0, 0.0, 0.0, Ellipsoid::GRS80)
    }

    /// NAD83 / Conus Albers.
    pub fn conus() -> Self {
        Self::new(23.0, -96.0, 29.5, 45.5, 0.0, 0.0, Ellipsoid::GRS80)
    }
}

/// Authalic `q` function (Snyder eq. 3-12).
fn q(ellipsoid: &Ellipsoid, phi: f64) -> f64 {
    let e = ellipsoid.e();
    let e2 = ellipsoid.e2();
    let s = phi.sin();
    (1.0 - e2) * (s / (1.0 - e2 * s * s) - (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln())
}

impl Projection for AlbersEqualArea {
    fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        if !(-90.0..=90.0).contains(&lat) {
            return (f64::NAN, f64::NAN);
        }
        let a = self.ellipsoid.a;
        let q = q(&self.ellipsoid, lat.to_radians());
        let rho = a * (self.c - self.n * q).sqrt() / self.n;
        let theta = self.n * wrap_pi(lon.to_radians() - self.lon0);

        let x = rho * theta.sin() + self.false_easting;
        let y = self.rho0 - rho * theta.cos() + self.false_northing;
        (x, y)
    }

    fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let a = self.ellipsoid.a;
        let e = self.ellipsoid.e();
        let e2 = self.ellipsoid.e2();

        let x = x - self.false_easting;
        let dy = self.rho0 - (y - self.false_northing);

        let (rho, theta) = if self.n >= 0.0 {
            ((x * x + dy * dy).sqrt(), x.atan2(dy))
        } else {
            (-(x * x + dy * dy).sqrt(), (-x).atan2(-dy))
        };

        let q = (self.c - rho * rho * self.n * self.n / (a * a)) / self.n;

        // Iterate for latitude (Snyder eq. 3-16)
        let mut phi = (q / 2.0).clamp(-1.0, 1.0).asin();
        for _ in 0..15 {
            let s = phi.sin();
            let one_minus = 1.0 - e2 * s * s;
            let delta = one_minus * one_minus / (2.0 * phi.cos())
                * (q / (1.0 - e2) - s / one_minus
                    + (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln());
            phi += delta;
            if delta.abs() < 1e-12 {
                break;
            }
        }

        let lambda = self.lon0 + theta / self.n;
        (wrap_pi(lambda).to_degrees(), phi.to_degrees())
    }
}
