//! Point transforms between coordinate reference systems.

use std::sync::Arc;

use cube_common::{BoundingBox, Crs, CrsCode};

use crate::{
    AlbersEqualArea, Geographic, LambertConformal, Projection, TransverseMercator, WebMercator,
};

/// Resolve a CRS to its projection definition.
pub fn projection_for(crs: &Crs) -> Arc<dyn Projection> {
    match crs.code {
        CrsCode::Epsg4326 | CrsCode::Epsg4269 => Arc::new(Geographic),
        CrsCode::Epsg3857 => Arc::new(WebMercator),
        CrsCode::Utm { zone, north } => Arc::new(TransverseMercator::utm(zone, north)),
        CrsCode::Epsg3577 => Arc::new(AlbersEqualArea::australia()),
        CrsCode::Epsg5070 => Arc::new(AlbersEqualArea::conus()),
        CrsCode::Epsg3978 => Arc::new(LambertConformal::canada_atlas()),
    }
}

/// Transforms points from one CRS into another, pivoting through geographic
/// coordinates.
#[derive(Debug, Clone)]
pub struct Transformer {
    src: Crs,
    dst: Crs,
    src_proj: Arc<dyn Projection>,
    dst_proj: Arc<dyn Projection>,
}

impl Transformer {
    pub fn new(src: &Crs, dst: &Crs) -> Self {
        Self {
            src: *src,
            dst: *dst,
            src_proj: projection_for(src),
            dst_proj: projection_for(dst),
        }
    }

    /// True when source and destination are the same CRS.
    pub fn is_identity(&self) -> bool {
        self.src == self.dst
    }

    pub fn src(&self) -> &Crs {
        &self.src
    }

    pub fn dst(&self) -> &Crs {
        &self.dst
    }

    /// Transform one point. Non-finite output means the point is outside the
    /// domain of one of the projections.
    pub fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        if self.is_identity() {
            return (x, y);
        }
        let (lon, lat) = self.src_proj.inverse(x, y);
        if !lon.is_finite() || !lat.is_finite() {
            return (f64::NAN, f64::NAN);
        }
        self.dst_proj.forward(lon, lat)
    }

    /// Transform many points, dropping those that fall outside the domain.
    pub fn transform_points(&self, points: &[(f64, f64)]) -> Vec<(f64, f64)> {
        points
            .iter()
            .map(|&(x, y)| self.transform(x, y))
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect()
    }

    /// Bounding box of a box's densified boundary after transformation.
    pub fn transform_bbox(&self, bbox: &BoundingBox, segments: usize) -> Option<BoundingBox> {
        if self.is_identity() {
            return Some(*bbox);
        }
        let points = self.transform_points(&bbox.densified_boundary(segments));
        BoundingBox::from_points(points)
    }
}

/// Transform a single point between two CRSs.
pub fn transform_point(src: &Crs, dst: &Crs, x: f64, y: f64) -> (f64, f64) {
    Transformer::new(src, dst).transform(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utm_to_albers_roundtrip() {
        let utm = Crs::parse("EPSG:32755").unwrap();
        let albers = Crs::parse("EPSG:3577").unwrap();

        let (x, y) = transform_point(&utm, &albers, 600_000.0, 6_000_000.0);
        let (x2, y2) = transform_point(&albers, &utm, x, y);
        assert!((x2 - 600_000.0).abs() < 1e-3, "x {}", x2);
        assert!((y2 - 6_000_000.0).abs() < 1e-3, "y {}", y2);
    }

    #[test]
    fn test_identity() {
        let t = Transformer::new(&Crs::wgs84(), &Crs::wgs84());
        assert!(t.is_identity());
        assert_eq!(t.transform(1.5, 2.5), (1.5, 2.5));
    }

    #[test]
    fn test_transform_bbox_to_lonlat() {
        let utm = Crs::parse("EPSG:32755").unwrap();
        let t = Transformer::new(&utm, &Crs::wgs84());
        let bbox = BoundingBox::new(400_000.0, 6_000_000.0, 600_000.0, 6_200_000.0);
        let ll = t.transform_bbox(&bbox, 8).unwrap();
        assert!(ll.min_x > 145.0 && ll.max_x < 149.5);
        assert!(ll.min_y > -37.0 && ll.max_y < -34.0);
    }
}
