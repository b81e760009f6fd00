//! CRS-aware polygon geometry.

use geo::{BoundingRect, Coord, Intersects, LineString, Polygon};
use serde_json::Value;

use cube_common::{BoundingBox, Crs, GeoError, GeoResult};

use crate::transform::Transformer;

/// Segments each polygon edge is split into before reprojection.
const DENSIFY_SEGMENTS: usize = 16;

/// A polygon together with the CRS its coordinates are expressed in.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub crs: Crs,
    pub polygon: Polygon<f64>,
}

impl Geometry {
    pub fn new(polygon: Polygon<f64>, crs: Crs) -> Self {
        Self { crs, polygon }
    }

    /// Build a polygon from an exterior ring. The ring is closed if needed.
    pub fn from_points(points: Vec<(f64, f64)>, crs: Crs) -> GeoResult<Self> {
        if points.len() < 3 {
            return Err(GeoError::InvalidGeometry(format!(
                "polygon needs at least 3 points, got {}",
                points.len()
            )));
        }
        if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(GeoError::InvalidGeometry(
                "polygon has non-finite coordinates".to_string(),
            ));
        }
        Ok(Self::new(Polygon::new(LineString::from(points), vec![]), crs))
    }

    /// Rectangle covering a bounding box.
    pub fn from_bbox(bbox: &BoundingBox, crs: Crs) -> Self {
        let ring: Vec<(f64, f64)> = bbox.corners().to_vec();
        Self::new(Polygon::new(LineString::from(ring), vec![]), crs)
    }

    /// Parse a GeoJSON `Polygon` (exterior ring only is used).
    pub fn from_geojson(value: &Value, crs: Crs) -> GeoResult<Self> {
        let kind = value.get("type").and_then(Value::as_str);
        if kind != Some("Polygon") {
            return Err(GeoError::InvalidGeometry(format!(
                "expected a GeoJSON Polygon, got {:?}",
                kind
            )));
        }
        let ring = value
            .get("coordinates")
            .and_then(Value::as_array)
            .and_then(|rings| rings.first())
            .and_then(Value::as_array)
            .ok_or_else(|| GeoError::InvalidGeometry("Polygon has no exterior ring".to_string()))?;

        let points = ring
            .iter()
            .map(|pair| {
                let x = pair.get(0).and_then(Value::as_f64);
                let y = pair.get(1).and_then(Value::as_f64);
                match (x, y) {
                    (Some(x), Some(y)) => Ok((x, y)),
                    _ => Err(GeoError::InvalidGeometry(format!("bad coordinate {}", pair))),
                }
            })
            .collect::<GeoResult<Vec<_>>>()?;
        Self::from_points(points, crs)
    }

    /// Exterior ring vertices.
    pub fn exterior_points(&self) -> Vec<(f64, f64)> {
        self.polygon.exterior().coords().map(|c| (c.x, c.y)).collect()
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.polygon
            .bounding_rect()
            .map(|r| BoundingBox::new(r.min().x, r.min().y, r.max().x, r.max().y))
    }

    /// Exterior ring with every edge split into `segments` pieces.
    fn densified(&self, segments: usize) -> Vec<(f64, f64)> {
        let coords: Vec<Coord<f64>> = self.polygon.exterior().coords().copied().collect();
        let mut out = Vec::with_capacity(coords.len() * segments);
        for pair in coords.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            for s in 0..segments {
                let t = s as f64 / segments as f64;
                out.push((a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t));
            }
        }
        out
    }

    /// Reproject into another CRS, densifying edges so curved boundaries
    /// stay close to the true shape.
    pub fn to_crs(&self, crs: &Crs) -> GeoResult<Geometry> {
        if &self.crs == crs {
            return Ok(self.clone());
        }
        let transformer = Transformer::new(&self.crs, crs);
        let source = self.densified(DENSIFY_SEGMENTS);
        let points = transformer.transform_points(&source);
        if points.len() < source.len() {
            return Err(GeoError::Projection(format!(
                "geometry extends outside the domain of {}",
                crs
            )));
        }
        Geometry::from_points(points, *crs)
    }

    /// Exact intersection test; `other` is reprojected into this geometry's CRS.
    pub fn intersects(&self, other: &Geometry) -> GeoResult<bool> {
        let other = other.to_crs(&self.crs)?;
        Ok(self.polygon.intersects(&other.polygon))
    }

    /// Centre of the bounding box, in geographic degrees.
    pub fn center_lonlat(&self) -> GeoResult<(f64, f64)> {
        let lonlat = self.to_crs(&Crs::wgs84())?;
        lonlat
            .bounding_box()
            .map(|b| b.center())
            .ok_or_else(|| GeoError::InvalidGeometry("empty geometry".to_string()))
    }
}
