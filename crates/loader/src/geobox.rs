//! Pixel grids georeferenced by an affine transform.
//!
//! A [`GeoBox`] is the output grid of a load: a shape, a CRS and an affine
//! transform mapping pixel corners `(col, row)` to map coordinates.
//! Pixel `(row, col)` covers the half-open square from corner `(col, row)`
//! to `(col + 1, row + 1)`; its centre is at `(col + 0.5, row + 0.5)`.

use std::ops::Mul;

use nalgebra::{Matrix3, Point2};
use serde::{Deserialize, Serialize};

use catalog::{GridInfo, LoadHints};
use cube_common::{BoundingBox, Crs, GeoError, GeoResult};
use projection::Geometry;

use crate::window::Window;

/// Tolerance, in pixels, for treating a computed grid coordinate as whole.
pub(crate) const PIXEL_EPSILON: f64 = 1e-6;

/// 2D affine transform `x = a*col + b*row + c`, `y = d*col + e*row + f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine(Matrix3<f64>);

impl Affine {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self(Matrix3::new(a, b, c, d, e, f, 0.0, 0.0, 1.0))
    }

    pub fn from_coeffs(coeffs: [f64; 6]) -> Self {
        let [a, b, c, d, e, f] = coeffs;
        Self::new(a, b, c, d, e, f)
    }

    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    pub fn translation(x: f64, y: f64) -> Self {
        Self::new(1.0, 0.0, x, 0.0, 1.0, y)
    }

    pub fn scale(x: f64, y: f64) -> Self {
        Self::new(x, 0.0, 0.0, 0.0, y, 0.0)
    }

    /// Coefficients `[a, b, c, d, e, f]`.
    pub fn coeffs(&self) -> [f64; 6] {
        let m = &self.0;
        [m[(0, 0)], m[(0, 1)], m[(0, 2)], m[(1, 0)], m[(1, 1)], m[(1, 2)]]
    }

    /// `self ∘ other`: applies `other` first.
    pub fn compose(&self, other: &Affine) -> Affine {
        Affine(self.0 * other.0)
    }

    pub fn inverse(&self) -> GeoResult<Affine> {
        self.0
            .try_inverse()
            .map(Affine)
            .ok_or_else(|| GeoError::NonInvertible(format!("{:?}", self.coeffs())))
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let p = self.0.transform_point(&Point2::new(x, y));
        (p.x, p.y)
    }

    /// No rotation or shear.
    pub fn is_rectilinear(&self) -> bool {
        let [_, b, _, d, _, _] = self.coeffs();
        b.abs() < 1e-12 && d.abs() < 1e-12
    }

    /// Translation part is whole within [`PIXEL_EPSILON`].
    pub fn has_integer_translation(&self) -> bool {
        let [_, _, c, _, _, f] = self.coeffs();
        is_whole(c) && is_whole(f)
    }

    /// Pixel size `(a, e)` of a rectilinear transform.
    pub fn resolution(&self) -> (f64, f64) {
        let [a, _, _, _, e, _] = self.coeffs();
        (a, e)
    }

    /// Map coordinate of the top-left corner of pixel (0, 0).
    pub fn origin(&self) -> (f64, f64) {
        let [_, _, c, _, _, f] = self.coeffs();
        (c, f)
    }
}

impl Mul for Affine {
    type Output = Affine;

    fn mul(self, rhs: Affine) -> Affine {
        self.compose(&rhs)
    }
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

pub(crate) fn is_whole(v: f64) -> bool {
    (v - v.round()).abs() < PIXEL_EPSILON
}

/// `floor` that absorbs float noise just below a whole number.
pub(crate) fn snap_floor(v: f64) -> f64 {
    if is_whole(v) {
        v.round()
    } else {
        v.floor()
    }
}

/// `ceil` that absorbs float noise just above a whole number.
pub(crate) fn snap_ceil(v: f64) -> f64 {
    if is_whole(v) {
        v.round()
    } else {
        v.ceil()
    }
}

/// A georeferenced pixel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoBox {
    pub crs: Crs,
    pub affine: Affine,
    /// (height, width)
    pub shape: (usize, usize),
}

/// Native pixel grid of a data source.
pub type RasterGeometry = GeoBox;

impl GeoBox {
    pub fn new(shape: (usize, usize), affine: Affine, crs: Crs) -> Self {
        Self { crs, affine, shape }
    }

    /// Grid declared by a dataset document.
    pub fn from_grid(grid: &GridInfo, crs: Crs) -> Self {
        Self::new(grid.shape, Affine::from_coeffs(grid.transform), crs)
    }

    /// A grid with no pixels.
    pub fn empty(crs: Crs) -> Self {
        Self::new((0, 0), Affine::identity(), crs)
    }

    /// North-up grid covering `bbox` at `resolution` (x, y). `y` is
    /// normally negative. Edges snap outwards onto multiples of the
    /// resolution offset by `align` (defaults to 0, 0).
    pub fn from_bbox(
        bbox: &BoundingBox,
        crs: Crs,
        resolution: (f64, f64),
        align: Option<(f64, f64)>,
    ) -> GeoResult<Self> {
        let (rx, ry) = resolution;
        if rx == 0.0 || ry == 0.0 || !rx.is_finite() || !ry.is_finite() {
            return Err(GeoError::InvalidBbox(format!(
                "invalid resolution ({}, {})",
                rx, ry
            )));
        }
        let (ax, ay) = align.unwrap_or((0.0, 0.0));

        let (x0, x1) = snap_span(bbox.min_x, bbox.max_x, rx.abs(), ax);
        let (y0, y1) = snap_span(bbox.min_y, bbox.max_y, ry.abs(), ay);
        let width = ((x1 - x0) / rx.abs()).round().max(0.0) as usize;
        let height = ((y1 - y0) / ry.abs()).round().max(0.0) as usize;

        let origin_x = if rx > 0.0 { x0 } else { x1 };
        let origin_y = if ry > 0.0 { y0 } else { y1 };
        Ok(Self::new(
            (height, width),
            Affine::new(rx, 0.0, origin_x, 0.0, ry, origin_y),
            crs,
        ))
    }

    /// Grid covering `geometry` once reprojected into `crs`.
    pub fn from_geometry(
        geometry: &Geometry,
        crs: Crs,
        resolution: (f64, f64),
        align: Option<(f64, f64)>,
    ) -> GeoResult<Self> {
        let bbox = geometry
            .to_crs(&crs)?
            .bounding_box()
            .ok_or_else(|| GeoError::InvalidGeometry("empty geometry".to_string()))?;
        Self::from_bbox(&bbox, crs, resolution, align)
    }

    pub fn height(&self) -> usize {
        self.shape.0
    }

    pub fn width(&self) -> usize {
        self.shape.1
    }

    pub fn is_empty(&self) -> bool {
        self.shape.0 == 0 || self.shape.1 == 0
    }

    pub fn resolution(&self) -> (f64, f64) {
        self.affine.resolution()
    }

    /// Map coordinates of the four outer corners, clockwise from (0, 0).
    pub fn corners(&self) -> [(f64, f64); 4] {
        let (h, w) = (self.shape.0 as f64, self.shape.1 as f64);
        [
            self.affine.apply(0.0, 0.0),
            self.affine.apply(w, 0.0),
            self.affine.apply(w, h),
            self.affine.apply(0.0, h),
        ]
    }

    pub fn extent(&self) -> GeoResult<Geometry> {
        Geometry::from_points(self.corners().to_vec(), self.crs)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let corners = self.corners();
        BoundingBox::from_points(corners)
            .unwrap_or_else(|| BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }

    /// Map coordinate of a pixel centre.
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.affine.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// X coordinates of the column centres of a rectilinear grid.
    pub fn coords_x(&self) -> Vec<f64> {
        (0..self.width()).map(|c| self.pixel_center(0, c).0).collect()
    }

    /// Y coordinates of the row centres of a rectilinear grid.
    pub fn coords_y(&self) -> Vec<f64> {
        (0..self.height()).map(|r| self.pixel_center(r, 0).1).collect()
    }

    /// The sub-grid covered by `window`.
    pub fn window(&self, window: &Window) -> GeoBox {
        let shift = Affine::translation(window.col_off as f64, window.row_off as f64);
        GeoBox::new(
            (window.height, window.width),
            self.affine * shift,
            self.crs,
        )
    }

    /// Window covering the whole grid.
    pub fn full_window(&self) -> Window {
        Window::new(0, 0, self.shape.0, self.shape.1)
    }

    /// Split into chunks of at most `chunk` (rows, cols), row-major.
    pub fn chunks(&self, chunk: (usize, usize)) -> Vec<Window> {
        let (ch, cw) = (chunk.0.max(1), chunk.1.max(1));
        let mut out = Vec::new();
        let mut row = 0;
        while row < self.height() {
            let h = ch.min(self.height() - row);
            let mut col = 0;
            while col < self.width() {
                let w = cw.min(self.width() - col);
                out.push(Window::new(row, col, h, w));
                col += w;
            }
            row += h;
        }
        out
    }
}

/// Snap `[lo, hi]` outwards onto the lattice `offset + k * res`.
fn snap_span(lo: f64, hi: f64, res: f64, offset: f64) -> (f64, f64) {
    let start = offset + snap_floor((lo - offset) / res) * res;
    let mut end = offset + snap_ceil((hi - offset) / res) * res;
    if end <= start {
        end = start + res;
    }
    (start, end)
}

/// Recipe for an output grid: CRS, resolution and alignment, with the
/// extent supplied per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub crs: Crs,
    /// (x, y); y is normally negative.
    pub resolution: (f64, f64),
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<(f64, f64)>,
}

impl GridSpec {
    pub fn new(crs: Crs, resolution: (f64, f64)) -> Self {
        Self {
            crs,
            resolution,
            align: None,
        }
    }

    pub fn with_align(mut self, x: f64, y: f64) -> Self {
        self.align = Some((x, y));
        self
    }

    /// The grid a product declares for loading.
    pub fn from_load_hints(hints: &LoadHints) -> Self {
        Self {
            crs: hints.crs,
            resolution: (hints.resolution.x, hints.resolution.y),
            align: hints.align.map(|a| (a.x, a.y)),
        }
    }

    pub fn geobox_for(&self, geometry: &Geometry) -> GeoResult<GeoBox> {
        GeoBox::from_geometry(geometry, self.crs, self.resolution, self.align)
    }

    pub fn geobox_for_bbox(&self, bbox: &BoundingBox) -> GeoResult<GeoBox> {
        GeoBox::from_bbox(bbox, self.crs, self.resolution, self.align)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_affine_inverse_round_trip() {
        let affine = Affine::new(30.0, 0.0, 500000.0, 0.0, -30.0, 6100000.0);
        let inv = affine.inverse().unwrap();
        let (x, y) = affine.apply(12.0, 7.0);
        let (col, row) = inv.apply(x, y);
        assert!(approx(col, 12.0) && approx(row, 7.0));
        assert!((affine * inv).coeffs().iter().zip(Affine::identity().coeffs()).all(|(a, b)| approx(*a, b)));
    }

    #[test]
    fn test_singular_affine_rejected() {
        let affine = Affine::new(0.0, 0.0, 1.0, 0.0, 0.0, 1.0);
        assert!(matches!(affine.inverse(), Err(GeoError::NonInvertible(_))));
    }

    #[test]
    fn test_affine_checks() {
        assert!(Affine::translation(3.0, -2.0).has_integer_translation());
        assert!(!Affine::translation(0.5, 0.0).has_integer_translation());
        assert!(Affine::scale(2.0, 2.0).is_rectilinear());
        assert!(!Affine::new(1.0, 0.2, 0.0, 0.0, 1.0, 0.0).is_rectilinear());
    }

    #[test]
    fn test_from_bbox_snaps_outwards() {
        let bbox = BoundingBox::new(0.05, -0.95, 0.95, -0.05);
        let geobox = GeoBox::from_bbox(&bbox, Crs::wgs84(), (0.1, -0.1), None).unwrap();
        assert_eq!(geobox.shape, (10, 10));
        let (x0, y0) = geobox.affine.origin();
        assert!(approx(x0, 0.0) && approx(y0, 0.0));
    }

    #[test]
    fn test_from_bbox_exact_edges() {
        let bbox = BoundingBox::new(0.0, -1.0, 1.0, 0.0);
        let geobox = GeoBox::from_bbox(&bbox, Crs::wgs84(), (0.1, -0.1), None).unwrap();
        assert_eq!(geobox.shape, (10, 10));
    }

    #[test]
    fn test_from_bbox_with_alignment() {
        let bbox = BoundingBox::new(100.0, 100.0, 200.0, 200.0);
        let geobox =
            GeoBox::from_bbox(&bbox, Crs::wgs84(), (30.0, -30.0), Some((15.0, 15.0))).unwrap();
        let (x0, y0) = geobox.affine.origin();
        assert!(approx(x0, 75.0));
        assert!(approx(y0, 225.0));
        assert_eq!(geobox.shape, (5, 5));
    }

    #[test]
    fn test_zero_resolution_rejected() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert!(GeoBox::from_bbox(&bbox, Crs::wgs84(), (0.0, -0.1), None).is_err());
    }

    #[test]
    fn test_pixel_centres() {
        let geobox = GeoBox::new((2, 3), Affine::new(1.0, 0.0, 10.0, 0.0, -1.0, 20.0), Crs::wgs84());
        assert_eq!(geobox.coords_x(), vec![10.5, 11.5, 12.5]);
        assert_eq!(geobox.coords_y(), vec![19.5, 18.5]);
        let bbox = geobox.bounding_box();
        assert_eq!(bbox, BoundingBox::new(10.0, 18.0, 13.0, 20.0));
    }

    #[test]
    fn test_window_and_chunks() {
        let geobox = GeoBox::new((5, 7), Affine::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0), Crs::wgs84());
        let sub = geobox.window(&Window::new(2, 3, 2, 2));
        assert_eq!(sub.shape, (2, 2));
        assert_eq!(sub.affine.origin(), (3.0, -2.0));

        let chunks = geobox.chunks((2, 4));
        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks[1], Window::new(0, 4, 2, 3));
        assert_eq!(chunks[5], Window::new(4, 4, 1, 3));
        let covered: usize = chunks.iter().map(|w| w.height * w.width).sum();
        assert_eq!(covered, 35);
    }

    #[test]
    fn test_grid_spec_geobox_for_geometry() {
        let spec = GridSpec::new(Crs::wgs84(), (0.5, -0.5));
        let area = Geometry::from_bbox(&BoundingBox::new(1.2, 1.2, 2.7, 2.2), Crs::wgs84());
        let geobox = spec.geobox_for(&area).unwrap();
        assert_eq!(geobox.affine.origin(), (1.0, 2.5));
        assert_eq!(geobox.shape, (3, 4));
    }
}
