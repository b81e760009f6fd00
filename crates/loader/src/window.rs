//! Read windows: which source pixels feed which destination pixels.

use serde::{Deserialize, Serialize};

use cube_common::BoundingBox;
use projection::Transformer;

use crate::geobox::{is_whole, snap_ceil, snap_floor, Affine, GeoBox, RasterGeometry};

/// Points per edge when tracing a grid outline through a reprojection.
const EDGE_SEGMENTS: usize = 16;

/// Extra source pixels read around a resampled window so kernels near its
/// edge see their full neighbourhood.
const RESAMPLE_MARGIN: f64 = 2.0;

/// A rectangular block of pixels. Empty windows are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Window {
    pub row_off: usize,
    pub col_off: usize,
    pub height: usize,
    pub width: usize,
}

impl Window {
    pub fn new(row_off: usize, col_off: usize, height: usize, width: usize) -> Self {
        Self {
            row_off,
            col_off,
            height,
            width,
        }
    }

    pub fn row_end(&self) -> usize {
        self.row_off + self.height
    }

    pub fn col_end(&self) -> usize {
        self.col_off + self.width
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn intersection(&self, other: &Window) -> Option<Window> {
        let r0 = self.row_off.max(other.row_off);
        let c0 = self.col_off.max(other.col_off);
        let r1 = self.row_end().min(other.row_end());
        let c1 = self.col_end().min(other.col_end());
        (r1 > r0 && c1 > c0).then(|| Window::new(r0, c0, r1 - r0, c1 - c0))
    }

    /// Whether `other` lies entirely inside this window.
    pub fn contains(&self, other: &Window) -> bool {
        other.row_off >= self.row_off
            && other.col_off >= self.col_off
            && other.row_end() <= self.row_end()
            && other.col_end() <= self.col_end()
    }

    /// Same window expressed relative to `origin`'s top-left corner.
    pub fn relative_to(&self, origin: &Window) -> Window {
        Window::new(
            self.row_off.saturating_sub(origin.row_off),
            self.col_off.saturating_sub(origin.col_off),
            self.height,
            self.width,
        )
    }
}

/// How source pixels become destination pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadStrategy {
    /// Same CRS and pixel size, whole-pixel offset: a plain copy.
    Copy,
    /// Same CRS, axis aligned, each destination pixel covers exactly
    /// `x` by `y` source pixels.
    Decimate { x: usize, y: usize },
    /// Anything else: per-pixel warp through the resampling kernel.
    Resample,
}

/// Source and destination windows of one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadWindow {
    /// Block to read, in source pixels.
    pub src_window: Window,
    /// Block to write, in destination pixels. Always inside the destination.
    pub dst_window: Window,
    pub strategy: ReadStrategy,
}

impl ReadWindow {
    pub fn needs_resampling(&self) -> bool {
        self.strategy == ReadStrategy::Resample
    }
}

/// Work out which part of `src` to read to fill part of `dst`.
///
/// Returns `None` when the two grids do not overlap, or when either grid
/// has a singular transform.
pub fn compute_read_window(src: &RasterGeometry, dst: &GeoBox) -> Option<ReadWindow> {
    if src.is_empty() || dst.is_empty() {
        return None;
    }
    let src_inv = src.affine.inverse().ok()?;
    let dst_inv = dst.affine.inverse().ok()?;

    if src.crs == dst.crs {
        // Destination pixel space to source pixel space.
        let rel = src_inv * dst.affine;
        if let Some(aligned) = aligned_window(src, dst, &rel) {
            return aligned;
        }
    }
    warped_window(src, dst, &src_inv, &dst_inv)
}

/// Copy or decimate when `rel` maps destination pixels onto whole blocks of
/// source pixels.
///
/// The outer `None` means the grids are not block aligned; `Some(None)`
/// means they are aligned but do not overlap.
fn aligned_window(src: &GeoBox, dst: &GeoBox, rel: &Affine) -> Option<Option<ReadWindow>> {
    if !rel.is_rectilinear() || !rel.has_integer_translation() {
        return None;
    }
    let (sx, sy) = rel.resolution();
    if sx < 0.5 || sy < 0.5 || !is_whole(sx) || !is_whole(sy) {
        return None;
    }
    let (kx, ky) = (sx.round() as i64, sy.round() as i64);
    let (tx, ty) = rel.origin();
    let (tx, ty) = (tx.round() as i64, ty.round() as i64);

    let cols = block_span(tx, kx, src.width() as i64, dst.width() as i64);
    let rows = block_span(ty, ky, src.height() as i64, dst.height() as i64);
    let ((c0, c1), (r0, r1)) = match (cols, rows) {
        (BlockSpan::Full(c), BlockSpan::Full(r)) => (c, r),
        (BlockSpan::Empty, _) | (_, BlockSpan::Empty) => return Some(None),
        // Edge pixels would only be partly covered.
        _ => return None,
    };

    let src_window = Window::new(
        (ty + r0 * ky) as usize,
        (tx + c0 * kx) as usize,
        ((r1 - r0) * ky) as usize,
        ((c1 - c0) * kx) as usize,
    );
    let dst_window = Window::new(r0 as usize, c0 as usize, (r1 - r0) as usize, (c1 - c0) as usize);
    let strategy = if kx == 1 && ky == 1 {
        ReadStrategy::Copy
    } else {
        ReadStrategy::Decimate {
            x: kx as usize,
            y: ky as usize,
        }
    };
    Some(Some(ReadWindow {
        src_window,
        dst_window,
        strategy,
    }))
}

enum BlockSpan {
    Empty,
    Full((i64, i64)),
    Partial,
}

/// Destination index range whose blocks `[t + j*k, t + (j+1)*k)` overlap
/// `[0, src_len)`, clipped to `[0, dst_len)`.
fn block_span(t: i64, k: i64, src_len: i64, dst_len: i64) -> BlockSpan {
    let floor_div = |a: i64| a.div_euclid(k);
    let ceil_div = |a: i64| -((-a).div_euclid(k));

    let any = (floor_div(-t).max(0), ceil_div(src_len - t).min(dst_len));
    if any.1 <= any.0 {
        return BlockSpan::Empty;
    }
    let full = (ceil_div(-t).max(0), floor_div(src_len - t).min(dst_len));
    if full == any {
        BlockSpan::Full(full)
    } else {
        BlockSpan::Partial
    }
}

/// General case: trace each grid's outline into the other's pixel space.
fn warped_window(
    src: &GeoBox,
    dst: &GeoBox,
    src_inv: &Affine,
    dst_inv: &Affine,
) -> Option<ReadWindow> {
    let to_dst = Transformer::new(&src.crs, &dst.crs);
    let to_src = Transformer::new(&dst.crs, &src.crs);

    let src_outline = outline(src, &src.full_window());
    let in_dst = pixel_bounds(&to_dst.transform_points(&src_outline), dst_inv)?;
    let dst_window = clip(&in_dst, dst.shape)?;

    let dst_outline = outline(dst, &dst_window);
    let in_src = match pixel_bounds(&to_src.transform_points(&dst_outline), src_inv) {
        Some(bounds) => bounds.buffered(RESAMPLE_MARGIN),
        None => BoundingBox::new(0.0, 0.0, src.width() as f64, src.height() as f64),
    };
    let src_window = clip(&in_src, src.shape)?;

    Some(ReadWindow {
        src_window,
        dst_window,
        strategy: ReadStrategy::Resample,
    })
}

/// Densified outline of `window` of `geobox`, in map coordinates.
fn outline(geobox: &GeoBox, window: &Window) -> Vec<(f64, f64)> {
    let pixels = BoundingBox::new(
        window.col_off as f64,
        window.row_off as f64,
        window.col_end() as f64,
        window.row_end() as f64,
    );
    pixels
        .densified_boundary(EDGE_SEGMENTS)
        .into_iter()
        .map(|(col, row)| geobox.affine.apply(col, row))
        .collect()
}

/// Bounds of map points in the pixel space of `inverse`.
fn pixel_bounds(points: &[(f64, f64)], inverse: &Affine) -> Option<BoundingBox> {
    BoundingBox::from_points(points.iter().map(|&(x, y)| inverse.apply(x, y)))
}

/// Round pixel bounds outwards and clip them to a grid of `shape`.
fn clip(bounds: &BoundingBox, shape: (usize, usize)) -> Option<Window> {
    let c0 = snap_floor(bounds.min_x).max(0.0);
    let r0 = snap_floor(bounds.min_y).max(0.0);
    let c1 = snap_ceil(bounds.max_x).min(shape.1 as f64);
    let r1 = snap_ceil(bounds.max_y).min(shape.0 as f64);
    if c1 <= c0 || r1 <= r0 {
        return None;
    }
    Some(Window::new(
        r0 as usize,
        c0 as usize,
        (r1 - r0) as usize,
        (c1 - c0) as usize,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cube_common::Crs;

    fn grid(shape: (usize, usize), res: f64, x0: f64, y0: f64) -> GeoBox {
        GeoBox::new(shape, Affine::new(res, 0.0, x0, 0.0, -res, y0), Crs::wgs84())
    }

    #[test]
    fn test_window_intersection() {
        let a = Window::new(0, 0, 4, 4);
        let b = Window::new(2, 3, 4, 4);
        assert_eq!(a.intersection(&b), Some(Window::new(2, 3, 2, 1)));
        assert_eq!(a.intersection(&Window::new(4, 0, 1, 1)), None);
        assert!(a.contains(&Window::new(1, 1, 2, 2)));
        assert!(Window::default().is_empty());
    }

    #[test]
    fn test_identical_grids_copy() {
        let g = grid((10, 10), 0.1, 0.0, 0.0);
        let rw = compute_read_window(&g, &g).unwrap();
        assert_eq!(rw.strategy, ReadStrategy::Copy);
        assert_eq!(rw.src_window, g.full_window());
        assert_eq!(rw.dst_window, g.full_window());
        assert!(!rw.needs_resampling());
    }

    #[test]
    fn test_offset_grid_copy_is_clipped() {
        // Source starts 3 pixels right and 2 pixels down of the destination.
        let src = grid((10, 10), 1.0, 3.0, -2.0);
        let dst = grid((8, 8), 1.0, 0.0, 0.0);
        let rw = compute_read_window(&src, &dst).unwrap();
        assert_eq!(rw.strategy, ReadStrategy::Copy);
        assert_eq!(rw.dst_window, Window::new(2, 3, 6, 5));
        assert_eq!(rw.src_window, Window::new(0, 0, 6, 5));
    }

    #[test]
    fn test_source_larger_than_destination() {
        let src = grid((10, 10), 1.0, 0.0, 0.0);
        let dst = grid((4, 4), 1.0, 2.0, -3.0);
        let rw = compute_read_window(&src, &dst).unwrap();
        assert_eq!(rw.strategy, ReadStrategy::Copy);
        assert_eq!(rw.dst_window, Window::new(0, 0, 4, 4));
        assert_eq!(rw.src_window, Window::new(3, 2, 4, 4));
    }

    #[test]
    fn test_integer_scale_decimates() {
        let src = grid((8, 8), 1.0, 0.0, 0.0);
        let dst = grid((4, 4), 2.0, 0.0, 0.0);
        let rw = compute_read_window(&src, &dst).unwrap();
        assert_eq!(rw.strategy, ReadStrategy::Decimate { x: 2, y: 2 });
        assert_eq!(rw.src_window, Window::new(0, 0, 8, 8));
        assert_eq!(rw.dst_window, Window::new(0, 0, 4, 4));
    }

    #[test]
    fn test_partial_blocks_resample() {
        let src = grid((7, 7), 1.0, 0.0, 0.0);
        let dst = grid((4, 4), 2.0, 0.0, 0.0);
        let rw = compute_read_window(&src, &dst).unwrap();
        assert!(rw.needs_resampling());
        assert_eq!(rw.dst_window, Window::new(0, 0, 4, 4));
    }

    #[test]
    fn test_fractional_offset_resamples() {
        let src = grid((10, 10), 1.0, 0.5, 0.0);
        let dst = grid((10, 10), 1.0, 0.0, 0.0);
        let rw = compute_read_window(&src, &dst).unwrap();
        assert!(rw.needs_resampling());
        assert_eq!(rw.dst_window, Window::new(0, 0, 10, 10));
        assert_eq!(rw.src_window, Window::new(0, 0, 10, 10));
    }

    #[test]
    fn test_disjoint_is_none() {
        let src = grid((10, 10), 1.0, 100.0, 0.0);
        let dst = grid((10, 10), 1.0, 0.0, 0.0);
        assert!(compute_read_window(&src, &dst).is_none());

        let far = grid((10, 10), 1.0, 100.5, 0.0);
        assert!(compute_read_window(&far, &dst).is_none());
    }

    #[test]
    fn test_cross_crs_resamples() {
        let utm = Crs::parse("EPSG:32755").unwrap();
        let src = GeoBox::new(
            (100, 200),
            Affine::new(30.0, 0.0, 500000.0, 0.0, -30.0, 6100000.0),
            utm,
        );
        let footprint = src.extent().unwrap().to_crs(&Crs::wgs84()).unwrap();
        let dst = GeoBox::from_geometry(&footprint, Crs::wgs84(), (0.001, -0.001), None).unwrap();

        let rw = compute_read_window(&src, &dst).unwrap();
        assert!(rw.needs_resampling());
        assert!(dst.full_window().contains(&rw.dst_window));
        assert!(src.full_window().contains(&rw.src_window));
        assert!(rw.dst_window.width > 0 && rw.src_window.width > 0);
    }
}
