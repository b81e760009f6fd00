//! Resampling kernels.
//!
//! Kernels work on NaN-masked blocks: callers turn a source's nodata into
//! NaN before sampling and turn NaN back into the band's nodata afterwards.
//! Sample positions are in index space, where pixel `i` is centred on `i`.

use ndarray::{Array2, ArrayView2, Axis};
use ndarray::parallel::prelude::*;
use serde::{Deserialize, Serialize};

use cube_common::{BoundingBox, GeoResult};
use projection::Transformer;

use crate::geobox::GeoBox;

/// Resampling method used when source and destination pixels differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    /// Nearest neighbour (preserves exact values).
    #[default]
    Nearest,
    /// Bilinear interpolation of the four nearest pixels.
    Bilinear,
    /// Catmull-Rom cubic over a 4x4 neighbourhood.
    Cubic,
    /// Mean of the valid source pixels under the destination pixel.
    Average,
}

impl Resampling {
    /// Parse from string (case-insensitive). Unknown names fall back to nearest.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "bilinear" => Self::Bilinear,
            "cubic" | "bicubic" => Self::Cubic,
            "average" | "mean" => Self::Average,
            _ => Self::Nearest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
            Self::Cubic => "cubic",
            Self::Average => "average",
        }
    }

    /// Sample `data` at index position `(x, y)`.
    pub fn sample(&self, data: &ArrayView2<f64>, x: f64, y: f64) -> f64 {
        match self {
            Self::Nearest | Self::Average => nearest_sample(data, x, y),
            Self::Bilinear => bilinear_sample(data, x, y),
            Self::Cubic => cubic_sample(data, x, y),
        }
    }
}

impl std::fmt::Display for Resampling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether `(x, y)` falls on some pixel of a `(height, width)` grid.
fn on_grid(dim: (usize, usize), x: f64, y: f64) -> bool {
    x >= -0.5 && y >= -0.5 && x < dim.1 as f64 - 0.5 && y < dim.0 as f64 - 0.5
}

/// Nearest neighbour. NaN off the grid.
pub fn nearest_sample(data: &ArrayView2<f64>, x: f64, y: f64) -> f64 {
    if !on_grid(data.dim(), x, y) {
        return f64::NAN;
    }
    let col = (x + 0.5).floor() as usize;
    let row = (y + 0.5).floor() as usize;
    data[[row, col]]
}

/// Bilinear interpolation. NaN if any contributing pixel is NaN.
pub fn bilinear_sample(data: &ArrayView2<f64>, x: f64, y: f64) -> f64 {
    let (height, width) = data.dim();
    if !on_grid((height, width), x, y) {
        return f64::NAN;
    }
    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let xf = x - x0 as f64;
    let yf = y - y0 as f64;

    let v00 = data[[y0, x0]];
    let v10 = data[[y0, x1]];
    let v01 = data[[y1, x0]];
    let v11 = data[[y1, x1]];

    if v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan() {
        return f64::NAN;
    }

    let top = v00 * (1.0 - xf) + v10 * xf;
    let bottom = v01 * (1.0 - xf) + v11 * xf;
    top * (1.0 - yf) + bottom * yf
}

/// Bicubic interpolation; falls back to bilinear near NaN pixels.
pub fn cubic_sample(data: &ArrayView2<f64>, x: f64, y: f64) -> f64 {
    let (height, width) = data.dim();
    if !on_grid((height, width), x, y) {
        return f64::NAN;
    }
    let xi = x.floor() as i64;
    let yi = y.floor() as i64;
    let xf = x - xi as f64;
    let yf = y - yi as f64;

    let mut values = [[0.0f64; 4]; 4];
    for j in 0..4 {
        for i in 0..4 {
            let px = (xi + i - 1).clamp(0, width as i64 - 1) as usize;
            let py = (yi + j - 1).clamp(0, height as i64 - 1) as usize;
            let v = data[[py, px]];
            if v.is_nan() {
                return bilinear_sample(data, x, y);
            }
            values[j as usize][i as usize] = v;
        }
    }

    let mut rows = [0.0f64; 4];
    for (j, row) in values.iter().enumerate() {
        rows[j] = cubic_1d(row[0], row[1], row[2], row[3], xf);
    }
    cubic_1d(rows[0], rows[1], rows[2], rows[3], yf)
}

/// 1D Catmull-Rom spline.
fn cubic_1d(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;

    let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let c = -0.5 * p0 + 0.5 * p2;
    let d = p1;

    a * t3 + b * t2 + c * t + d
}

/// Mean of the non-NaN pixels whose centres lie in the pixel-corner box
/// `[x0, x1) x [y0, y1)`. `None` when no pixel centre falls inside.
pub fn area_average(data: &ArrayView2<f64>, x0: f64, y0: f64, x1: f64, y1: f64) -> Option<f64> {
    let (height, width) = data.dim();
    let c0 = (x0 - 0.5).ceil().max(0.0) as usize;
    let r0 = (y0 - 0.5).ceil().max(0.0) as usize;
    let c1 = ((x1 - 0.5).ceil().max(0.0) as usize).min(width);
    let r1 = ((y1 - 0.5).ceil().max(0.0) as usize).min(height);
    if c1 <= c0 || r1 <= r0 {
        return None;
    }

    let mut sum = 0.0;
    let mut count = 0usize;
    for row in r0..r1 {
        for col in c0..c1 {
            let v = data[[row, col]];
            if !v.is_nan() {
                sum += v;
                count += 1;
            }
        }
    }
    Some(if count > 0 { sum / count as f64 } else { f64::NAN })
}

/// Reduce by whole `kx` by `ky` blocks. Output is `(h / ky, w / kx)`.
pub fn decimate(data: &ArrayView2<f64>, kx: usize, ky: usize, method: Resampling) -> Array2<f64> {
    let (kx, ky) = (kx.max(1), ky.max(1));
    let (height, width) = data.dim();
    let shape = (height / ky, width / kx);

    Array2::from_shape_fn(shape, |(r, c)| {
        let (x0, y0) = ((c * kx) as f64, (r * ky) as f64);
        match method {
            Resampling::Average => {
                area_average(data, x0, y0, x0 + kx as f64, y0 + ky as f64).unwrap_or(f64::NAN)
            }
            // Block centre in index space.
            _ => method.sample(
                data,
                x0 + (kx as f64 - 1.0) / 2.0,
                y0 + (ky as f64 - 1.0) / 2.0,
            ),
        }
    })
}

/// Warp `src` (covering `src_grid`) onto `dst_grid`, pixel by pixel.
///
/// Each destination pixel centre is carried into the source CRS and pixel
/// space and sampled there. Rows are processed in parallel.
pub fn warp(
    src: &ArrayView2<f64>,
    src_grid: &GeoBox,
    dst_grid: &GeoBox,
    method: Resampling,
) -> GeoResult<Array2<f64>> {
    let src_inv = src_grid.affine.inverse()?;
    let transformer = Transformer::new(&dst_grid.crs, &src_grid.crs);
    let dst_affine = dst_grid.affine;

    // Destination pixel corner to source pixel corner.
    let to_src = |col: f64, row: f64| -> (f64, f64) {
        let (x, y) = dst_affine.apply(col, row);
        let (sx, sy) = transformer.transform(x, y);
        if !sx.is_finite() || !sy.is_finite() {
            return (f64::NAN, f64::NAN);
        }
        src_inv.apply(sx, sy)
    };

    let mut out = Array2::from_elem(dst_grid.shape, f64::NAN);
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(row, mut line)| {
            for (col, cell) in line.iter_mut().enumerate() {
                let (c, r) = (col as f64, row as f64);
                let (px, py) = to_src(c + 0.5, r + 0.5);
                if px.is_nan() {
                    continue;
                }
                *cell = match method {
                    Resampling::Average => {
                        let corners = [
                            to_src(c, r),
                            to_src(c + 1.0, r),
                            to_src(c, r + 1.0),
                            to_src(c + 1.0, r + 1.0),
                        ];
                        BoundingBox::from_points(corners)
                            .and_then(|b| area_average(src, b.min_x, b.min_y, b.max_x, b.max_y))
                            .unwrap_or_else(|| nearest_sample(src, px - 0.5, py - 0.5))
                    }
                    _ => method.sample(src, px - 0.5, py - 0.5),
                };
            }
        });
    Ok(out)
}
