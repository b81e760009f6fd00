//! Raster generators for creating synthetic band data.
//!
//! These generators create predictable, verifiable patterns that can be
//! used across the test suite.

use ndarray::{s, Array2};

/// Creates a test grid with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// This makes it easy to verify that data is being read/written correctly
/// by checking that `grid[[row, col]] == col * 1000 + row`.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.dim(), (5, 10));
/// assert_eq!(grid[[0, 1]], 1000.0);
/// assert_eq!(grid[[1, 0]], 1.0);
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Array2<f64> {
    Array2::from_shape_fn((height, width), |(row, col)| (col * 1000 + row) as f64)
}

/// Creates a grid filled with one value.
pub fn constant_grid(width: usize, height: usize, value: f64) -> Array2<f64> {
    Array2::from_elem((height, width), value)
}

/// Creates a left-to-right gradient from `lo` (first column) to `hi` (last column).
pub fn gradient_grid(width: usize, height: usize, lo: f64, hi: f64) -> Array2<f64> {
    let step = if width > 1 {
        (hi - lo) / (width - 1) as f64
    } else {
        0.0
    };
    Array2::from_shape_fn((height, width), |(_, col)| lo + step * col as f64)
}

/// Overwrites the block `rows x cols` with `nodata`.
pub fn with_nodata_block(
    mut grid: Array2<f64>,
    rows: std::ops::Range<usize>,
    cols: std::ops::Range<usize>,
    nodata: f64,
) -> Array2<f64> {
    grid.slice_mut(s![rows, cols]).fill(nodata);
    grid
}

/// Creates a bit-field grid cycling through `classes`, one class per cell.
pub fn class_grid(width: usize, height: usize, classes: &[u8]) -> Array2<f64> {
    if classes.is_empty() {
        return Array2::zeros((height, width));
    }
    Array2::from_shape_fn((height, width), |(row, col)| {
        classes[(row * width + col) % classes.len()] as f64
    })
}
