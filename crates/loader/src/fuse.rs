//! Fuse functions: how overlapping observations merge into one plane.
//!
//! A fuser updates `dst` in place from `src`, given the band's nodata value.
//! Datasets of a group are fused in group order, so order-sensitive fusers
//! such as [`Fuser::copy_first`] depend on the grouper's sort key.

use std::fmt;
use std::sync::Arc;

use ndarray::{ArrayView2, ArrayViewMut2, Zip};

type FuseFn = dyn Fn(&mut ArrayViewMut2<f64>, &ArrayView2<f64>, f64) + Send + Sync;

/// True when `value` is the nodata value. NaN nodata matches NaN.
pub fn is_nodata(value: f64, nodata: f64) -> bool {
    if nodata.is_nan() {
        value.is_nan()
    } else {
        value == nodata || value.is_nan()
    }
}

/// A named, shareable fuse function.
#[derive(Clone)]
pub struct Fuser {
    name: String,
    f: Arc<FuseFn>,
}

impl fmt::Debug for Fuser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fuser").field(&self.name).finish()
    }
}

impl Default for Fuser {
    fn default() -> Self {
        Self::copy_first()
    }
}

impl Fuser {
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(&mut ArrayViewMut2<f64>, &ArrayView2<f64>, f64) + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            f: Arc::new(f),
        }
    }

    /// First valid observation wins: only nodata pixels of `dst` are filled.
    pub fn copy_first() -> Self {
        Self::new("copy_first", |dst, src, nodata| {
            Zip::from(dst).and(src).for_each(|d, &s| {
                if is_nodata(*d, nodata) && !is_nodata(s, nodata) {
                    *d = s;
                }
            });
        })
    }

    /// Last valid observation wins.
    pub fn copy_last() -> Self {
        Self::new("copy_last", |dst, src, nodata| {
            Zip::from(dst).and(src).for_each(|d, &s| {
                if !is_nodata(s, nodata) {
                    *d = s;
                }
            });
        })
    }

    pub fn max() -> Self {
        Self::new("max", |dst, src, nodata| {
            Zip::from(dst).and(src).for_each(|d, &s| {
                if !is_nodata(s, nodata) && (is_nodata(*d, nodata) || s > *d) {
                    *d = s;
                }
            });
        })
    }

    pub fn min() -> Self {
        Self::new("min", |dst, src, nodata| {
            Zip::from(dst).and(src).for_each(|d, &s| {
                if !is_nodata(s, nodata) && (is_nodata(*d, nodata) || s < *d) {
                    *d = s;
                }
            });
        })
    }

    /// Built-in fuser named by a product's `fuse` property.
    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "copy_first" | "first" => Some(Self::copy_first()),
            "copy_last" | "last" | "most_recent" => Some(Self::copy_last()),
            "max" => Some(Self::max()),
            "min" => Some(Self::min()),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Merge `src` into `dst`. Both views have the same shape.
    pub fn apply(&self, dst: &mut ArrayViewMut2<f64>, src: &ArrayView2<f64>, nodata: f64) {
        (self.f)(dst, src, nodata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    const ND: f64 = -999.0;

    fn fuse(fuser: &Fuser, dst: &mut Array2<f64>, src: &Array2<f64>) {
        fuser.apply(&mut dst.view_mut(), &src.view(), ND);
    }

    #[test]
    fn test_copy_first_preserves_valid_and_fills_nodata() {
        let mut dst = array![[ND, 1.0], [2.0, ND]];
        let src = array![[5.0, ND], [7.0, ND]];
        fuse(&Fuser::copy_first(), &mut dst, &src);
        assert_eq!(dst, array![[5.0, 1.0], [2.0, ND]]);
    }

    #[test]
    fn test_disjoint_planes_commute() {
        let a = array![[1.0, 1.0, ND], [ND, ND, ND]];
        let b = array![[ND, ND, ND], [ND, 2.0, 2.0]];

        for fuser in [Fuser::copy_first(), Fuser::copy_last(), Fuser::max(), Fuser::min()] {
            let mut ab = Array2::from_elem((2, 3), ND);
            fuse(&fuser, &mut ab, &a);
            fuse(&fuser, &mut ab, &b);

            let mut ba = Array2::from_elem((2, 3), ND);
            fuse(&fuser, &mut ba, &b);
            fuse(&fuser, &mut ba, &a);

            assert_eq!(ab, ba, "{}", fuser.name());
            assert_eq!(ab, array![[1.0, 1.0, ND], [ND, 2.0, 2.0]]);
        }
    }

    #[test]
    fn test_order_matters_on_overlap() {
        let first = array![[5.0]];
        let second = array![[7.0]];

        let mut dst = Array2::from_elem((1, 1), ND);
        fuse(&Fuser::copy_first(), &mut dst, &first);
        fuse(&Fuser::copy_first(), &mut dst, &second);
        assert_eq!(dst[[0, 0]], 5.0);

        let mut dst = Array2::from_elem((1, 1), ND);
        fuse(&Fuser::copy_last(), &mut dst, &first);
        fuse(&Fuser::copy_last(), &mut dst, &second);
        assert_eq!(dst[[0, 0]], 7.0);
    }

    #[test]
    fn test_max_min() {
        let mut hi = array![[ND, 3.0, 3.0]];
        let mut lo = hi.clone();
        let src = array![[1.0, 4.0, ND]];
        fuse(&Fuser::max(), &mut hi, &src);
        fuse(&Fuser::min(), &mut lo, &src);
        assert_eq!(hi, array![[1.0, 4.0, 3.0]]);
        assert_eq!(lo, array![[1.0, 3.0, 3.0]]);
    }

    #[test]
    fn test_nan_nodata() {
        let mut dst = array![[f64::NAN, 1.0]];
        let src = array![[2.0, f64::NAN]];
        Fuser::copy_first().apply(&mut dst.view_mut(), &src.view(), f64::NAN);
        assert_eq!(dst, array![[2.0, 1.0]]);
    }

    #[test]
    fn test_by_name() {
        assert_eq!(Fuser::by_name("MAX").map(|f| f.name().to_string()), Some("max".into()));
        assert_eq!(Fuser::by_name("most_recent").unwrap().name(), "copy_last");
        assert!(Fuser::by_name("median").is_none());
    }
}
