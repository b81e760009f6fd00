//! Eager loading: read, reproject and fuse groups of datasets into a cube.
//!
//! For every group and every band a destination plane is filled with the
//! band's nodata value. Each dataset of the group is then opened through the
//! driver registry, the part overlapping the destination is read and
//! resampled, and the result is fused into the plane in group order.

use std::collections::HashMap;

use ndarray::{s, Array2, Array4, ArrayView2, ArrayView3, ArrayViewMut2};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use catalog::{Dataset, Measurement, Product};

use crate::driver::{BandSource, DriverRegistry};
use crate::error::{LoadError, Result};
use crate::fuse::Fuser;
use crate::geobox::GeoBox;
use crate::grouping::{Group, GroupKey};
use crate::resampling::Resampling;
use crate::window::{compute_read_window, Window};

/// What to do when one dataset's band cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoErrorPolicy {
    /// Log, record in [`DataCube::skipped`] and fuse the remaining datasets.
    #[default]
    Skip,
    /// Fail the whole load.
    Abort,
}

impl IoErrorPolicy {
    /// Parse from string (case-insensitive). Unknown values mean skip.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "abort" | "fail" | "raise" => Self::Abort,
            _ => Self::Skip,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Abort => "abort",
        }
    }
}

/// Per-call load settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub io_error_policy: IoErrorPolicy,
    /// Resampling for bands without an entry in `band_resampling`.
    pub resampling: Resampling,
    pub band_resampling: HashMap<String, Resampling>,
}

impl LoadOptions {
    pub fn with_policy(mut self, policy: IoErrorPolicy) -> Self {
        self.io_error_policy = policy;
        self
    }

    pub fn with_resampling(mut self, resampling: Resampling) -> Self {
        self.resampling = resampling;
        self
    }

    pub fn with_band_resampling(mut self, band: &str, resampling: Resampling) -> Self {
        self.band_resampling.insert(band.to_string(), resampling);
        self
    }

    pub fn resampling_for(&self, band: &str) -> Resampling {
        self.band_resampling
            .get(band)
            .copied()
            .unwrap_or(self.resampling)
    }
}

/// A dataset contribution left out of the result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRead {
    /// Index of the group in [`DataCube::keys`].
    pub group: usize,
    pub dataset: Uuid,
    pub band: String,
    pub reason: String,
}

/// A loaded cube indexed `[group, band, y, x]`.
#[derive(Debug, Clone)]
pub struct DataCube {
    /// Name of the group dimension.
    pub dimension: String,
    pub keys: Vec<GroupKey>,
    pub bands: Vec<String>,
    pub geobox: GeoBox,
    pub data: Array4<f64>,
    /// Nodata value of each band, parallel to `bands`.
    pub nodata: Vec<f64>,
    pub skipped: Vec<SkippedRead>,
}

impl DataCube {
    /// `(groups, bands, height, width)`
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    /// No groups were loaded.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn band_index(&self, band: &str) -> Option<usize> {
        self.bands.iter().position(|b| b == band)
    }

    /// All groups of one band, `[group, y, x]`.
    pub fn band(&self, band: &str) -> Option<ArrayView3<'_, f64>> {
        let b = self.band_index(band)?;
        Some(self.data.slice(s![.., b, .., ..]))
    }

    /// One band of one group.
    pub fn plane(&self, group: usize, band: &str) -> Option<ArrayView2<'_, f64>> {
        let b = self.band_index(band)?;
        if group >= self.keys.len() {
            return None;
        }
        Some(self.data.slice(s![group, b, .., ..]))
    }

    /// Nodata value of a band.
    pub fn nodata_of(&self, band: &str) -> Option<f64> {
        self.band_index(band).map(|b| self.nodata[b])
    }
}

/// Resolve requested band names (or aliases) against a product. An empty
/// request selects every band.
pub fn resolve_measurements(product: &Product, names: &[String]) -> Result<Vec<Measurement>> {
    if let Some(missing) = names.iter().find(|n| product.measurement(n).is_none()) {
        return Err(LoadError::MissingMeasurement {
            product: product.name.clone(),
            name: missing.clone(),
        });
    }
    Ok(product.lookup_measurements(names)?)
}

/// Shared inputs of every plane computation of one load.
pub(crate) struct PlaneContext<'a> {
    pub fuser: &'a Fuser,
    pub options: &'a LoadOptions,
    pub registry: &'a DriverRegistry,
}

/// Read one band of one dataset, resampled onto `geobox`.
///
/// Returns the destination window written and the block for it, with
/// missing pixels set to the band nodata and values coerced to the band
/// dtype. `None` when the dataset does not overlap `geobox`.
fn read_contribution(
    dataset: &Dataset,
    measurement: &Measurement,
    geobox: &GeoBox,
    resampling: Resampling,
    registry: &DriverRegistry,
) -> Result<Option<(Window, Array2<f64>)>> {
    let band = BandSource::new(dataset, &measurement.name)?;
    let source = registry.open(&band)?;

    let Some(read) = compute_read_window(&source.geometry(), geobox) else {
        return Ok(None);
    };
    if read.dst_window.is_empty() {
        return Ok(None);
    }

    let mut block = source.reproject(geobox, &read, resampling)?;
    if block.dim() != read.dst_window.shape() {
        return Err(band.io_error(format!(
            "driver returned a {:?} block for a {:?} window",
            block.dim(),
            read.dst_window.shape()
        )));
    }

    let nodata = measurement.fill_value();
    let dtype = measurement.dtype;
    block.mapv_inplace(|v| if v.is_nan() { nodata } else { dtype.coerce(v) });
    Ok(Some((read.dst_window, block)))
}

/// Fuse every dataset of one group into `plane`, which covers `geobox`.
///
/// Returns the reads skipped under [`IoErrorPolicy::Skip`]. A read failure
/// under [`IoErrorPolicy::Abort`] is returned as an error; `plane` may then
/// be partially written and must be discarded.
pub(crate) fn fuse_plane(
    plane: &mut ArrayViewMut2<f64>,
    geobox: &GeoBox,
    group: usize,
    datasets: &[Dataset],
    measurement: &Measurement,
    ctx: &PlaneContext<'_>,
) -> Result<Vec<SkippedRead>> {
    let resampling = ctx.options.resampling_for(&measurement.name);
    let nodata = measurement.fill_value();
    let mut skipped = Vec::new();

    for dataset in datasets {
        match read_contribution(dataset, measurement, geobox, resampling, ctx.registry) {
            Ok(Some((window, block))) => {
                let mut target = plane.slice_mut(s![
                    window.row_off..window.row_end(),
                    window.col_off..window.col_end()
                ]);
                ctx.fuser.apply(&mut target, &block.view(), nodata);
            }
            Ok(None) => {
                tracing::trace!(dataset = %dataset.id, band = %measurement.name, "No overlap");
            }
            Err(e) if e.is_read_failure() && ctx.options.io_error_policy == IoErrorPolicy::Skip => {
                tracing::warn!(
                    dataset = %dataset.id,
                    band = %measurement.name,
                    group,
                    error = %e,
                    "Skipping unreadable dataset"
                );
                skipped.push(SkippedRead {
                    group,
                    dataset: dataset.id,
                    band: measurement.name.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(skipped)
}

/// Load `groups` onto `geobox`.
///
/// The result has one entry per group, even when nothing in a group
/// overlapped the grid. With no groups the cube has shape
/// `[0, bands, height, width]`.
pub fn load_data(
    groups: &[Group],
    geobox: &GeoBox,
    measurements: &[Measurement],
    fuser: &Fuser,
    options: &LoadOptions,
    registry: &DriverRegistry,
) -> Result<DataCube> {
    let (height, width) = geobox.shape;
    let nodata: Vec<f64> = measurements.iter().map(Measurement::fill_value).collect();

    tracing::info!(
        groups = groups.len(),
        bands = measurements.len(),
        height,
        width,
        fuser = fuser.name(),
        "Loading data"
    );

    let mut data = Array4::from_shape_fn(
        (groups.len(), measurements.len(), height, width),
        |(_, b, _, _)| nodata[b],
    );

    let ctx = PlaneContext {
        fuser,
        options,
        registry,
    };
    let mut skipped = Vec::new();
    for (g, group) in groups.iter().enumerate() {
        for (b, measurement) in measurements.iter().enumerate() {
            let mut plane = data.slice_mut(s![g, b, .., ..]);
            skipped.extend(fuse_plane(&mut plane, geobox, g, &group.datasets, measurement, &ctx)?);
        }
    }

    tracing::info!(groups = groups.len(), skipped = skipped.len(), "Load complete");

    Ok(DataCube {
        dimension: "time".to_string(),
        keys: groups.iter().map(|g| g.key.clone()).collect(),
        bands: measurements.iter().map(|m| m.name.clone()).collect(),
        geobox: geobox.clone(),
        data,
        nodata,
        skipped,
    })
}
