//! Data source drivers.
//!
//! A [`DriverFactory`] opens one band of one dataset as a [`DataSource`].
//! Factories are looked up in a [`DriverRegistry`] by URI scheme and,
//! optionally, the dataset's file format:
//!
//! ```rust,ignore
//! let memory = Arc::new(MemoryDriver::new());
//! let registry = DriverRegistry::new().with_memory(memory.clone());
//!
//! let source = registry.open(&BandSource::new(&dataset, "red")?)?;
//! let window = compute_read_window(&source.geometry(), &geobox);
//! ```

mod memory;

pub use memory::{MemoryDriver, MemoryRaster};

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::Array2;
use uuid::Uuid;

use catalog::{DType, Dataset};

use crate::error::{LoadError, Result};
use crate::geobox::{GeoBox, RasterGeometry};
use crate::resampling::{decimate, warp, Resampling};
use crate::window::{ReadStrategy, ReadWindow, Window};

/// Everything a driver needs to locate one band of one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct BandSource {
    pub dataset_id: Uuid,
    /// Measurement name as defined by the product.
    pub band: String,
    pub uri: String,
    /// Dataset file format, e.g. `GeoTIFF`.
    pub format: Option<String>,
    /// 1-based band index within a multi-band file.
    pub band_index: Option<usize>,
    /// Variable name within a multi-variable container.
    pub layer: Option<String>,
    /// Grid the dataset document declares for the band, if any.
    pub grid: Option<GeoBox>,
}

impl BandSource {
    /// Resolve where `band` of `dataset` is stored.
    pub fn new(dataset: &Dataset, band: &str) -> Result<Self> {
        let info = dataset.measurement_info(band).ok_or_else(|| {
            LoadError::io(dataset.id, band, "dataset document has no location for band")
        })?;
        let grid = match (dataset.grids().remove(&info.grid), dataset.crs()) {
            (Some(grid), Some(crs)) => Some(GeoBox::from_grid(&grid, crs)),
            _ => None,
        };
        Ok(Self {
            dataset_id: dataset.id,
            band: band.to_string(),
            uri: info.uri,
            format: dataset.format(),
            band_index: info.band,
            layer: info.layer,
            grid,
        })
    }

    /// URI scheme; `file` when the URI has none.
    pub fn scheme(&self) -> &str {
        self.uri
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .unwrap_or("file")
    }

    /// Error for a failed read of this band.
    pub fn io_error(&self, message: impl Into<String>) -> LoadError {
        LoadError::io(self.dataset_id, self.band.clone(), message)
    }
}

/// One opened band: a georeferenced raster that can be read by window.
///
/// Reads are synchronous; parallelism comes from the scheduler running
/// many reads at once.
pub trait DataSource: Send + Sync {
    /// Native pixel grid.
    fn geometry(&self) -> RasterGeometry;

    /// Storage data type.
    fn dtype(&self) -> DType;

    /// Stored nodata value, if any.
    fn nodata(&self) -> Option<f64>;

    /// Read a block of native pixels. The window lies inside
    /// [`geometry`](Self::geometry).
    fn read(&self, window: &Window) -> Result<Array2<f64>>;

    /// Produce the pixels of `read.dst_window` of `dst`.
    ///
    /// The result has the destination window's shape; pixels with no
    /// source data are NaN. Nodata is turned into NaN before resampling.
    fn reproject(&self, dst: &GeoBox, read: &ReadWindow, resampling: Resampling) -> Result<Array2<f64>> {
        let mut block = self.read(&read.src_window)?;
        if let Some(nodata) = self.nodata().filter(|v| !v.is_nan()) {
            block.mapv_inplace(|v| if v == nodata { f64::NAN } else { v });
        }

        Ok(match read.strategy {
            ReadStrategy::Copy => block,
            ReadStrategy::Decimate { x, y }
                if matches!(resampling, Resampling::Nearest | Resampling::Average) =>
            {
                decimate(&block.view(), x, y, resampling)
            }
            _ => {
                let src_grid = self.geometry().window(&read.src_window);
                let dst_grid = dst.window(&read.dst_window);
                warp(&block.view(), &src_grid, &dst_grid, resampling)?
            }
        })
    }
}

/// Opens data sources for one kind of storage.
pub trait DriverFactory: Send + Sync {
    /// Driver name for logs.
    fn name(&self) -> &str;

    fn open(&self, source: &BandSource) -> Result<Box<dyn DataSource>>;
}

/// Lookup table from (scheme, format) to driver.
///
/// Built once and owned by the caller; there is no global registry.
#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: HashMap<(String, Option<String>), Arc<dyn DriverFactory>>,
    fallback: Option<Arc<dyn DriverFactory>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.drivers.keys().collect();
        keys.sort();
        f.debug_struct("DriverRegistry")
            .field("drivers", &keys)
            .field("fallback", &self.fallback.as_ref().map(|d| d.name().to_string()))
            .finish()
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for a scheme, optionally restricted to one format.
    pub fn register(&mut self, scheme: &str, format: Option<&str>, factory: Arc<dyn DriverFactory>) {
        self.drivers.insert(
            (scheme.to_lowercase(), format.map(str::to_lowercase)),
            factory,
        );
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_driver(mut self, scheme: &str, format: Option<&str>, factory: Arc<dyn DriverFactory>) -> Self {
        self.register(scheme, format, factory);
        self
    }

    /// Serve `mem://` URIs from `driver`.
    pub fn with_memory(self, driver: Arc<MemoryDriver>) -> Self {
        self.with_driver("mem", None, driver)
    }

    /// Driver used when nothing more specific is registered.
    pub fn with_fallback(mut self, factory: Arc<dyn DriverFactory>) -> Self {
        self.fallback = Some(factory);
        self
    }

    /// Most specific driver for a band: exact (scheme, format), then the
    /// scheme alone, then the fallback.
    pub fn resolve(&self, source: &BandSource) -> Result<Arc<dyn DriverFactory>> {
        let scheme = source.scheme().to_lowercase();
        let format = source.format.as_deref().map(str::to_lowercase);

        format
            .and_then(|f| self.drivers.get(&(scheme.clone(), Some(f))))
            .or_else(|| self.drivers.get(&(scheme, None)))
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| LoadError::DriverNotFound {
                uri: source.uri.clone(),
                format: source.format.clone(),
            })
    }

    pub fn open(&self, source: &BandSource) -> Result<Box<dyn DataSource>> {
        let driver = self.resolve(source)?;
        tracing::debug!(
            driver = driver.name(),
            uri = %source.uri,
            band = %source.band,
            "Opening data source"
        );
        driver.open(source)
    }
}
