//! In-process rasters served under `mem://` URIs.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use ndarray::{s, Array2};

use catalog::DType;

use super::{BandSource, DataSource, DriverFactory};
use crate::error::Result;
use crate::geobox::{GeoBox, RasterGeometry};
use crate::window::Window;

/// A raster held in memory.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    pub geometry: GeoBox,
    pub data: Arc<Array2<f64>>,
    pub dtype: DType,
    pub nodata: Option<f64>,
}

impl MemoryRaster {
    pub fn new(geometry: GeoBox, data: Array2<f64>, dtype: DType, nodata: Option<f64>) -> Self {
        Self {
            geometry,
            data: Arc::new(data),
            dtype,
            nodata,
        }
    }
}

/// Driver for rasters registered in process, keyed by URI.
///
/// URIs can also be marked as failing, which makes every open of them
/// return an I/O error.
#[derive(Debug)]
pub struct MemoryDriver {
    name: String,
    rasters: RwLock<HashMap<String, MemoryRaster>>,
    failing: RwLock<HashMap<String, String>>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::named("memory")
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A memory driver reporting `name` in logs.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rasters: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, uri: &str, raster: MemoryRaster) {
        self.rasters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri.to_string(), raster);
    }

    /// Register a float64 array covering `geometry`.
    pub fn insert_array(&self, uri: &str, geometry: GeoBox, data: Array2<f64>, nodata: Option<f64>) {
        self.insert(uri, MemoryRaster::new(geometry, data, DType::Float64, nodata));
    }

    /// Make every open of `uri` fail with `message`.
    pub fn fail(&self, uri: &str, message: &str) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri.to_string(), message.to_string());
    }

    pub fn remove(&self, uri: &str) -> bool {
        let removed = self
            .rasters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri)
            .is_some();
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri);
        removed
    }

    pub fn len(&self) -> usize {
        self.rasters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DriverFactory for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, source: &BandSource) -> Result<Box<dyn DataSource>> {
        if let Some(message) = self
            .failing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&source.uri)
        {
            return Err(source.io_error(message.clone()));
        }

        let raster = self
            .rasters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&source.uri)
            .cloned()
            .ok_or_else(|| source.io_error(format!("no such raster: {}", source.uri)))?;

        Ok(Box::new(MemorySource {
            raster,
            source: source.clone(),
        }))
    }
}

struct MemorySource {
    raster: MemoryRaster,
    source: BandSource,
}

impl DataSource for MemorySource {
    fn geometry(&self) -> RasterGeometry {
        self.raster.geometry.clone()
    }

    fn dtype(&self) -> DType {
        self.raster.dtype
    }

    fn nodata(&self) -> Option<f64> {
        self.raster.nodata
    }

    fn read(&self, window: &Window) -> Result<Array2<f64>> {
        let (height, width) = self.raster.data.dim();
        if window.row_end() > height || window.col_end() > width {
            return Err(self.source.io_error(format!(
                "window {:?} outside raster of {}x{}",
                window, height, width
            )));
        }
        Ok(self
            .raster
            .data
            .slice(s![window.row_off..window.row_end(), window.col_off..window.col_end()])
            .to_owned())
    }
}
