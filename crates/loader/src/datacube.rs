//! The load surface: find datasets, group them, load them.
//!
//! ```rust,ignore
//! let datacube = Datacube::new(index, drivers, LoaderConfig::from_env())?;
//! let query = LoadQuery::new("ls8_ard")
//!     .measurements(&["red", "nir"])
//!     .time(start, end)
//!     .lonlat((148.0, 149.0), (-36.0, -35.0));
//! let cube = datacube.load(&query).await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use catalog::{Dataset, Index, Measurement, Product, SearchTerms, TermValue};
use cube_common::{BoundingBox, Crs, TimeRange};
use projection::Geometry;

use crate::config::LoaderConfig;
use crate::driver::DriverRegistry;
use crate::error::{LoadError, Result};
use crate::fuse::Fuser;
use crate::geobox::{GeoBox, GridSpec};
use crate::grouping::{group_datasets, Group, GroupBy};
use crate::lazy::{LazyCube, RayonScheduler};
use crate::load::{self, resolve_measurements, DataCube, IoErrorPolicy, LoadOptions};
use crate::resampling::Resampling;

type DatasetPredicate = Arc<dyn Fn(&Dataset) -> bool + Send + Sync>;

/// A spatio-temporal load request.
#[derive(Clone, Default)]
pub struct LoadQuery {
    pub product: Option<String>,
    /// Band names or aliases; empty loads every band.
    pub measurements: Vec<String>,
    pub time: Option<TimeRange>,
    pub lon: Option<(f64, f64)>,
    pub lat: Option<(f64, f64)>,
    /// `(x range, y range, crs)` in a projected CRS.
    pub xy: Option<((f64, f64), (f64, f64), Crs)>,
    pub geopolygon: Option<Geometry>,
    /// Extra equality terms on search fields, e.g. `platform`.
    pub fields: Vec<(String, TermValue)>,
    /// Load onto exactly this grid.
    pub like: Option<GeoBox>,
    pub output_crs: Option<Crs>,
    pub resolution: Option<(f64, f64)>,
    pub align: Option<(f64, f64)>,
    pub group_by: Option<GroupBy>,
    pub resampling: Option<Resampling>,
    pub band_resampling: HashMap<String, Resampling>,
    pub fuse: Option<Fuser>,
    /// Chunk size (rows, cols) of a lazy load.
    pub chunks: Option<(usize, usize)>,
    /// Overrides the configured I/O error policy: `true` skips, `false` aborts.
    pub skip_broken: Option<bool>,
    pub dataset_predicate: Option<DatasetPredicate>,
    pub limit: Option<usize>,
}

impl fmt::Debug for LoadQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadQuery")
            .field("product", &self.product)
            .field("measurements", &self.measurements)
            .field("time", &self.time)
            .field("lon", &self.lon)
            .field("lat", &self.lat)
            .field("xy", &self.xy)
            .field("fields", &self.fields)
            .field("output_crs", &self.output_crs)
            .field("resolution", &self.resolution)
            .field("group_by", &self.group_by)
            .field("fuse", &self.fuse)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl LoadQuery {
    pub fn new(product: &str) -> Self {
        Self {
            product: Some(product.to_string()),
            ..Self::default()
        }
    }

    pub fn measurements(mut self, names: &[&str]) -> Self {
        self.measurements = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn time(mut self, start: chrono::DateTime<chrono::Utc>, end: chrono::DateTime<chrono::Utc>) -> Self {
        self.time = Some(TimeRange::new(start, end));
        self
    }

    /// Longitude and latitude ranges in degrees.
    pub fn lonlat(mut self, lon: (f64, f64), lat: (f64, f64)) -> Self {
        self.lon = Some(lon);
        self.lat = Some(lat);
        self
    }

    pub fn xy(mut self, x: (f64, f64), y: (f64, f64), crs: Crs) -> Self {
        self.xy = Some((x, y, crs));
        self
    }

    pub fn geopolygon(mut self, geometry: Geometry) -> Self {
        self.geopolygon = Some(geometry);
        self
    }

    pub fn field(mut self, name: &str, value: impl Into<TermValue>) -> Self {
        self.fields.push((name.to_string(), value.into()));
        self
    }

    pub fn like(mut self, geobox: GeoBox) -> Self {
        self.like = Some(geobox);
        self
    }

    pub fn output_crs(mut self, crs: Crs, resolution: (f64, f64)) -> Self {
        self.output_crs = Some(crs);
        self.resolution = Some(resolution);
        self
    }

    pub fn align(mut self, x: f64, y: f64) -> Self {
        self.align = Some((x, y));
        self
    }

    pub fn group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = Some(group_by);
        self
    }

    pub fn resampling(mut self, resampling: Resampling) -> Self {
        self.resampling = Some(resampling);
        self
    }

    pub fn band_resampling(mut self, band: &str, resampling: Resampling) -> Self {
        self.band_resampling.insert(band.to_string(), resampling);
        self
    }

    pub fn fuse(mut self, fuser: Fuser) -> Self {
        self.fuse = Some(fuser);
        self
    }

    pub fn chunks(mut self, rows: usize, cols: usize) -> Self {
        self.chunks = Some((rows, cols));
        self
    }

    pub fn skip_broken(mut self, skip: bool) -> Self {
        self.skip_broken = Some(skip);
        self
    }

    pub fn dataset_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Dataset) -> bool + Send + Sync + 'static,
    {
        self.dataset_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Spatial constraint of the query, if any. The geopolygon wins over
    /// x/y ranges, which win over lon/lat ranges.
    pub fn geometry(&self) -> Result<Option<Geometry>> {
        if let Some(geometry) = &self.geopolygon {
            return Ok(Some(geometry.clone()));
        }
        if let Some(((x0, x1), (y0, y1), crs)) = self.xy {
            let bbox = BoundingBox::checked(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))?;
            return Ok(Some(Geometry::from_bbox(&bbox, crs)));
        }
        if self.lon.is_none() && self.lat.is_none() {
            return Ok(None);
        }
        let (x0, x1) = self.lon.unwrap_or((-180.0, 180.0));
        let (y0, y1) = self.lat.unwrap_or((-90.0, 90.0));
        let bbox = BoundingBox::checked(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))?;
        Ok(Some(Geometry::from_bbox(&bbox, Crs::wgs84())))
    }

    fn search_terms(&self) -> Result<SearchTerms> {
        let mut terms = SearchTerms::new();
        if let Some(product) = &self.product {
            terms = terms.product(product.clone());
        }
        if let Some(time) = self.time {
            terms = terms.time_range(time);
        }
        let geometry = match self.geometry()? {
            Some(geometry) => Some(geometry),
            None => self.like.as_ref().map(GeoBox::extent).transpose()?,
        };
        if let Some(geometry) = geometry {
            terms = terms.geopolygon(geometry);
        }
        for (name, value) in &self.fields {
            terms = terms.eq(name.clone(), value.clone());
        }
        if let Some(n) = self.limit {
            terms = terms.limit(n);
        }
        Ok(terms)
    }
}

/// Catalog plus drivers: the entry point for loading data.
#[derive(Debug, Clone)]
pub struct Datacube {
    index: Index,
    drivers: Arc<DriverRegistry>,
    config: LoaderConfig,
}

impl Datacube {
    pub fn new(index: Index, drivers: DriverRegistry, config: LoaderConfig) -> Result<Self> {
        config.validate().map_err(LoadError::InvalidConfig)?;
        Ok(Self {
            index,
            drivers: Arc::new(drivers),
            config,
        })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub async fn list_products(&self) -> Result<Vec<Arc<Product>>> {
        let mut products = self.index.products().get_all().await?;
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    /// Every measurement of every product, as `(product, measurement)`.
    pub async fn list_measurements(&self) -> Result<Vec<(String, Measurement)>> {
        Ok(self
            .list_products()
            .await?
            .iter()
            .flat_map(|p| p.measurements.iter().map(|m| (p.name.clone(), m.clone())))
            .collect())
    }

    /// Datasets matching the query's product, time, space and field terms.
    pub async fn find_datasets(&self, query: &LoadQuery) -> Result<Vec<Dataset>> {
        let terms = query.search_terms()?;
        let mut datasets = self.index.datasets().search(&terms).await?;
        if let Some(predicate) = &query.dataset_predicate {
            datasets.retain(|d| predicate(d));
        }
        tracing::debug!(
            product = ?query.product,
            found = datasets.len(),
            "Found datasets"
        );
        Ok(datasets)
    }

    pub fn group_datasets(&self, datasets: Vec<Dataset>, group_by: &GroupBy) -> Vec<Group> {
        group_datasets(datasets, group_by)
    }

    /// Load groups onto `geobox` with the configured options.
    pub fn load_data(
        &self,
        groups: &[Group],
        geobox: &GeoBox,
        measurements: &[Measurement],
        fuser: &Fuser,
    ) -> Result<DataCube> {
        load::load_data(
            groups,
            geobox,
            measurements,
            fuser,
            &self.config.load_options(),
            &self.drivers,
        )
    }

    /// Search, group and load eagerly.
    pub async fn load(&self, query: &LoadQuery) -> Result<DataCube> {
        let prepared = self.prepare(query).await?;
        let mut cube = load::load_data(
            &prepared.groups,
            &prepared.geobox,
            &prepared.measurements,
            &prepared.fuser,
            &prepared.options,
            &self.drivers,
        )?;
        cube.dimension = prepared.dimension;
        Ok(cube)
    }

    /// Search and group now; read pixels when the returned cube is computed.
    pub async fn load_lazy(&self, query: &LoadQuery) -> Result<LazyCube> {
        let prepared = self.prepare(query).await?;
        let chunk = query
            .chunks
            .unwrap_or((self.config.chunk_size, self.config.chunk_size));
        Ok(LazyCube::new(
            prepared.groups,
            prepared.geobox,
            prepared.measurements,
            prepared.fuser,
            prepared.options,
            self.drivers.clone(),
            chunk,
        )
        .with_dimension(&prepared.dimension))
    }

    /// Scheduler sized by the configured worker count.
    pub fn scheduler(&self) -> Result<RayonScheduler> {
        RayonScheduler::with_threads(self.config.workers)
    }

    async fn prepare(&self, query: &LoadQuery) -> Result<Prepared> {
        let name = query
            .product
            .as_deref()
            .ok_or_else(|| LoadError::InvalidQuery("a product is required to load".to_string()))?;
        let product = self
            .index
            .products()
            .get_by_name(name)
            .await?
            .ok_or_else(|| LoadError::InvalidQuery(format!("unknown product '{}'", name)))?;

        // Band errors surface before any search or read.
        let measurements = resolve_measurements(&product, &query.measurements)?;
        let datasets = self.find_datasets(query).await?;
        let geobox = output_geobox(query, &product, &datasets)?;

        let group_by = query.group_by.clone().unwrap_or_default();
        let groups = group_datasets(datasets, &group_by);

        Ok(Prepared {
            dimension: group_by.dimension.clone(),
            groups,
            geobox,
            measurements,
            fuser: fuser_for(query, &product),
            options: self.options_for(query),
        })
    }

    fn options_for(&self, query: &LoadQuery) -> LoadOptions {
        let mut options = self.config.load_options();
        if let Some(resampling) = query.resampling {
            options.resampling = resampling;
        }
        options.band_resampling = query.band_resampling.clone();
        if let Some(skip) = query.skip_broken {
            options.io_error_policy = if skip {
                IoErrorPolicy::Skip
            } else {
                IoErrorPolicy::Abort
            };
        }
        options
    }
}

struct Prepared {
    dimension: String,
    groups: Vec<Group>,
    geobox: GeoBox,
    measurements: Vec<Measurement>,
    fuser: Fuser,
    options: LoadOptions,
}

/// The query's fuser, else the product's named fuser, else first-valid-wins.
fn fuser_for(query: &LoadQuery, product: &Product) -> Fuser {
    if let Some(fuser) = &query.fuse {
        return fuser.clone();
    }
    match product.fuse.as_deref() {
        Some(name) => Fuser::by_name(name).unwrap_or_else(|| {
            tracing::warn!(product = %product.name, fuse = name, "Unknown fuse function, using copy_first");
            Fuser::copy_first()
        }),
        None => Fuser::copy_first(),
    }
}

/// Output grid: `like`, else the query's CRS and resolution, else the
/// product's load grid, covering the query geometry or else the union of the
/// datasets' extents.
fn output_geobox(query: &LoadQuery, product: &Product, datasets: &[Dataset]) -> Result<GeoBox> {
    if let Some(like) = &query.like {
        return Ok(like.clone());
    }

    let mut spec = match (query.output_crs, query.resolution) {
        (Some(crs), Some(resolution)) => GridSpec::new(crs, resolution),
        (None, None) => product
            .load
            .as_ref()
            .map(GridSpec::from_load_hints)
            .ok_or_else(|| {
                LoadError::no_grid_spec(format!(
                    "product '{}' declares no load grid; give output_crs and resolution, or like",
                    product.name
                ))
            })?,
        _ => {
            return Err(LoadError::InvalidQuery(
                "output_crs and resolution must be given together".to_string(),
            ))
        }
    };
    if let Some((x, y)) = query.align {
        spec = spec.with_align(x, y);
    }

    if let Some(geometry) = query.geometry()? {
        return Ok(spec.geobox_for(&geometry)?);
    }

    let extent = datasets
        .iter()
        .filter_map(|d| d.extent()?.to_crs(&spec.crs).ok()?.bounding_box())
        .reduce(|a, b| a.union(&b));
    match extent {
        Some(bbox) => Ok(spec.geobox_for_bbox(&bbox)?),
        None => Ok(GeoBox::empty(spec.crs)),
    }
}
