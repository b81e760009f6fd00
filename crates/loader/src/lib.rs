//! Loading catalogued datasets into dense data cubes.
//!
//! Loading runs in three stages:
//!
//! 1. **Find**: search the catalog for datasets matching a [`LoadQuery`].
//! 2. **Group**: bucket datasets by a [`GroupBy`] key, by default the local
//!    solar day of acquisition.
//! 3. **Load**: for every group and band, read each dataset through a
//!    [`DataSource`], resample it onto the output [`GeoBox`] and [`Fuser`]
//!    it into one plane.
//!
//! [`Datacube`] wires the three together; each stage is also usable on its
//! own. [`LazyCube`] defers the load stage into independent compute units.

pub mod config;
pub mod datacube;
pub mod driver;
pub mod error;
pub mod fuse;
pub mod geobox;
pub mod grouping;
pub mod lazy;
pub mod load;
pub mod masking;
pub mod resampling;
pub mod window;

pub use config::LoaderConfig;
pub use datacube::{Datacube, LoadQuery};
pub use driver::{BandSource, DataSource, DriverFactory, DriverRegistry, MemoryDriver, MemoryRaster};
pub use error::{LoadError, Result};
pub use fuse::Fuser;
pub use geobox::{Affine, GeoBox, GridSpec, RasterGeometry};
pub use grouping::{group_datasets, Group, GroupBy, GroupKey};
pub use lazy::{CancellationToken, LazyCube, RayonScheduler, Scheduler, SequentialScheduler};
pub use load::{load_data, resolve_measurements, DataCube, IoErrorPolicy, LoadOptions, SkippedRead};
pub use masking::{apply_mask, describe_flags, make_mask, valid_data_mask, FlagDescription};
pub use resampling::Resampling;
pub use window::{compute_read_window, ReadStrategy, ReadWindow, Window};
