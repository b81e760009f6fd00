//! Index storage: the driver abstraction over a backing store and the
//! resource APIs built on it.

mod datasets;
pub mod memory;
mod metadata_types;
pub mod postgres;
mod products;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use cube_common::{BoundingBox, Document, TimeRange};

use crate::config::CatalogConfig;
use crate::dataset::{Dataset, LineageRef};
use crate::error::{CatalogError, Result};
use crate::metadata_type::MetadataType;
use crate::product::Product;

pub use datasets::{DatasetResource, DatasetSearch};
pub use memory::MemoryIndex;
pub use metadata_types::MetadataTypeResource;
pub use postgres::PostgresIndex;
pub use products::ProductResource;

/// A dataset as persisted by a driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRecord {
    pub id: Uuid,
    pub product: String,
    pub metadata: Document,
    /// Active locations, most recent first.
    pub uris: Vec<String>,
    pub indexed_time: Option<DateTime<Utc>>,
    pub archived_time: Option<DateTime<Utc>>,
    pub sources: Vec<LineageRef>,
    /// Precomputed acquisition time span, used for prefiltering.
    pub time: Option<TimeRange>,
    /// Precomputed lon/lat bounds, used for prefiltering.
    pub bounds: Option<BoundingBox>,
}

impl DatasetRecord {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        Self {
            id: dataset.id,
            product: dataset.product.name.clone(),
            metadata: dataset.metadata.clone(),
            uris: dataset.uris.clone(),
            indexed_time: dataset.indexed_time,
            archived_time: dataset.archived_time,
            sources: dataset.sources.clone(),
            time: dataset.time_range(),
            bounds: dataset.bounds_lonlat(),
        }
    }

    pub fn into_dataset(self, product: Arc<Product>) -> Dataset {
        Dataset {
            id: self.id,
            product,
            metadata: self.metadata,
            uris: self.uris,
            indexed_time: self.indexed_time,
            archived_time: self.archived_time,
            sources: self.sources,
        }
    }
}

/// Coarse, index-level dataset filter. Records lacking a precomputed time
/// or bounds pass the corresponding check; exact evaluation happens later.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    pub products: Vec<String>,
    pub include_archived: bool,
    pub time: Option<TimeRange>,
    pub bounds: Option<BoundingBox>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl CandidateFilter {
    pub fn accepts(&self, record: &DatasetRecord) -> bool {
        if !self.products.iter().any(|p| p == &record.product) {
            return false;
        }
        if record.archived_time.is_some() && !self.include_archived {
            return false;
        }
        if let (Some(query), Some(time)) = (&self.time, &record.time) {
            if !query.overlaps(time) {
                return false;
            }
        }
        if let (Some(query), Some(bounds)) = (&self.bounds, &record.bounds) {
            if !query.intersects(bounds) {
                return false;
            }
        }
        true
    }
}

/// Storage backend for the index.
///
/// Each dataset insert is atomic: the record, its locations and its
/// lineage are stored together or not at all.
#[async_trait]
pub trait IndexDriver: Send + Sync {
    /// Prepare the backing store (create schema).
    async fn init(&self) -> Result<()>;

    async fn insert_metadata_type(&self, metadata_type: &MetadataType) -> Result<()>;
    async fn update_metadata_type(&self, metadata_type: &MetadataType) -> Result<()>;
    async fn get_metadata_type(&self, name: &str) -> Result<Option<Arc<MetadataType>>>;
    async fn list_metadata_types(&self) -> Result<Vec<Arc<MetadataType>>>;

    async fn insert_product(&self, product: &Product) -> Result<()>;
    async fn update_product(&self, product: &Product) -> Result<()>;
    async fn delete_product(&self, name: &str) -> Result<()>;
    async fn get_product(&self, name: &str) -> Result<Option<Arc<Product>>>;
    async fn list_products(&self) -> Result<Vec<Arc<Product>>>;
    /// Datasets of a product, archived included.
    async fn count_product_datasets(&self, name: &str) -> Result<u64>;
    /// Earliest and latest acquisition time of a product's active datasets.
    async fn product_time_bounds(&self, name: &str) -> Result<Option<TimeRange>>;

    /// Insert a dataset. If it already exists, any new locations are merged
    /// and `false` is returned.
    async fn insert_dataset(&self, record: &DatasetRecord, with_lineage: bool) -> Result<bool>;
    async fn get_dataset(&self, id: Uuid) -> Result<Option<DatasetRecord>>;
    async fn datasets_exist(&self, ids: &[Uuid]) -> Result<Vec<bool>>;
    /// Set (or clear, with `None`) the archived time. Returns rows changed.
    async fn set_archived(&self, ids: &[Uuid], time: Option<DateTime<Utc>>) -> Result<u64>;
    /// Datasets that list `id` as a lineage source.
    async fn derived_ids(&self, id: Uuid) -> Result<Vec<Uuid>>;
    /// Prefiltered datasets in stable insertion order.
    async fn candidates(&self, filter: &CandidateFilter) -> Result<Vec<DatasetRecord>>;

    async fn insert_location(&self, id: Uuid, uri: &str) -> Result<bool>;
    async fn delete_location(&self, id: Uuid, uri: &str) -> Result<bool>;
    async fn set_location_archived(
        &self,
        id: Uuid,
        uri: &str,
        time: Option<DateTime<Utc>>,
    ) -> Result<bool>;
    /// Active (or archived) locations of a dataset, most recent first.
    async fn locations(&self, id: Uuid, archived: bool) -> Result<Vec<String>>;
}

/// Entry point to the catalog.
#[derive(Clone)]
pub struct Index {
    driver: Arc<dyn IndexDriver>,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index").finish_non_exhaustive()
    }
}

impl Index {
    pub fn new(driver: Arc<dyn IndexDriver>) -> Self {
        Self { driver }
    }

    /// A fresh, empty in-process index.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryIndex::new()))
    }

    /// Open the index described by `config`: PostgreSQL when a database URL
    /// is set, otherwise in-memory.
    pub async fn connect(config: &CatalogConfig) -> Result<Self> {
        config.validate().map_err(CatalogError::Validation)?;
        match &config.database_url {
            Some(url) => {
                let driver = PostgresIndex::connect(url, config.max_connections).await?;
                if config.auto_migrate {
                    driver.init().await?;
                }
                Ok(Self::new(Arc::new(driver)))
            }
            None => Ok(Self::in_memory()),
        }
    }

    pub fn driver(&self) -> &Arc<dyn IndexDriver> {
        &self.driver
    }

    pub fn metadata_types(&self) -> MetadataTypeResource {
        MetadataTypeResource::new(self.driver.clone())
    }

    pub fn products(&self) -> ProductResource {
        ProductResource::new(self.driver.clone())
    }

    pub fn datasets(&self) -> DatasetResource {
        DatasetResource::new(self.driver.clone())
    }
}
