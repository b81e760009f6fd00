//! In-process index backed by a `tokio::sync::RwLock`.
//!
//! Searches take the read lock; writes hold the write lock for the whole
//! operation, so every dataset insert is atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use cube_common::TimeRange;

use crate::error::{CatalogError, Result};
use crate::metadata_type::MetadataType;
use crate::product::Product;

use super::{CandidateFilter, DatasetRecord, IndexDriver};

#[derive(Debug, Clone)]
struct StoredLocation {
    uri: String,
    archived: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct StoredDataset {
    record: DatasetRecord,
    /// Oldest first.
    locations: Vec<StoredLocation>,
}

impl StoredDataset {
    fn uris(&self, archived: bool) -> Vec<String> {
        self.locations
            .iter()
            .rev()
            .filter(|l| l.archived.is_some() == archived)
            .map(|l| l.uri.clone())
            .collect()
    }

    fn to_record(&self) -> DatasetRecord {
        let mut record = self.record.clone();
        record.uris = self.uris(false);
        record
    }

    fn add_location(&mut self, uri: &str) -> bool {
        if self.locations.iter().any(|l| l.uri == uri) {
            return false;
        }
        self.locations.push(StoredLocation {
            uri: uri.to_string(),
            archived: None,
        });
        true
    }
}

#[derive(Debug, Default)]
struct State {
    metadata_types: BTreeMap<String, Arc<MetadataType>>,
    products: BTreeMap<String, Arc<Product>>,
    /// Insertion order.
    datasets: Vec<StoredDataset>,
    positions: HashMap<Uuid, usize>,
}

impl State {
    fn dataset_mut(&mut self, id: Uuid) -> Option<&mut StoredDataset> {
        let idx = *self.positions.get(&id)?;
        self.datasets.get_mut(idx)
    }

    fn dataset(&self, id: Uuid) -> Option<&StoredDataset> {
        let idx = *self.positions.get(&id)?;
        self.datasets.get(idx)
    }
}

/// Index held entirely in memory. Cheap to construct; used for tests and
/// for in-process catalogs.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    state: RwLock<State>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexDriver for MemoryIndex {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_metadata_type(&self, metadata_type: &MetadataType) -> Result<()> {
        let mut state = self.state.write().await;
        if state.metadata_types.contains_key(&metadata_type.name) {
            return Err(CatalogError::AlreadyExists(format!(
                "metadata type '{}'",
                metadata_type.name
            )));
        }
        state
            .metadata_types
            .insert(metadata_type.name.clone(), Arc::new(metadata_type.clone()));
        Ok(())
    }

    async fn update_metadata_type(&self, metadata_type: &MetadataType) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.metadata_types.contains_key(&metadata_type.name) {
            return Err(CatalogError::not_found(format!(
                "metadata type '{}'",
                metadata_type.name
            )));
        }
        let updated = Arc::new(metadata_type.clone());
        state
            .metadata_types
            .insert(metadata_type.name.clone(), updated.clone());

        // Rebind products to the new version.
        for product in state.products.values_mut() {
            if product.metadata_type.name == metadata_type.name {
                let mut rebound = (**product).clone();
                rebound.metadata_type = updated.clone();
                *product = Arc::new(rebound);
            }
        }
        Ok(())
    }

    async fn get_metadata_type(&self, name: &str) -> Result<Option<Arc<MetadataType>>> {
        Ok(self.state.read().await.metadata_types.get(name).cloned())
    }

    async fn list_metadata_types(&self) -> Result<Vec<Arc<MetadataType>>> {
        Ok(self.state.read().await.metadata_types.values().cloned().collect())
    }

    async fn insert_product(&self, product: &Product) -> Result<()> {
        let mut state = self.state.write().await;
        if state.products.contains_key(&product.name) {
            return Err(CatalogError::AlreadyExists(format!("product '{}'", product.name)));
        }
        state
            .products
            .insert(product.name.clone(), Arc::new(product.clone()));
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        let mut state = self.state.write().await;
        match state.products.get_mut(&product.name) {
            Some(existing) => {
                *existing = Arc::new(product.clone());
                Ok(())
            }
            None => Err(CatalogError::not_found(format!("product '{}'", product.name))),
        }
    }

    async fn delete_product(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .products
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CatalogError::not_found(format!("product '{}'", name)))
    }

    async fn get_product(&self, name: &str) -> Result<Option<Arc<Product>>> {
        Ok(self.state.read().await.products.get(name).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Arc<Product>>> {
        Ok(self.state.read().await.products.values().cloned().collect())
    }

    async fn count_product_datasets(&self, name: &str) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .datasets
            .iter()
            .filter(|d| d.record.product == name)
            .count() as u64)
    }

    async fn product_time_bounds(&self, name: &str) -> Result<Option<TimeRange>> {
        let state = self.state.read().await;
        let bounds = state
            .datasets
            .iter()
            .filter(|d| d.record.product == name && d.record.archived_time.is_none())
            .filter_map(|d| d.record.time)
            .reduce(|a, b| TimeRange::new(a.start.min(b.start), a.end.max(b.end)));
        Ok(bounds)
    }

    async fn insert_dataset(&self, record: &DatasetRecord, with_lineage: bool) -> Result<bool> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.dataset_mut(record.id) {
            for uri in record.uris.iter().rev() {
                existing.add_location(uri);
            }
            return Ok(false);
        }

        let mut stored = StoredDataset {
            record: DatasetRecord {
                uris: Vec::new(),
                indexed_time: Some(Utc::now()),
                archived_time: None,
                sources: if with_lineage {
                    record.sources.clone()
                } else {
                    Vec::new()
                },
                ..record.clone()
            },
            locations: Vec::new(),
        };
        for uri in record.uris.iter().rev() {
            stored.add_location(uri);
        }

        let idx = state.datasets.len();
        state.datasets.push(stored);
        state.positions.insert(record.id, idx);
        Ok(true)
    }

    async fn get_dataset(&self, id: Uuid) -> Result<Option<DatasetRecord>> {
        Ok(self.state.read().await.dataset(id).map(StoredDataset::to_record))
    }

    async fn datasets_exist(&self, ids: &[Uuid]) -> Result<Vec<bool>> {
        let state = self.state.read().await;
        Ok(ids.iter().map(|id| state.positions.contains_key(id)).collect())
    }

    async fn set_archived(&self, ids: &[Uuid], time: Option<DateTime<Utc>>) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut changed = 0;
        for id in ids {
            if let Some(stored) = state.dataset_mut(*id) {
                if stored.record.archived_time.is_some() != time.is_some() {
                    stored.record.archived_time = time;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn derived_ids(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.state.read().await;
        Ok(state
            .datasets
            .iter()
            .filter(|d| d.record.sources.iter().any(|s| s.source_id == id))
            .map(|d| d.record.id)
            .collect())
    }

    async fn candidates(&self, filter: &CandidateFilter) -> Result<Vec<DatasetRecord>> {
        let state = self.state.read().await;
        Ok(state
            .datasets
            .iter()
            .filter(|d| filter.accepts(&d.record))
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .map(StoredDataset::to_record)
            .collect())
    }

    async fn insert_location(&self, id: Uuid, uri: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let stored = state
            .dataset_mut(id)
            .ok_or_else(|| CatalogError::not_found(format!("dataset {}", id)))?;
        Ok(stored.add_location(uri))
    }

    async fn delete_location(&self, id: Uuid, uri: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let stored = state
            .dataset_mut(id)
            .ok_or_else(|| CatalogError::not_found(format!("dataset {}", id)))?;
        let before = stored.locations.len();
        stored.locations.retain(|l| l.uri != uri);
        Ok(stored.locations.len() != before)
    }

    async fn set_location_archived(
        &self,
        id: Uuid,
        uri: &str,
        time: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let stored = state
            .dataset_mut(id)
            .ok_or_else(|| CatalogError::not_found(format!("dataset {}", id)))?;
        match stored.locations.iter_mut().find(|l| l.uri == uri) {
            Some(location) if location.archived.is_some() != time.is_some() => {
                location.archived = time;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn locations(&self, id: Uuid, archived: bool) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .dataset(id)
            .map(|d| d.uris(archived))
            .unwrap_or_default())
    }
}
