use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::changes::UpdateReport;
use crate::error::{CatalogError, Result};
use crate::metadata_type::MetadataType;

use super::IndexDriver;

/// Metadata type registry.
#[derive(Clone)]
pub struct MetadataTypeResource {
    driver: Arc<dyn IndexDriver>,
}

impl MetadataTypeResource {
    pub(crate) fn new(driver: Arc<dyn IndexDriver>) -> Self {
        Self { driver }
    }

    /// Parse a definition document without storing it.
    pub fn from_doc(&self, doc: &Value) -> Result<MetadataType> {
        MetadataType::from_doc(doc)
    }

    pub async fn add(&self, metadata_type: &MetadataType) -> Result<Arc<MetadataType>> {
        metadata_type.validate()?;
        if self.driver.get_metadata_type(&metadata_type.name).await?.is_some() {
            return Err(CatalogError::AlreadyExists(format!(
                "metadata type '{}'",
                metadata_type.name
            )));
        }
        self.driver.insert_metadata_type(metadata_type).await?;
        info!(name = %metadata_type.name, "Added metadata type");
        self.get(&metadata_type.name).await
    }

    pub async fn add_document(&self, doc: &Value) -> Result<Arc<MetadataType>> {
        self.add(&MetadataType::from_doc(doc)?).await
    }

    /// Differences between the stored version and `metadata_type`.
    pub async fn check_update(&self, metadata_type: &MetadataType) -> Result<UpdateReport> {
        let existing = self.get(&metadata_type.name).await?;
        Ok(existing.check_update(metadata_type))
    }

    /// Replace a stored metadata type. Unsafe changes need `allow_unsafe`.
    pub async fn update(
        &self,
        metadata_type: &MetadataType,
        allow_unsafe: bool,
    ) -> Result<Arc<MetadataType>> {
        metadata_type.validate()?;
        let report = self.check_update(metadata_type).await?;
        if report.is_empty() {
            return self.get(&metadata_type.name).await;
        }
        if !report.is_safe() {
            if !allow_unsafe {
                return Err(CatalogError::conflict(format!(
                    "unsafe changes to metadata type '{}': {}",
                    metadata_type.name,
                    report.describe_unsafe()
                )));
            }
            warn!(
                name = %metadata_type.name,
                changes = %report.describe_unsafe(),
                "Applying unsafe metadata type update"
            );
        }
        self.driver.update_metadata_type(metadata_type).await?;
        info!(name = %metadata_type.name, changes = report.safe.len() + report.unsafe_changes.len(), "Updated metadata type");
        self.get(&metadata_type.name).await
    }

    pub async fn add_or_update(
        &self,
        metadata_type: &MetadataType,
        allow_unsafe: bool,
    ) -> Result<Arc<MetadataType>> {
        match self.get_by_name(&metadata_type.name).await? {
            Some(_) => self.update(metadata_type, allow_unsafe).await,
            None => self.add(metadata_type).await,
        }
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Arc<MetadataType>>> {
        self.driver.get_metadata_type(name).await
    }

    pub async fn get(&self, name: &str) -> Result<Arc<MetadataType>> {
        self.get_by_name(name)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("metadata type '{}'", name)))
    }

    pub async fn get_all(&self) -> Result<Vec<Arc<MetadataType>>> {
        self.driver.list_metadata_types().await
    }
}
