use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use cube_common::TimeRange;

use crate::changes::UpdateReport;
use crate::error::{CatalogError, Result};
use crate::product::{match_product, Product};

use super::IndexDriver;

/// Product registry.
#[derive(Clone)]
pub struct ProductResource {
    driver: Arc<dyn IndexDriver>,
}

impl ProductResource {
    pub(crate) fn new(driver: Arc<dyn IndexDriver>) -> Self {
        Self { driver }
    }

    /// Parse a definition document, resolving its metadata type from the index.
    pub async fn from_doc(&self, doc: &Value) -> Result<Product> {
        let types = self.driver.list_metadata_types().await?;
        Product::from_doc(doc, |name| types.iter().find(|t| t.name == name).cloned())
    }

    pub async fn add(&self, product: &Product) -> Result<Arc<Product>> {
        product.validate()?;
        if self.driver.get_product(&product.name).await?.is_some() {
            return Err(CatalogError::AlreadyExists(format!("product '{}'", product.name)));
        }
        if self
            .driver
            .get_metadata_type(&product.metadata_type.name)
            .await?
            .is_none()
        {
            return Err(CatalogError::validation(format!(
                "product '{}' references metadata type '{}' which is not in the index",
                product.name, product.metadata_type.name
            )));
        }
        self.driver.insert_product(product).await?;
        info!(
            name = %product.name,
            metadata_type = %product.metadata_type.name,
            measurements = product.measurements.len(),
            "Added product"
        );
        self.get(&product.name).await
    }

    pub async fn add_document(&self, doc: &Value) -> Result<Arc<Product>> {
        let product = self.from_doc(doc).await?;
        self.add(&product).await
    }

    pub async fn check_update(&self, product: &Product) -> Result<UpdateReport> {
        let existing = self.get(&product.name).await?;
        Ok(existing.check_update(product))
    }

    /// Replace a stored product. Unsafe changes need `allow_unsafe`.
    pub async fn update(&self, product: &Product, allow_unsafe: bool) -> Result<Arc<Product>> {
        product.validate()?;
        let report = self.check_update(product).await?;
        if report.is_empty() {
            return self.get(&product.name).await;
        }
        if !report.is_safe() {
            if !allow_unsafe {
                return Err(CatalogError::conflict(format!(
                    "unsafe changes to product '{}': {}",
                    product.name,
                    report.describe_unsafe()
                )));
            }
            warn!(name = %product.name, changes = %report.describe_unsafe(), "Applying unsafe product update");
        }
        self.driver.update_product(product).await?;
        info!(name = %product.name, "Updated product");
        self.get(&product.name).await
    }

    pub async fn add_or_update(&self, product: &Product, allow_unsafe: bool) -> Result<Arc<Product>> {
        match self.get_by_name(&product.name).await? {
            Some(_) => self.update(product, allow_unsafe).await,
            None => self.add(product).await,
        }
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Arc<Product>>> {
        self.driver.get_product(name).await
    }

    pub async fn get(&self, name: &str) -> Result<Arc<Product>> {
        self.get_by_name(name)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("product '{}'", name)))
    }

    pub async fn get_all(&self) -> Result<Vec<Arc<Product>>> {
        self.driver.list_products().await
    }

    /// Remove a product. Refused while any dataset, archived or not, belongs to it.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.get(name).await?;
        let count = self.driver.count_product_datasets(name).await?;
        if count > 0 {
            return Err(CatalogError::conflict(format!(
                "product '{}' still has {} datasets",
                name, count
            )));
        }
        self.driver.delete_product(name).await?;
        info!(name = %name, "Deleted product");
        Ok(())
    }

    /// Span of acquisition times over the product's active datasets.
    pub async fn time_bounds(&self, name: &str) -> Result<Option<TimeRange>> {
        self.driver.product_time_bounds(name).await
    }

    /// Classify a raw document against all registered products.
    pub async fn match_document(
        &self,
        doc: &Value,
        explicit: Option<&str>,
        ignore_mismatch: bool,
    ) -> Result<Arc<Product>> {
        let products = self.get_all().await?;
        match_product(&products, doc, explicit, ignore_mismatch)
    }
}
