//! Products: named collections of datasets sharing a measurement schema.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cube_common::{document, Crs, Document};

use crate::changes::{diff, UpdateReport};
use crate::error::{CatalogError, Result};
use crate::measurement::{DType, Measurement};
use crate::metadata_type::{is_identifier, MetadataType};

/// A pair of x/y values (resolution, alignment, tile size).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct XY {
    pub x: f64,
    pub y: f64,
}

/// Default grid to load a product onto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadHints {
    pub crs: Crs,
    pub resolution: XY,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<XY>,
}

/// How the product is stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<Crs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<XY>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_size: Option<XY>,
}

/// A non-spatial, non-temporal dimension (e.g. wavelength).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraDimension {
    pub name: String,
    pub values: Vec<f64>,
    pub dtype: DType,
}

#[derive(Deserialize)]
struct Definition {
    name: String,
    #[serde(default)]
    description: Option<String>,
    metadata_type: String,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    measurements: Vec<Measurement>,
    #[serde(default)]
    load: Option<LoadHints>,
    #[serde(default)]
    storage: Option<StorageHints>,
    #[serde(default)]
    extra_dimensions: Vec<ExtraDimension>,
    #[serde(default)]
    fuse: Option<String>,
}

/// A product definition bound to its metadata type.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub name: String,
    pub description: Option<String>,
    pub metadata_type: Arc<MetadataType>,
    pub license: Option<String>,
    /// Template every member dataset document must contain.
    pub metadata: Document,
    pub measurements: Vec<Measurement>,
    pub load: Option<LoadHints>,
    pub storage: Option<StorageHints>,
    pub extra_dimensions: Vec<ExtraDimension>,
    /// Named fuse policy applied to every band.
    pub fuse: Option<String>,
    definition: Document,
}

impl Product {
    /// Parse and validate a definition, resolving its metadata type by name.
    pub fn from_doc<F>(doc: &Value, resolve_type: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<Arc<MetadataType>>,
    {
        let def: Definition = serde_json::from_value(doc.clone()).map_err(|e| {
            CatalogError::validation(format!("invalid product definition: {}", e))
        })?;

        let metadata_type = resolve_type(&def.metadata_type).ok_or_else(|| {
            CatalogError::validation(format!(
                "product '{}' references unknown metadata type '{}'",
                def.name, def.metadata_type
            ))
        })?;

        let product = Self {
            name: def.name,
            description: def.description,
            metadata_type,
            license: def.license,
            metadata: def.metadata.unwrap_or_else(|| Value::Object(Default::default())),
            measurements: def.measurements,
            load: def.load,
            storage: def.storage,
            extra_dimensions: def.extra_dimensions,
            fuse: def.fuse,
            definition: doc.clone(),
        };
        product.validate()?;
        Ok(product)
    }

    pub fn definition(&self) -> &Document {
        &self.definition
    }

    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.name) {
            return Err(CatalogError::validation(format!(
                "invalid product name '{}': only letters, digits and underscores are allowed",
                self.name
            )));
        }
        if !self.metadata.is_object() {
            return Err(CatalogError::validation(format!(
                "product '{}': metadata template must be a mapping",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for m in &self.measurements {
            for name in std::iter::once(&m.name).chain(&m.aliases) {
                if !names.insert(name.as_str()) {
                    return Err(CatalogError::validation(format!(
                        "product '{}': duplicate measurement name or alias '{}'",
                        self.name, name
                    )));
                }
            }
            if let Some(nodata) = m.nodata {
                if !m.dtype.can_represent(nodata) {
                    return Err(CatalogError::validation(format!(
                        "product '{}': nodata {} of '{}' is not representable as {:?}",
                        self.name, nodata, m.name, m.dtype
                    )));
                }
            }
            if let Some(dim) = &m.extra_dim {
                if !self.extra_dimensions.iter().any(|d| &d.name == dim) {
                    return Err(CatalogError::validation(format!(
                        "product '{}': measurement '{}' uses undeclared extra dimension '{}'",
                        self.name, m.name, dim
                    )));
                }
            }
        }

        if let Some(load) = &self.load {
            if load.resolution.x == 0.0 || load.resolution.y == 0.0 {
                return Err(CatalogError::validation(format!(
                    "product '{}': load resolution must be non-zero",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Whether a dataset document contains this product's metadata template.
    pub fn matches(&self, doc: &Value) -> bool {
        document::contains(doc, &self.metadata)
    }

    /// Find a measurement by name or alias.
    pub fn measurement(&self, name: &str) -> Option<&Measurement> {
        self.measurements.iter().find(|m| m.answers_to(name))
    }

    /// Resolve requested band names; an empty request selects every band.
    pub fn lookup_measurements(&self, names: &[String]) -> Result<Vec<Measurement>> {
        if names.is_empty() {
            return Ok(self.measurements.clone());
        }
        names
            .iter()
            .map(|n| {
                self.measurement(n).cloned().ok_or_else(|| {
                    CatalogError::not_found(format!(
                        "measurement '{}' in product '{}'",
                        n, self.name
                    ))
                })
            })
            .collect()
    }

    /// Compare with a proposed new version.
    ///
    /// Changes to the matching template, measurements, extra dimensions or
    /// metadata type alter existing datasets and are unsafe.
    pub fn check_update(&self, new: &Product) -> UpdateReport {
        let changes = diff(&self.definition, &new.definition);
        UpdateReport::classify(changes, |c| {
            !(c.under(&["metadata"])
                || c.under(&["measurements"])
                || c.under(&["metadata_type"])
                || c.under(&["extra_dimensions"])
                || c.under(&["name"]))
        })
    }
}

/// Classify a raw document against known products.
///
/// With an explicit product name, that product is used; it must still
/// match the document unless `ignore_mismatch` is set.
pub fn match_product(
    products: &[Arc<Product>],
    doc: &Value,
    explicit: Option<&str>,
    ignore_mismatch: bool,
) -> Result<Arc<Product>> {
    if let Some(name) = explicit {
        let product = products
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| CatalogError::not_found(format!("product '{}'", name)))?;
        if !ignore_mismatch && !product.matches(doc) {
            return Err(CatalogError::NoMatch(format!(
                "document does not match the metadata template of product '{}'",
                name
            )));
        }
        return Ok(product.clone());
    }

    let mut matched: Vec<&Arc<Product>> = products.iter().filter(|p| p.matches(doc)).collect();
    match matched.len() {
        0 => Err(CatalogError::NoMatch(
            "no product's metadata template is contained in the document".to_string(),
        )),
        1 => Ok(matched.remove(0).clone()),
        _ => Err(CatalogError::AmbiguousMatch {
            candidates: matched.iter().map(|p| p.name.clone()).collect(),
        }),
    }
}
