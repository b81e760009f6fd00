//! Dataset records: one independently described observation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use cube_common::{BoundingBox, Crs, Document, TimeRange};
use projection::Geometry;

use crate::error::Result;
use crate::metadata_type::{FieldValue, MetadataType};
use crate::product::Product;

/// Name of the search field holding a dataset's acquisition time.
pub const TIME_FIELD: &str = "time";

/// A provenance link from a derived dataset to one of its sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineageRef {
    pub classifier: String,
    pub source_id: Uuid,
}

/// Pixel grid of one or more bands, as declared in the dataset document.
#[derive(Debug, Clone, PartialEq)]
pub struct GridInfo {
    /// (height, width)
    pub shape: (usize, usize),
    /// Affine coefficients `a, b, c, d, e, f` mapping (col, row) to (x, y):
    /// `x = a*col + b*row + c`, `y = d*col + e*row + f`.
    pub transform: [f64; 6],
}

impl GridInfo {
    fn from_value(v: &Value) -> Option<Self> {
        let shape = v.get("shape")?.as_array()?;
        let height = shape.first()?.as_u64()? as usize;
        let width = shape.get(1)?.as_u64()? as usize;
        let coeffs: Vec<f64> = v
            .get("transform")?
            .as_array()?
            .iter()
            .filter_map(Value::as_f64)
            .collect();
        if coeffs.len() != 6 && coeffs.len() != 9 {
            return None;
        }
        let mut transform = [0.0; 6];
        transform.copy_from_slice(&coeffs[..6]);
        Some(Self {
            shape: (height, width),
            transform,
        })
    }

    fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.transform;
        (a * col + b * row + c, d * col + e * row + f)
    }

    /// Outline of the grid in its native CRS.
    pub fn footprint(&self) -> Vec<(f64, f64)> {
        let (h, w) = (self.shape.0 as f64, self.shape.1 as f64);
        vec![
            self.apply(0.0, 0.0),
            self.apply(w, 0.0),
            self.apply(w, h),
            self.apply(0.0, h),
        ]
    }
}

/// Where to read one band of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementInfo {
    /// Fully resolved URI of the file or object holding the band.
    pub uri: String,
    /// 1-based band index within a multi-band file.
    pub band: Option<usize>,
    /// Variable name within a multi-variable container.
    pub layer: Option<String>,
    pub grid: String,
}

/// Resolve a measurement path against the dataset's location.
pub fn resolve_uri(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    if path.contains("://") {
        return path.to_string();
    }
    if path.starts_with('/') {
        return format!("file://{}", path);
    }
    match base.rfind('/') {
        Some(idx) => format!("{}{}", &base[..=idx], path),
        None => path.to_string(),
    }
}

/// A dataset bound to its product.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: Uuid,
    pub product: Arc<Product>,
    pub metadata: Document,
    /// Active locations, most recently added first.
    pub uris: Vec<String>,
    pub indexed_time: Option<DateTime<Utc>>,
    pub archived_time: Option<DateTime<Utc>>,
    pub sources: Vec<LineageRef>,
}

impl Dataset {
    /// Build a dataset from a document, validating the structural fields.
    pub fn new(product: Arc<Product>, metadata: Document, uris: Vec<String>) -> Result<Self> {
        let metadata_type = product.metadata_type.clone();
        let id = metadata_type.dataset_id(&metadata)?;
        metadata_type.creation_time(&metadata)?;
        let sources = metadata_type.sources(&metadata)?;
        Ok(Self {
            id,
            product,
            metadata,
            uris,
            indexed_time: None,
            archived_time: None,
            sources,
        })
    }

    pub fn metadata_type(&self) -> &MetadataType {
        &self.product.metadata_type
    }

    /// Value of a search field, if defined and resolvable.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        self.metadata_type().field(name)?.extract(&self.metadata)
    }

    pub fn time_range(&self) -> Option<TimeRange> {
        self.field(TIME_FIELD)?.as_time_range()
    }

    /// Middle of the acquisition time range.
    pub fn center_time(&self) -> Option<DateTime<Utc>> {
        self.time_range().map(|r| r.center())
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.metadata_type().creation_time(&self.metadata).ok()
    }

    pub fn crs(&self) -> Option<Crs> {
        self.metadata_type().crs(&self.metadata)
    }

    pub fn label(&self) -> Option<String> {
        self.metadata_type().label(&self.metadata)
    }

    pub fn format(&self) -> Option<String> {
        self.metadata_type().format(&self.metadata)
    }

    pub fn is_archived(&self) -> bool {
        self.archived_time.is_some()
    }

    pub fn primary_uri(&self) -> Option<&str> {
        self.uris.first().map(String::as_str)
    }

    /// Named grids declared by the document.
    pub fn grids(&self) -> BTreeMap<String, GridInfo> {
        let Some(Value::Object(map)) = self.metadata_type().dataset.grids.resolve(&self.metadata)
        else {
            return BTreeMap::new();
        };
        map.iter()
            .filter_map(|(name, v)| GridInfo::from_value(v).map(|g| (name.clone(), g)))
            .collect()
    }

    /// Storage details of one band, looked up by measurement name or alias.
    pub fn measurement_info(&self, band: &str) -> Option<MeasurementInfo> {
        let Some(Value::Object(map)) = self
            .metadata_type()
            .dataset
            .measurements
            .resolve(&self.metadata)
        else {
            return None;
        };

        let entry = map.get(band).or_else(|| {
            let measurement = self.product.measurement(band)?;
            std::iter::once(&measurement.name)
                .chain(&measurement.aliases)
                .find_map(|n| map.get(n))
        })?;

        let path = entry.get("path").and_then(Value::as_str).unwrap_or("");
        let uri = match self.primary_uri() {
            Some(base) => resolve_uri(base, path),
            None if path.contains("://") => path.to_string(),
            None => return None,
        };

        Some(MeasurementInfo {
            uri,
            band: entry.get("band").and_then(Value::as_u64).map(|b| b as usize),
            layer: entry.get("layer").and_then(Value::as_str).map(str::to_string),
            grid: entry
                .get("grid")
                .and_then(Value::as_str)
                .unwrap_or("default")
                .to_string(),
        })
    }

    /// Valid-data extent in the dataset's native CRS: the declared geometry,
    /// or else the footprint of the default grid.
    pub fn extent(&self) -> Option<Geometry> {
        let crs = self.crs();
        if let Some(geojson) = self
            .metadata_type()
            .dataset
            .geometry
            .resolve(&self.metadata)
        {
            let crs = crs.unwrap_or_else(Crs::wgs84);
            if let Ok(geometry) = Geometry::from_geojson(geojson, crs) {
                return Some(geometry);
            }
        }

        let grid = self.grids().remove("default")?;
        Geometry::from_points(grid.footprint(), crs?).ok()
    }

    /// Extent in geographic coordinates, falling back to the first spatial
    /// search field.
    pub fn extent_lonlat(&self) -> Option<Geometry> {
        if let Some(extent) = self.extent() {
            if let Ok(lonlat) = extent.to_crs(&Crs::wgs84()) {
                return Some(lonlat);
            }
        }
        self.metadata_type()
            .search_fields()
            .filter_map(|f| f.extract(&self.metadata))
            .find_map(|v| match v {
                FieldValue::Spatial(geometry) => geometry.to_crs(&Crs::wgs84()).ok(),
                _ => None,
            })
    }

    pub fn bounds_lonlat(&self) -> Option<BoundingBox> {
        self.extent_lonlat()?.bounding_box()
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
