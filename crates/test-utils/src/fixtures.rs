//! Definition fixtures and a dataset document builder.
//!
//! The definitions mirror what a real deployment indexes: an `eo3`
//! metadata type and a couple of Landsat-like products.

use std::sync::Arc;

use catalog::{Dataset, Index, MetadataType, Product};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// The `eo3` metadata type.
pub const EO3_METADATA_TYPE: &str = r#"
name: eo3
description: Default EO3 with no custom fields
dataset:
  id: [id]
  sources: [lineage, source_datasets]
  creation_dt: [properties, 'odc:processing_datetime']
  label: [label]
  format: [properties, 'odc:file_format']
  crs: [crs]
  grids: [grids]
  geometry: [geometry]
  measurements: [measurements]
  search_fields:
    platform:
      description: Platform code
      offset: [properties, 'eo:platform']
    instrument:
      description: Instrument name
      offset: [properties, 'eo:instrument']
    region_code:
      description: Spatial reference code from the provider
      offset: [properties, 'odc:region_code']
    cloud_cover:
      description: Cloud cover percentage
      type: double
      offset: [properties, 'eo:cloud_cover']
    time:
      description: Acquisition time range
      type: datetime-range
      min_offset:
        - [properties, 'dtr:start_datetime']
        - [properties, datetime]
      max_offset:
        - [properties, 'dtr:end_datetime']
        - [properties, datetime]
    lat:
      description: Latitude range
      type: double-range
      min_offset:
        - [extent, lat, begin]
      max_offset:
        - [extent, lat, end]
    lon:
      description: Longitude range
      type: double-range
      min_offset:
        - [extent, lon, begin]
      max_offset:
        - [extent, lon, end]
"#;

/// A metadata type whose `cloud_cover` is a string, for ambiguity tests.
pub const TELEMETRY_METADATA_TYPE: &str = r#"
name: telemetry
dataset:
  id: [id]
  creation_dt: [created]
  search_fields:
    cloud_cover:
      offset: [properties, cloud_cover_class]
    time:
      type: datetime
      offset: [properties, datetime]
"#;

/// Surface reflectance product with a bit-flag quality band.
pub const LS8_PRODUCT: &str = r#"
name: ls8_ard
description: Landsat 8 analysis ready data
metadata_type: eo3
license: CC-BY-4.0
metadata:
  product:
    name: ls8_ard
load:
  crs: 'EPSG:4326'
  resolution: {x: 0.1, y: -0.1}
measurements:
  - name: red
    dtype: int16
    nodata: -999
    units: '1'
    aliases: [band04, nbart_red]
  - name: nir
    dtype: int16
    nodata: -999
    units: '1'
    aliases: [band05]
  - name: fmask
    dtype: uint8
    nodata: 0
    units: '1'
    flags_definition:
      fmask:
        bits: [0, 1, 2, 3, 4, 5, 6, 7]
        description: Fmask classification
        values:
          '0': nodata
          '1': valid
          '2': cloud
          '3': shadow
          '4': snow
          '5': water
      cloud:
        bits: [1]
        values:
          '0': false
          '1': true
"#;

/// A second product sharing the `eo3` type.
pub const S2_PRODUCT: &str = r#"
name: s2_ard
description: Sentinel-2 analysis ready data
metadata_type: eo3
metadata:
  product:
    name: s2_ard
measurements:
  - name: red
    dtype: uint16
    nodata: 0
    aliases: [band04]
"#;

/// Parse a YAML fixture into a JSON document.
pub fn yaml_doc(yaml: &str) -> anyhow::Result<Value> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Minimal product definition on the `eo3` type.
///
/// Each measurement is `(name, dtype, nodata)`.
pub fn product_doc(name: &str, measurements: &[(&str, &str, f64)]) -> Value {
    let measurements: Vec<Value> = measurements
        .iter()
        .map(|(band, dtype, nodata)| json!({"name": band, "dtype": dtype, "nodata": nodata}))
        .collect();
    json!({
        "name": name,
        "metadata_type": "eo3",
        "metadata": {"product": {"name": name}},
        "measurements": measurements,
    })
}

/// An in-memory index holding the `eo3` type and the given products.
pub async fn seeded_index(products: &[Value]) -> anyhow::Result<Index> {
    let index = Index::in_memory();
    index
        .metadata_types()
        .add_document(&yaml_doc(EO3_METADATA_TYPE)?)
        .await?;
    for doc in products {
        index.products().add_document(doc).await?;
    }
    Ok(index)
}

/// An in-memory index holding `eo3`, [`LS8_PRODUCT`] and [`S2_PRODUCT`].
pub async fn landsat_index() -> anyhow::Result<Index> {
    seeded_index(&[yaml_doc(LS8_PRODUCT)?, yaml_doc(S2_PRODUCT)?]).await
}

/// Parse a product definition bound to a fresh `eo3` type, without an index.
pub fn eo3_product(doc: &Value) -> anyhow::Result<Arc<Product>> {
    let eo3 = Arc::new(MetadataType::from_doc(&yaml_doc(EO3_METADATA_TYPE)?)?);
    Ok(Arc::new(Product::from_doc(doc, |_| Some(eo3.clone()))?))
}

/// Bind a built document to `product`, located at `uri`.
pub fn make_dataset(
    product: &Arc<Product>,
    builder: &DatasetDocBuilder,
    uri: &str,
) -> anyhow::Result<Dataset> {
    Ok(Dataset::new(product.clone(), builder.build(), vec![uri.to_string()])?)
}

/// Builder for `eo3` dataset documents.
#[derive(Debug, Clone)]
pub struct DatasetDocBuilder {
    id: Uuid,
    product: String,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    created: DateTime<Utc>,
    crs: String,
    shape: (usize, usize),
    transform: [f64; 6],
    measurements: Vec<(String, Value)>,
    properties: Map<String, Value>,
    geometry: Option<Value>,
    sources: Vec<(String, Uuid)>,
}

impl DatasetDocBuilder {
    /// A 10x10 one-degree-per-ten-pixels dataset at 2020-01-01 over (0..1, -1..0).
    pub fn new(product: &str) -> Self {
        let start: DateTime<Utc> = "2020-01-01T00:00:00Z"
            .parse()
            .unwrap_or_else(|_| Utc::now());
        Self {
            id: Uuid::new_v4(),
            product: product.to_string(),
            start,
            end: None,
            created: start + Duration::days(1),
            crs: "EPSG:4326".to_string(),
            shape: (10, 10),
            transform: [0.1, 0.0, 0.0, 0.0, -0.1, 0.0],
            measurements: Vec::new(),
            properties: Map::new(),
            geometry: None,
            sources: Vec::new(),
        }
    }

    pub fn id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Single acquisition instant, RFC 3339.
    ///
    /// # Panics
    ///
    /// On an unparseable timestamp.
    pub fn time(mut self, datetime: &str) -> Self {
        self.start = datetime.parse().expect("valid RFC 3339 timestamp");
        self.end = None;
        self
    }

    pub fn time_span(mut self, start: &str, end: &str) -> Self {
        self.start = start.parse().expect("valid RFC 3339 timestamp");
        self.end = Some(end.parse().expect("valid RFC 3339 timestamp"));
        self
    }

    pub fn crs(mut self, crs: &str) -> Self {
        self.crs = crs.to_string();
        self
    }

    /// Default grid as `(height, width)` and affine `a, b, c, d, e, f`.
    pub fn grid(mut self, shape: (usize, usize), transform: [f64; 6]) -> Self {
        self.shape = shape;
        self.transform = transform;
        self
    }

    /// North-up EPSG:4326 grid with its top-left corner at `(lon, lat)`.
    pub fn lonlat_grid(self, lon: f64, lat: f64, resolution: f64, shape: (usize, usize)) -> Self {
        self.crs("EPSG:4326")
            .grid(shape, [resolution, 0.0, lon, 0.0, -resolution, lat])
    }

    /// Band stored at `path`, relative to the dataset location or absolute.
    pub fn measurement(mut self, name: &str, path: &str) -> Self {
        self.measurements
            .push((name.to_string(), json!({"path": path})));
        self
    }

    /// Band stored as a numbered layer of a multi-band file.
    pub fn measurement_band(mut self, name: &str, path: &str, band: usize) -> Self {
        self.measurements
            .push((name.to_string(), json!({"path": path, "band": band})));
        self
    }

    pub fn property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn platform(self, platform: &str) -> Self {
        self.property("eo:platform", platform)
    }

    pub fn cloud_cover(self, percent: f64) -> Self {
        self.property("eo:cloud_cover", percent)
    }

    /// GeoJSON geometry in the dataset CRS.
    pub fn geometry(mut self, geometry: Value) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn source(mut self, classifier: &str, id: Uuid) -> Self {
        self.sources.push((classifier.to_string(), id));
        self
    }

    pub fn dataset_id(&self) -> Uuid {
        self.id
    }

    pub fn build(&self) -> Value {
        let mut properties = Map::new();
        match self.end {
            Some(end) => {
                properties.insert("dtr:start_datetime".into(), json!(self.start.to_rfc3339()));
                properties.insert("dtr:end_datetime".into(), json!(end.to_rfc3339()));
                let mid = self.start + (end - self.start) / 2;
                properties.insert("datetime".into(), json!(mid.to_rfc3339()));
            }
            None => {
                properties.insert("datetime".into(), json!(self.start.to_rfc3339()));
            }
        }
        properties.insert(
            "odc:processing_datetime".into(),
            json!(self.created.to_rfc3339()),
        );
        properties.insert("odc:file_format".into(), json!("GeoTIFF"));
        for (k, v) in &self.properties {
            properties.insert(k.clone(), v.clone());
        }

        let [a, b, c, d, e, f] = self.transform;
        let mut doc = json!({
            "$schema": "https://schemas.opendatacube.org/dataset",
            "id": self.id.to_string(),
            "label": format!("{}_{}", self.product, self.start.format("%Y%m%d")),
            "product": {"name": self.product},
            "crs": self.crs,
            "grids": {
                "default": {
                    "shape": [self.shape.0, self.shape.1],
                    "transform": [a, b, c, d, e, f, 0.0, 0.0, 1.0]
                }
            },
            "properties": properties,
            "measurements": self.measurements.iter().cloned().collect::<Map<String, Value>>(),
        });

        if let Some(geometry) = &self.geometry {
            doc["geometry"] = geometry.clone();
        }
        if !self.sources.is_empty() {
            let sources: Map<String, Value> = self
                .sources
                .iter()
                .map(|(classifier, id)| (classifier.clone(), json!(id.to_string())))
                .collect();
            doc["lineage"] = json!({"source_datasets": sources});
        }
        doc
    }
}
