//! Metadata types: declarative mappings from nested dataset documents to
//! typed search fields.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use cube_common::{parse_datetime, BoundingBox, Crs, DocPath, Document, TimeRange};
use projection::Geometry;

use crate::changes::{diff, UpdateReport};
use crate::dataset::LineageRef;
use crate::error::{CatalogError, Result};

/// One or more alternative paths into a document. The first one that
/// resolves wins.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawOffsets", into = "RawOffsets")]
pub struct Offsets(pub Vec<DocPath>);

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawOffsets {
    Single(Vec<String>),
    Alternatives(Vec<Vec<String>>),
}

impl From<RawOffsets> for Offsets {
    fn from(raw: RawOffsets) -> Self {
        match raw {
            RawOffsets::Single(keys) if keys.is_empty() => Offsets(Vec::new()),
            RawOffsets::Single(keys) => Offsets(vec![DocPath(keys)]),
            RawOffsets::Alternatives(paths) => Offsets(paths.into_iter().map(DocPath).collect()),
        }
    }
}

impl From<Offsets> for RawOffsets {
    fn from(offsets: Offsets) -> Self {
        let mut paths: Vec<Vec<String>> = offsets.0.into_iter().map(|p| p.0).collect();
        if paths.len() == 1 {
            RawOffsets::Single(paths.remove(0))
        } else {
            RawOffsets::Alternatives(paths)
        }
    }
}

impl Offsets {
    pub fn single(path: DocPath) -> Self {
        Self(vec![path])
    }

    pub fn paths(&self) -> &[DocPath] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value at the first path that exists.
    pub fn resolve<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.0.iter().find_map(|p| p.get(doc))
    }

    /// First path whose value exists and converts.
    fn first<T>(&self, doc: &Value, convert: impl Fn(&Value) -> Option<T>) -> Option<T> {
        self.0.iter().find_map(|p| p.get(doc).and_then(&convert))
    }
}

/// Type of a search field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    #[default]
    String,
    #[serde(alias = "double", alias = "integer", alias = "float")]
    Numeric,
    #[serde(alias = "double-range", alias = "integer-range", alias = "float-range")]
    NumericRange,
    Datetime,
    DatetimeRange,
    Spatial,
}

impl FieldType {
    pub fn is_range(&self) -> bool {
        matches!(self, Self::NumericRange | Self::DatetimeRange)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Numeric => "numeric",
            Self::NumericRange => "numeric-range",
            Self::Datetime => "datetime",
            Self::DatetimeRange => "datetime-range",
            Self::Spatial => "spatial",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A value extracted from a document for one search field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Time(DateTime<Utc>),
    /// Always ordered, `lo <= hi`.
    NumberRange(f64, f64),
    TimeRange(TimeRange),
    Spatial(Geometry),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Text(_) => FieldType::String,
            Self::Number(_) => FieldType::Numeric,
            Self::Time(_) => FieldType::Datetime,
            Self::NumberRange(..) => FieldType::NumericRange,
            Self::TimeRange(_) => FieldType::DatetimeRange,
            Self::Spatial(_) => FieldType::Spatial,
        }
    }

    /// Time span of a datetime or datetime-range value.
    pub fn as_time_range(&self) -> Option<TimeRange> {
        match self {
            Self::Time(t) => Some(TimeRange::instant(*t)),
            Self::TimeRange(r) => Some(*r),
            _ => None,
        }
    }

    /// Numeric span of a numeric or numeric-range value.
    pub fn as_number_range(&self) -> Option<(f64, f64)> {
        match self {
            Self::Number(n) => Some((*n, *n)),
            Self::NumberRange(lo, hi) => Some((*lo, *hi)),
            _ => None,
        }
    }
}

/// Definition of one search field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchField {
    #[serde(skip)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "type", default)]
    pub field_type: FieldType,

    #[serde(default, alias = "offsets", skip_serializing_if = "Offsets::is_empty")]
    pub offset: Offsets,

    #[serde(default, skip_serializing_if = "Offsets::is_empty")]
    pub min_offset: Offsets,

    #[serde(default, skip_serializing_if = "Offsets::is_empty")]
    pub max_offset: Offsets,

    /// (x, y) path pairs for spatial fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coordinates: Vec<(DocPath, DocPath)>,

    /// CRS of spatial coordinates. Defaults to WGS84.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<Crs>,
}

impl SearchField {
    /// Extract this field's value from a document.
    ///
    /// Returns `None` when the value cannot be resolved; for ranges, when
    /// either end is missing.
    pub fn extract(&self, doc: &Value) -> Option<FieldValue> {
        match self.field_type {
            FieldType::String => self.offset.first(doc, as_text).map(FieldValue::Text),
            FieldType::Numeric => self.offset.first(doc, as_number).map(FieldValue::Number),
            FieldType::Datetime => self.offset.first(doc, as_time).map(FieldValue::Time),
            FieldType::NumericRange => {
                let lo = self.min_offset.first(doc, as_number)?;
                let hi = self.max_offset.first(doc, as_number)?;
                Some(FieldValue::NumberRange(lo.min(hi), lo.max(hi)))
            }
            FieldType::DatetimeRange => {
                let lo = self.min_offset.first(doc, as_time)?;
                let hi = self.max_offset.first(doc, as_time)?;
                Some(FieldValue::TimeRange(TimeRange::new(lo, hi)))
            }
            FieldType::Spatial => {
                let points = self.coordinates.iter().filter_map(|(xp, yp)| {
                    let x = xp.get(doc).and_then(as_number)?;
                    let y = yp.get(doc).and_then(as_number)?;
                    Some((x, y))
                });
                let bbox = BoundingBox::from_points(points)?;
                let crs = self.crs.unwrap_or_else(Crs::wgs84);
                Some(FieldValue::Spatial(Geometry::from_bbox(&bbox, crs)))
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !is_identifier(&self.name) {
            return Err(CatalogError::validation(format!(
                "invalid search field name '{}'",
                self.name
            )));
        }
        let ok = match self.field_type {
            FieldType::NumericRange | FieldType::DatetimeRange => {
                !self.min_offset.is_empty() && !self.max_offset.is_empty()
            }
            FieldType::Spatial => !self.coordinates.is_empty(),
            _ => !self.offset.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(CatalogError::validation(format!(
                "search field '{}' of type {} is missing its offsets",
                self.name, self.field_type
            )))
        }
    }
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_time(v: &Value) -> Option<DateTime<Utc>> {
    v.as_str().and_then(|s| parse_datetime(s).ok())
}

/// Offsets of the structural (non-search) dataset fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSection {
    pub id: Offsets,
    pub creation_dt: Offsets,
    #[serde(default, skip_serializing_if = "Offsets::is_empty")]
    pub label: Offsets,
    #[serde(default, skip_serializing_if = "Offsets::is_empty")]
    pub sources: Offsets,
    #[serde(default, skip_serializing_if = "Offsets::is_empty")]
    pub format: Offsets,
    #[serde(default, skip_serializing_if = "Offsets::is_empty")]
    pub crs: Offsets,
    #[serde(default, skip_serializing_if = "Offsets::is_empty")]
    pub grids: Offsets,
    #[serde(default, skip_serializing_if = "Offsets::is_empty")]
    pub geometry: Offsets,
    #[serde(default, skip_serializing_if = "Offsets::is_empty")]
    pub grid_spatial: Offsets,
    #[serde(default, skip_serializing_if = "Offsets::is_empty")]
    pub measurements: Offsets,
    #[serde(default)]
    pub search_fields: BTreeMap<String, SearchField>,
}

#[derive(Deserialize)]
struct Definition {
    name: String,
    #[serde(default)]
    description: Option<String>,
    dataset: DatasetSection,
}

/// A named schema describing how to read a family of dataset documents.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataType {
    pub name: String,
    pub description: Option<String>,
    pub dataset: DatasetSection,
    definition: Document,
}

impl MetadataType {
    /// Parse and validate a definition document.
    pub fn from_doc(doc: &Value) -> Result<Self> {
        let def: Definition = serde_json::from_value(doc.clone()).map_err(|e| {
            CatalogError::validation(format!("invalid metadata type definition: {}", e))
        })?;

        let mut dataset = def.dataset;
        for (name, field) in dataset.search_fields.iter_mut() {
            field.name = name.clone();
        }

        let metadata_type = Self {
            name: def.name,
            description: def.description,
            dataset,
            definition: doc.clone(),
        };
        metadata_type.validate()?;
        Ok(metadata_type)
    }

    /// The document this type was built from.
    pub fn definition(&self) -> &Document {
        &self.definition
    }

    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.name) {
            return Err(CatalogError::validation(format!(
                "invalid metadata type name '{}'",
                self.name
            )));
        }
        if self.dataset.id.is_empty() || self.dataset.creation_dt.is_empty() {
            return Err(CatalogError::validation(format!(
                "metadata type '{}' must declare id and creation_dt offsets",
                self.name
            )));
        }
        for field in self.dataset.search_fields.values() {
            field.validate()?;
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&SearchField> {
        self.dataset.search_fields.get(name)
    }

    pub fn search_fields(&self) -> impl Iterator<Item = &SearchField> {
        self.dataset.search_fields.values()
    }

    /// Extract every search field that resolves.
    pub fn extract_all(&self, doc: &Value) -> BTreeMap<String, FieldValue> {
        self.search_fields()
            .filter_map(|f| f.extract(doc).map(|v| (f.name.clone(), v)))
            .collect()
    }

    /// Dataset id. Required.
    pub fn dataset_id(&self, doc: &Value) -> Result<Uuid> {
        let raw = self
            .dataset
            .id
            .resolve(doc)
            .and_then(Value::as_str)
            .ok_or_else(|| CatalogError::validation("dataset document has no id"))?;
        Uuid::parse_str(raw)
            .map_err(|e| CatalogError::validation(format!("invalid dataset id '{}': {}", raw, e)))
    }

    /// Dataset creation time. Required.
    pub fn creation_time(&self, doc: &Value) -> Result<DateTime<Utc>> {
        let raw = self
            .dataset
            .creation_dt
            .resolve(doc)
            .and_then(Value::as_str)
            .ok_or_else(|| CatalogError::validation("dataset document has no creation time"))?;
        parse_datetime(raw).map_err(|e| CatalogError::validation(e.to_string()))
    }

    pub fn label(&self, doc: &Value) -> Option<String> {
        self.dataset.label.first(doc, as_text)
    }

    pub fn format(&self, doc: &Value) -> Option<String> {
        self.dataset.format.first(doc, as_text)
    }

    pub fn crs(&self, doc: &Value) -> Option<Crs> {
        self.dataset
            .crs
            .first(doc, |v| v.as_str().and_then(|s| Crs::parse(s).ok()))
    }

    /// Lineage references: a map of classifier to one or more source ids.
    ///
    /// Sources may be given as id strings or as embedded documents with an
    /// `id` key.
    pub fn sources(&self, doc: &Value) -> Result<Vec<LineageRef>> {
        let Some(Value::Object(map)) = self.dataset.sources.resolve(doc) else {
            return Ok(Vec::new());
        };

        let mut refs = Vec::new();
        for (classifier, value) in map {
            let items: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for item in items {
                let raw = match item {
                    Value::String(s) => s.as_str(),
                    Value::Object(embedded) => embedded
                        .get("id")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            CatalogError::validation(format!(
                                "embedded source '{}' has no id",
                                classifier
                            ))
                        })?,
                    other => {
                        return Err(CatalogError::validation(format!(
                            "unreadable source reference {}",
                            other
                        )))
                    }
                };
                let source_id = Uuid::parse_str(raw).map_err(|e| {
                    CatalogError::validation(format!("invalid source id '{}': {}", raw, e))
                })?;
                refs.push(LineageRef {
                    classifier: classifier.clone(),
                    source_id,
                });
            }
        }
        Ok(refs)
    }

    /// Compare with a proposed new version of this type.
    ///
    /// Adding search fields and editing descriptions is safe. Anything that
    /// changes how existing documents are read is not.
    pub fn check_update(&self, new: &MetadataType) -> UpdateReport {
        let changes = diff(&self.definition, &new.definition);
        UpdateReport::classify(changes, |change| {
            if change.under(&["description"]) {
                return true;
            }
            let keys = change.path.keys();
            if change.under(&["dataset", "search_fields"]) {
                return (keys.len() == 3 && change.is_addition())
                    || (keys.len() == 4 && keys[3] == "description");
            }
            false
        })
    }
}

/// `^\w+$`
pub(crate) fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}
