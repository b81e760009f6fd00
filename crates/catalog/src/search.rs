//! Search terms and their resolution against product search fields.
//!
//! A search runs in two phases. The index driver applies a cheap prefilter
//! (product, archived state, time and lon/lat bounding box columns); every
//! candidate is then checked exactly here, including a polygon
//! intersection in the query's CRS.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use cube_common::{parse_datetime, BoundingBox, Crs, TimeRange};
use projection::Geometry;

use crate::dataset::{Dataset, TIME_FIELD};
use crate::error::{QueryError, Result};
use crate::index::CandidateFilter;
use crate::metadata_type::{FieldType, FieldValue};
use crate::product::Product;

/// A scalar query value.
#[derive(Debug, Clone, PartialEq)]
pub enum TermValue {
    Text(String),
    Number(f64),
    Time(DateTime<Utc>),
}

impl From<&str> for TermValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for TermValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for TermValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for TermValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<i32> for TermValue {
    fn from(n: i32) -> Self {
        Self::Number(n as f64)
    }
}

impl From<DateTime<Utc>> for TermValue {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Time(t)
    }
}

/// Constraint on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// Equality against a scalar field; containment against a range field.
    Eq(TermValue),
    /// Inclusive overlap against a range field; containment of a scalar field.
    Range(TermValue, TermValue),
}

/// User-facing search request.
#[derive(Debug, Clone, Default)]
pub struct SearchTerms {
    pub product: Option<String>,
    pub fields: Vec<(String, Term)>,
    pub geopolygon: Option<Geometry>,
    pub include_archived: bool,
    pub order_by: Option<String>,
    pub limit: Option<usize>,
}

impl SearchTerms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn product(mut self, name: impl Into<String>) -> Self {
        self.product = Some(name.into());
        self
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<TermValue>) -> Self {
        self.fields.push((field.into(), Term::Eq(value.into())));
        self
    }

    pub fn range(
        mut self,
        field: impl Into<String>,
        lo: impl Into<TermValue>,
        hi: impl Into<TermValue>,
    ) -> Self {
        self.fields
            .push((field.into(), Term::Range(lo.into(), hi.into())));
        self
    }

    pub fn time(self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.range(TIME_FIELD, start, end)
    }

    pub fn time_range(self, range: TimeRange) -> Self {
        self.time(range.start, range.end)
    }

    pub fn lat(self, lo: f64, hi: f64) -> Self {
        self.range("lat", lo, hi)
    }

    pub fn lon(self, lo: f64, hi: f64) -> Self {
        self.range("lon", lo, hi)
    }

    pub fn geopolygon(mut self, geometry: Geometry) -> Self {
        self.geopolygon = Some(geometry);
        self
    }

    pub fn include_archived(mut self) -> Self {
        self.include_archived = true;
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

/// A term checked and coerced against its field's type.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub field_type: FieldType,
    pub term: Term,
}

fn overlaps<T: PartialOrd>(lo: T, hi: T, start: T, end: T) -> bool {
    lo <= end && hi >= start
}

impl Predicate {
    /// Evaluate against a dataset's extracted value.
    pub fn evaluate(&self, value: &FieldValue) -> bool {
        match value {
            FieldValue::Text(v) => matches!(&self.term, Term::Eq(TermValue::Text(s)) if s == v),
            FieldValue::Number(_) | FieldValue::NumberRange(..) => {
                let Some((lo, hi)) = value.as_number_range() else {
                    return false;
                };
                match &self.term {
                    Term::Eq(TermValue::Number(x)) => overlaps(lo, hi, *x, *x),
                    Term::Range(TermValue::Number(a), TermValue::Number(b)) => {
                        overlaps(lo, hi, *a, *b)
                    }
                    _ => false,
                }
            }
            FieldValue::Time(_) | FieldValue::TimeRange(_) => {
                let Some(range) = value.as_time_range() else {
                    return false;
                };
                match &self.term {
                    Term::Eq(TermValue::Time(t)) => overlaps(range.start, range.end, *t, *t),
                    Term::Range(TermValue::Time(a), TermValue::Time(b)) => {
                        overlaps(range.start, range.end, *a, *b)
                    }
                    _ => false,
                }
            }
            FieldValue::Spatial(_) => false,
        }
    }
}

fn coerce(field: &str, field_type: FieldType, value: &TermValue) -> Result<TermValue> {
    let invalid = |reason: String| QueryError::InvalidValue {
        field: field.to_string(),
        reason,
    };
    let coerced = match (field_type, value) {
        (FieldType::String, TermValue::Text(s)) => TermValue::Text(s.clone()),
        (FieldType::String, TermValue::Number(n)) => TermValue::Text(n.to_string()),
        (FieldType::String, TermValue::Time(t)) => TermValue::Text(t.to_rfc3339()),
        (FieldType::Numeric | FieldType::NumericRange, TermValue::Number(n)) => {
            TermValue::Number(*n)
        }
        (FieldType::Numeric | FieldType::NumericRange, TermValue::Text(s)) => TermValue::Number(
            s.trim()
                .parse()
                .map_err(|_| invalid(format!("'{}' is not a number", s)))?,
        ),
        (FieldType::Datetime | FieldType::DatetimeRange, TermValue::Time(t)) => TermValue::Time(*t),
        (FieldType::Datetime | FieldType::DatetimeRange, TermValue::Text(s)) => {
            TermValue::Time(parse_datetime(s).map_err(|e| invalid(e.to_string()))?)
        }
        (FieldType::Spatial, _) => {
            return Err(QueryError::UnsupportedPredicate {
                field: field.to_string(),
                reason: "spatial fields are queried with a geopolygon".to_string(),
            }
            .into())
        }
        (ft, v) => return Err(invalid(format!("{:?} cannot be compared with a {} field", v, ft)).into()),
    };
    Ok(coerced)
}

fn ordered(lo: TermValue, hi: TermValue) -> (TermValue, TermValue) {
    let swap = match (&lo, &hi) {
        (TermValue::Number(a), TermValue::Number(b)) => a > b,
        (TermValue::Time(a), TermValue::Time(b)) => a > b,
        _ => false,
    };
    if swap {
        (hi, lo)
    } else {
        (lo, hi)
    }
}

#[derive(Debug, Clone, PartialEq, PartialOrd)]
enum SortKey {
    Text(String),
    Number(f64),
    Time(DateTime<Utc>),
}

fn sort_key(value: &FieldValue) -> Option<SortKey> {
    match value {
        FieldValue::Text(s) => Some(SortKey::Text(s.clone())),
        FieldValue::Number(n) | FieldValue::NumberRange(n, _) => Some(SortKey::Number(*n)),
        FieldValue::Time(t) => Some(SortKey::Time(*t)),
        FieldValue::TimeRange(r) => Some(SortKey::Time(r.start)),
        FieldValue::Spatial(_) => None,
    }
}

/// A search resolved against the registered products.
#[derive(Debug, Clone)]
pub struct SearchPlan {
    pub products: Vec<Arc<Product>>,
    pub predicates: Vec<Predicate>,
    pub geopolygon: Option<Geometry>,
    geopolygon_bounds: Option<BoundingBox>,
    pub include_archived: bool,
    pub order_by: Option<String>,
    pub limit: Option<usize>,
}

impl SearchPlan {
    /// Resolve search terms.
    ///
    /// Every field must be defined by at least one candidate product; the
    /// candidates are narrowed to products defining all of them. Without an
    /// explicit product, a field whose type differs between candidates is
    /// rejected as ambiguous.
    pub fn new(terms: &SearchTerms, products: &[Arc<Product>]) -> Result<Self> {
        let mut candidates: Vec<Arc<Product>> = match &terms.product {
            Some(name) => products.iter().filter(|p| &p.name == name).cloned().collect(),
            None => products.to_vec(),
        };

        let mut queried: Vec<&str> = terms.fields.iter().map(|(f, _)| f.as_str()).collect();
        if let Some(order) = &terms.order_by {
            queried.push(order);
        }
        for field in &queried {
            if !candidates.is_empty()
                && !candidates.iter().any(|p| p.metadata_type.field(field).is_some())
            {
                return Err(QueryError::UnknownField(field.to_string()).into());
            }
        }
        candidates.retain(|p| queried.iter().all(|f| p.metadata_type.field(f).is_some()));

        let mut predicates = Vec::with_capacity(terms.fields.len());
        for (field, term) in &terms.fields {
            let types: BTreeSet<&'static str> = candidates
                .iter()
                .filter_map(|p| p.metadata_type.field(field))
                .map(|f| f.field_type.as_str())
                .collect();
            if types.len() > 1 && terms.product.is_none() {
                return Err(QueryError::AmbiguousField {
                    field: field.clone(),
                    types: types.iter().map(|t| t.to_string()).collect(),
                }
                .into());
            }
            let Some(field_type) = candidates
                .iter()
                .find_map(|p| p.metadata_type.field(field))
                .map(|f| f.field_type)
            else {
                continue;
            };

            let term = match term {
                Term::Eq(v) => Term::Eq(coerce(field, field_type, v)?),
                Term::Range(lo, hi) => {
                    if field_type == FieldType::String {
                        return Err(QueryError::UnsupportedPredicate {
                            field: field.clone(),
                            reason: "range queries need a numeric or datetime field".to_string(),
                        }
                        .into());
                    }
                    let (lo, hi) = ordered(
                        coerce(field, field_type, lo)?,
                        coerce(field, field_type, hi)?,
                    );
                    Term::Range(lo, hi)
                }
            };
            predicates.push(Predicate {
                field: field.clone(),
                field_type,
                term,
            });
        }

        let geopolygon_bounds = match &terms.geopolygon {
            Some(g) => g.to_crs(&Crs::wgs84())?.bounding_box(),
            None => None,
        };

        debug!(
            products = ?candidates.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            predicates = predicates.len(),
            spatial = terms.geopolygon.is_some(),
            "Planned dataset search"
        );

        Ok(Self {
            products: candidates,
            predicates,
            geopolygon: terms.geopolygon.clone(),
            geopolygon_bounds,
            include_archived: terms.include_archived,
            order_by: terms.order_by.clone(),
            limit: terms.limit,
        })
    }

    /// No candidate product: the search can only return nothing.
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn product(&self, name: &str) -> Option<&Arc<Product>> {
        self.products.iter().find(|p| p.name == name)
    }

    /// Index-level prefilter for this plan.
    pub fn prefilter(&self) -> CandidateFilter {
        let time = self.predicates.iter().find_map(|p| {
            if p.field != TIME_FIELD {
                return None;
            }
            match &p.term {
                Term::Range(TermValue::Time(a), TermValue::Time(b)) => Some(TimeRange::new(*a, *b)),
                Term::Eq(TermValue::Time(t)) => Some(TimeRange::instant(*t)),
                _ => None,
            }
        });

        CandidateFilter {
            products: self.products.iter().map(|p| p.name.clone()).collect(),
            include_archived: self.include_archived,
            time,
            bounds: self.geopolygon_bounds,
            offset: 0,
            limit: None,
        }
    }

    /// Exact check of one candidate.
    pub fn matches(&self, dataset: &Dataset) -> bool {
        if self.product(&dataset.product.name).is_none() {
            return false;
        }
        if dataset.is_archived() && !self.include_archived {
            return false;
        }
        for predicate in &self.predicates {
            match dataset.field(&predicate.field) {
                Some(value) if predicate.evaluate(&value) => {}
                _ => return false,
            }
        }

        if let Some(query) = &self.geopolygon {
            let Some(bounds) = dataset.bounds_lonlat() else {
                return false;
            };
            if let Some(query_bounds) = &self.geopolygon_bounds {
                if !bounds.intersects(query_bounds) {
                    return false;
                }
            }
            let Some(extent) = dataset.extent().or_else(|| dataset.extent_lonlat()) else {
                return false;
            };
            return match query.intersects(&extent) {
                Ok(hit) => hit,
                Err(e) => {
                    debug!(dataset = %dataset.id, error = %e, "Extent could not be reprojected");
                    false
                }
            };
        }
        true
    }

    /// Apply ordering and limit to the matched datasets.
    pub fn finish(&self, mut datasets: Vec<Dataset>) -> Vec<Dataset> {
        if let Some(field) = &self.order_by {
            datasets.sort_by(|a, b| {
                let ka = a.field(field).as_ref().and_then(sort_key);
                let kb = b.field(field).as_ref().and_then(sort_key);
                match (ka, kb) {
                    (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            });
        }
        if let Some(limit) = self.limit {
            datasets.truncate(limit);
        }
        datasets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_type::MetadataType;
    use serde_json::json;

    fn product(name: &str, platform_type: &str) -> Arc<Product> {
        let mt = Arc::new(
            MetadataType::from_doc(&json!({
                "name": format!("{}_type", name),
                "dataset": {
                    "id": ["id"],
                    "creation_dt": ["created"],
                    "search_fields": {
                        "platform": {"type": platform_type, "offset": ["platform"]},
                        "time": {"type": "datetime-range", "min_offset": [["start"]], "max_offset": [["end"]]},
                        "cloud_cover": {"type": "numeric", "offset": ["cloud"]}
                    }
                }
            }))
            .unwrap(),
        );
        Arc::new(
            Product::from_doc(&json!({"name": name, "metadata_type": mt.name}), |_| {
                Some(mt.clone())
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_unknown_field() {
        let products = vec![product("a", "string")];
        let err = SearchPlan::new(&SearchTerms::new().eq("orbit", 12), &products).unwrap_err();
        assert!(matches!(
            err,
            crate::CatalogError::Query(QueryError::UnknownField(_))
        ));
    }

    #[test]
    fn test_ambiguous_field_needs_product() {
        let products = vec![product("a", "string"), product("b", "numeric")];
        let terms = SearchTerms::new().eq("platform", "landsat-8");
        let err = SearchPlan::new(&terms, &products).unwrap_err();
        assert!(matches!(
            err,
            crate::CatalogError::Query(QueryError::AmbiguousField { .. })
        ));

        let plan = SearchPlan::new(&terms.product("a"), &products).unwrap();
        assert_eq!(plan.products.len(), 1);
    }

    #[test]
    fn test_range_on_string_rejected() {
        let products = vec![product("a", "string")];
        let err = SearchPlan::new(&SearchTerms::new().range("platform", "a", "b"), &products)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::CatalogError::Query(QueryError::UnsupportedPredicate { .. })
        ));
    }

    #[test]
    fn test_time_prefilter_and_coercion() {
        let products = vec![product("a", "string")];
        let terms = SearchTerms::new()
            .range("time", "2020-01-10", "2020-01-01")
            .eq("cloud_cover", "10");
        let plan = SearchPlan::new(&terms, &products).unwrap();
        let filter = plan.prefilter();
        let time = filter.time.unwrap();
        assert!(time.start < time.end);
        assert_eq!(plan.predicates[1].term, Term::Eq(TermValue::Number(10.0)));
    }

    #[test]
    fn test_predicate_overlap_is_inclusive() {
        let t = |s: &str| parse_datetime(s).unwrap();
        let predicate = Predicate {
            field: "time".into(),
            field_type: FieldType::DatetimeRange,
            term: Term::Range(
                TermValue::Time(t("2020-01-02T00:00:00Z")),
                TermValue::Time(t("2020-01-03T00:00:00Z")),
            ),
        };
        let touching = FieldValue::TimeRange(TimeRange::new(
            t("2020-01-01T00:00:00Z"),
            t("2020-01-02T00:00:00Z"),
        ));
        let before = FieldValue::TimeRange(TimeRange::new(
            t("2020-01-01T00:00:00Z"),
            t("2020-01-01T23:59:59Z"),
        ));
        assert!(predicate.evaluate(&touching));
        assert!(!predicate.evaluate(&before));
    }

    #[test]
    fn test_named_unknown_product_plans_empty() {
        let products = vec![product("a", "string")];
        let plan = SearchPlan::new(&SearchTerms::new().product("zzz").eq("platform", "x"), &products)
            .unwrap();
        assert!(plan.is_empty());
    }
}
