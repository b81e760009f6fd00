//! Grouping datasets into the slices of a data cube.
//!
//! A [`GroupBy`] maps each dataset to a [`GroupKey`]; datasets sharing a
//! key become one [`Group`] and are fused into one plane per band. Groups
//! come out in ascending key order. Within a group datasets are ordered by
//! the grouper's sort key and then by id, which fixes the fuse order.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use catalog::{Dataset, FieldValue};
use cube_common::solar_day;

/// Key identifying one group.
#[derive(Debug, Clone)]
pub enum GroupKey {
    Time(DateTime<Utc>),
    Date(NaiveDate),
    Text(String),
    Number(f64),
}

impl GroupKey {
    fn rank(&self) -> u8 {
        match self {
            Self::Time(_) => 0,
            Self::Date(_) => 1,
            Self::Text(_) => 2,
            Self::Number(_) => 3,
        }
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupKey {}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Date(d) => write!(f, "{}", d),
            Self::Text(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

type KeyFn = Arc<dyn Fn(&Dataset) -> Option<GroupKey> + Send + Sync>;

/// How to bucket datasets.
#[derive(Clone)]
pub struct GroupBy {
    /// Name of the output dimension, e.g. `time`.
    pub dimension: String,
    key_fn: KeyFn,
    sort_key: KeyFn,
}

impl fmt::Debug for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupBy")
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl Default for GroupBy {
    fn default() -> Self {
        Self::solar_day()
    }
}

fn center_time(dataset: &Dataset) -> Option<GroupKey> {
    dataset.center_time().map(GroupKey::Time)
}

impl GroupBy {
    /// Group with an arbitrary key function. Datasets for which it returns
    /// `None` are left out.
    pub fn custom<F>(dimension: &str, key_fn: F) -> Self
    where
        F: Fn(&Dataset) -> Option<GroupKey> + Send + Sync + 'static,
    {
        Self {
            dimension: dimension.to_string(),
            key_fn: Arc::new(key_fn),
            sort_key: Arc::new(center_time),
        }
    }

    /// One group per distinct acquisition centre time.
    pub fn time() -> Self {
        Self::custom("time", center_time)
    }

    /// One group per local solar day.
    ///
    /// The centre time is shifted by the longitude of the dataset's extent
    /// centre before taking the date, so a single overpass is not split
    /// across two UTC dates. Datasets without a usable extent use UTC.
    pub fn solar_day() -> Self {
        Self::custom("time", |dataset: &Dataset| {
            let time = dataset.center_time()?;
            let longitude = dataset
                .extent()
                .and_then(|extent| extent.center_lonlat().ok())
                .map(|(lon, _)| lon)
                .unwrap_or(0.0);
            Some(GroupKey::Date(solar_day(time, longitude)))
        })
    }

    /// Group on any scalar search field. Range fields use their lower bound;
    /// time ranges use their centre.
    pub fn field(name: &str) -> Self {
        let field = name.to_string();
        Self::custom(name, move |dataset: &Dataset| {
            match dataset.field(&field)? {
                FieldValue::Text(s) => Some(GroupKey::Text(s)),
                FieldValue::Number(n) => Some(GroupKey::Number(n)),
                FieldValue::Time(t) => Some(GroupKey::Time(t)),
                FieldValue::NumberRange(lo, _) => Some(GroupKey::Number(lo)),
                FieldValue::TimeRange(r) => Some(GroupKey::Time(r.center())),
                FieldValue::Spatial(_) => None,
            }
        })
    }

    /// Replace the within-group ordering. Ties still fall back to dataset id.
    pub fn with_sort_key<F>(mut self, sort_key: F) -> Self
    where
        F: Fn(&Dataset) -> Option<GroupKey> + Send + Sync + 'static,
    {
        self.sort_key = Arc::new(sort_key);
        self
    }

    pub fn key(&self, dataset: &Dataset) -> Option<GroupKey> {
        (self.key_fn)(dataset)
    }

    fn order(&self, a: &Dataset, b: &Dataset) -> Ordering {
        (self.sort_key)(a)
            .cmp(&(self.sort_key)(b))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Datasets sharing one key, in fuse order.
#[derive(Debug, Clone)]
pub struct Group {
    pub key: GroupKey,
    pub datasets: Vec<Dataset>,
}

/// Bucket `datasets` by `group_by`, in ascending key order.
pub fn group_datasets(datasets: Vec<Dataset>, group_by: &GroupBy) -> Vec<Group> {
    let mut buckets: BTreeMap<GroupKey, Vec<Dataset>> = BTreeMap::new();
    let mut dropped = 0usize;
    for dataset in datasets {
        match group_by.key(&dataset) {
            Some(key) => buckets.entry(key).or_default().push(dataset),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::debug!(
            dimension = %group_by.dimension,
            dropped,
            "Datasets without a group key left out"
        );
    }

    buckets
        .into_iter()
        .map(|(key, mut datasets)| {
            datasets.sort_by(|a, b| group_by.order(a, b));
            Group { key, datasets }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{eo3_product, make_dataset, yaml_doc, DatasetDocBuilder, LS8_PRODUCT};

    fn dataset(builder: DatasetDocBuilder) -> Dataset {
        let product = eo3_product(&yaml_doc(LS8_PRODUCT).unwrap()).unwrap();
        make_dataset(&product, &builder, "mem://ds/").unwrap()
    }

    fn date(s: &str) -> GroupKey {
        GroupKey::Date(s.parse().unwrap())
    }

    #[test]
    fn test_key_ordering() {
        let mut keys = vec![
            GroupKey::Number(2.0),
            GroupKey::Text("b".into()),
            date("2020-01-02"),
            GroupKey::Number(f64::NAN),
            date("2020-01-01"),
            GroupKey::Number(-1.0),
        ];
        keys.sort();
        assert_eq!(keys[0], date("2020-01-01"));
        assert_eq!(keys[1], date("2020-01-02"));
        assert_eq!(keys[3], GroupKey::Number(-1.0));
        assert!(matches!(keys[5], GroupKey::Number(n) if n.is_nan()));
    }

    #[test]
    fn test_solar_day_keeps_overpass_together() {
        // Two scenes of one pass over longitude 150E, either side of UTC midnight.
        let before = dataset(
            DatasetDocBuilder::new("ls8_ard")
                .time("2020-01-01T23:50:00Z")
                .lonlat_grid(150.0, -30.0, 0.1, (10, 10)),
        );
        let after = dataset(
            DatasetDocBuilder::new("ls8_ard")
                .time("2020-01-02T00:10:00Z")
                .lonlat_grid(150.0, -31.0, 0.1, (10, 10)),
        );

        let groups = group_datasets(vec![after, before], &GroupBy::solar_day());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, date("2020-01-02"));
        assert_eq!(groups[0].datasets.len(), 2);

        let by_utc = GroupBy::custom("time", |d: &Dataset| {
            d.center_time().map(|t| GroupKey::Date(t.date_naive()))
        });
        assert_eq!(group_datasets(groups[0].datasets.clone(), &by_utc).len(), 2);
    }

    #[test]
    fn test_groups_ascending_and_datasets_in_time_order() {
        let late = dataset(DatasetDocBuilder::new("ls8_ard").time("2020-01-05T10:30:00Z"));
        let early = dataset(DatasetDocBuilder::new("ls8_ard").time("2020-01-05T10:00:00Z"));
        let first_day = dataset(DatasetDocBuilder::new("ls8_ard").time("2020-01-01T10:00:00Z"));

        let groups = group_datasets(
            vec![late.clone(), first_day.clone(), early.clone()],
            &GroupBy::solar_day(),
        );
        let keys: Vec<_> = groups.iter().map(|g| g.key.to_string()).collect();
        assert_eq!(keys, vec!["2020-01-01", "2020-01-05"]);
        assert_eq!(groups[1].datasets, vec![early, late]);
    }

    #[test]
    fn test_ties_broken_by_id() {
        let a = dataset(DatasetDocBuilder::new("ls8_ard").time("2020-01-05T10:00:00Z"));
        let b = dataset(DatasetDocBuilder::new("ls8_ard").time("2020-01-05T10:00:00Z"));
        let (lo, hi) = if a.id < b.id { (a, b) } else { (b, a) };

        let groups = group_datasets(vec![hi.clone(), lo.clone()], &GroupBy::time());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].datasets, vec![lo, hi]);
    }

    #[test]
    fn test_group_by_field() {
        let l8 = dataset(DatasetDocBuilder::new("ls8_ard").platform("landsat-8"));
        let l9 = dataset(DatasetDocBuilder::new("ls8_ard").platform("landsat-9"));
        let none = dataset(DatasetDocBuilder::new("ls8_ard"));

        let groups = group_datasets(vec![l9, none, l8], &GroupBy::field("platform"));
        let keys: Vec<_> = groups.iter().map(|g| g.key.clone()).collect();
        assert_eq!(
            keys,
            vec![
                GroupKey::Text("landsat-8".into()),
                GroupKey::Text("landsat-9".into())
            ]
        );
        assert_eq!(groups[0].datasets.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        assert!(group_datasets(Vec::new(), &GroupBy::default()).is_empty());
    }
}
