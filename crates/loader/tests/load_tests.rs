//! End-to-end loads through the `Datacube` facade with in-memory rasters.

use std::sync::Arc;

use catalog::{Dataset, Index};
use chrono::{DateTime, Utc};
use cube_common::Crs;
use loader::{
    Affine, Datacube, DriverRegistry, Fuser, GeoBox, GroupBy, GroupKey, IoErrorPolicy, LoadError,
    LoadQuery, LoaderConfig, MemoryDriver, Resampling,
};
use ndarray::{s, Array2};
use test_utils::{assert_all_eq, init_test_tracing, product_doc, seeded_index, DatasetDocBuilder};

const ND: f64 = -999.0;

fn t(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

/// Product "p" with one int16 band "b", nodata -999, and an in-memory store.
struct Fixture {
    index: Index,
    memory: Arc<MemoryDriver>,
}

impl Fixture {
    async fn new() -> Self {
        init_test_tracing();
        let index = seeded_index(&[product_doc("p", &[("b", "int16", ND)])])
            .await
            .unwrap();
        Self {
            index,
            memory: Arc::new(MemoryDriver::new()),
        }
    }

    fn datacube(&self, config: LoaderConfig) -> Datacube {
        let drivers = DriverRegistry::new().with_memory(self.memory.clone());
        Datacube::new(self.index.clone(), drivers, config).unwrap()
    }

    /// Index a north-up 1-degree dataset at `time` whose top-left corner is
    /// `(lon, lat)`, with every pixel set to `value`.
    async fn add(
        &self,
        name: &str,
        time: &str,
        (lon, lat): (f64, f64),
        shape: (usize, usize),
        value: f64,
    ) -> Dataset {
        let builder = DatasetDocBuilder::new("p")
            .time(time)
            .lonlat_grid(lon, lat, 1.0, shape)
            .measurement("b", "b.tif");
        let doc = builder.build();
        let product = self.index.products().get("p").await.unwrap();
        let location = format!("mem://p/{}/odc-metadata.yaml", name);
        let dataset = Dataset::new(product, doc, vec![location]).unwrap();
        self.index.datasets().add(&dataset, false).await.unwrap();

        let grid = GeoBox::new(shape, Affine::new(1.0, 0.0, lon, 0.0, -1.0, lat), Crs::wgs84());
        self.memory.insert_array(
            &format!("mem://p/{}/b.tif", name),
            grid,
            Array2::from_elem(shape, value),
            Some(ND),
        );
        dataset
    }
}

/// A 3x5 one-degree grid with its top-left corner at (0, 0).
fn query() -> LoadQuery {
    LoadQuery::new("p")
        .lonlat((0.0, 5.0), (-3.0, 0.0))
        .output_crs(Crs::wgs84(), (1.0, -1.0))
}

#[tokio::test]
async fn test_first_valid_observation_wins() {
    let fx = Fixture::new().await;
    // D1 covers A = cols 0..2; D2 covers A and B = cols 2..4. Same solar day,
    // D1 earlier, so it is fused first.
    fx.add("d1", "2020-01-01T10:00:00Z", (0.0, 0.0), (2, 2), 5.0).await;
    fx.add("d2", "2020-01-01T10:05:00Z", (0.0, 0.0), (2, 4), 7.0).await;

    let cube = fx.datacube(LoaderConfig::default()).load(&query()).await.unwrap();

    assert_eq!(cube.shape(), (1, 1, 3, 5));
    assert_eq!(cube.keys, vec![GroupKey::Date("2020-01-01".parse().unwrap())]);
    assert_eq!(cube.dimension, "time");
    let plane = cube.plane(0, "b").unwrap();
    assert_all_eq!(plane.slice(s![0..2, 0..2]), 5.0);
    assert_all_eq!(plane.slice(s![0..2, 2..4]), 7.0);
    assert_all_eq!(plane.slice(s![.., 4..5]), ND);
    assert_all_eq!(plane.slice(s![2..3, ..]), ND);
    assert!(cube.skipped.is_empty());
}

#[tokio::test]
async fn test_fuse_order_follows_acquisition_time() {
    let fx = Fixture::new().await;
    fx.add("d1", "2020-01-01T10:05:00Z", (0.0, 0.0), (2, 2), 5.0).await;
    fx.add("d2", "2020-01-01T10:00:00Z", (0.0, 0.0), (2, 4), 7.0).await;

    let cube = fx.datacube(LoaderConfig::default()).load(&query()).await.unwrap();
    assert_all_eq!(cube.plane(0, "b").unwrap().slice(s![0..2, 0..4]), 7.0);

    let last = query().fuse(Fuser::copy_last());
    let cube = fx.datacube(LoaderConfig::default()).load(&last).await.unwrap();
    let plane = cube.plane(0, "b").unwrap();
    assert_all_eq!(plane.slice(s![0..2, 0..2]), 5.0);
    assert_all_eq!(plane.slice(s![0..2, 2..4]), 7.0);
}

#[tokio::test]
async fn test_disjoint_datasets_fuse_to_union() {
    for (first, second) in [
        ("2020-01-01T10:00:00Z", "2020-01-01T10:05:00Z"),
        ("2020-01-01T10:05:00Z", "2020-01-01T10:00:00Z"),
    ] {
        let fx = Fixture::new().await;
        fx.add("west", first, (0.0, 0.0), (3, 2), 1.0).await;
        fx.add("east", second, (3.0, 0.0), (3, 2), 2.0).await;

        let cube = fx.datacube(LoaderConfig::default()).load(&query()).await.unwrap();
        let plane = cube.plane(0, "b").unwrap();
        assert_all_eq!(plane.slice(s![.., 0..2]), 1.0);
        assert_all_eq!(plane.slice(s![.., 2..3]), ND);
        assert_all_eq!(plane.slice(s![.., 3..5]), 2.0);
    }
}

#[tokio::test]
async fn test_groups_are_separate_planes() {
    let fx = Fixture::new().await;
    fx.add("day1", "2020-01-01T10:00:00Z", (0.0, 0.0), (3, 5), 1.0).await;
    fx.add("day3", "2020-01-03T10:00:00Z", (0.0, 0.0), (3, 5), 3.0).await;

    let cube = fx.datacube(LoaderConfig::default()).load(&query()).await.unwrap();
    assert_eq!(cube.shape(), (2, 1, 3, 5));
    assert_all_eq!(cube.plane(0, "b").unwrap(), 1.0);
    assert_all_eq!(cube.plane(1, "b").unwrap(), 3.0);

    let narrowed = query().time(t("2020-01-02T00:00:00Z"), t("2020-01-04T00:00:00Z"));
    let cube = fx.datacube(LoaderConfig::default()).load(&narrowed).await.unwrap();
    assert_eq!(cube.shape(), (1, 1, 3, 5));
    assert_all_eq!(cube.plane(0, "b").unwrap(), 3.0);
}

#[tokio::test]
async fn test_empty_result_is_not_an_error() {
    let fx = Fixture::new().await;
    fx.add("d1", "2020-01-01T10:00:00Z", (0.0, 0.0), (2, 2), 5.0).await;

    let later = query().time(t("2021-01-01T00:00:00Z"), t("2021-12-31T00:00:00Z"));
    let cube = fx.datacube(LoaderConfig::default()).load(&later).await.unwrap();
    assert!(cube.is_empty());
    assert_eq!(cube.shape(), (0, 1, 3, 5));

    // Without a spatial constraint there is no extent to cover either.
    let nowhere = LoadQuery::new("p")
        .output_crs(Crs::wgs84(), (1.0, -1.0))
        .time(t("2021-01-01T00:00:00Z"), t("2021-12-31T00:00:00Z"));
    let cube = fx.datacube(LoaderConfig::default()).load(&nowhere).await.unwrap();
    assert!(cube.is_empty());
    assert!(cube.geobox.is_empty());
}

#[tokio::test]
async fn test_extent_defaults_to_union_of_datasets() {
    let fx = Fixture::new().await;
    fx.add("a", "2020-01-01T10:00:00Z", (10.0, 5.0), (2, 2), 1.0).await;
    fx.add("b", "2020-01-01T10:00:00Z", (12.0, 4.0), (2, 2), 2.0).await;

    let query = LoadQuery::new("p").output_crs(Crs::wgs84(), (1.0, -1.0));
    let cube = fx.datacube(LoaderConfig::default()).load(&query).await.unwrap();
    assert_eq!(cube.geobox.shape, (3, 4));
    assert_eq!(cube.geobox.affine.origin(), (10.0, 5.0));
    let plane = cube.plane(0, "b").unwrap();
    assert_eq!(plane[[0, 0]], 1.0);
    assert_eq!(plane[[2, 3]], 2.0);
    assert_eq!(plane[[2, 0]], ND);
}

#[tokio::test]
async fn test_unreadable_dataset_is_skipped_by_default() {
    let fx = Fixture::new().await;
    fx.add("good", "2020-01-01T10:00:00Z", (0.0, 0.0), (2, 2), 5.0).await;
    let bad = fx.add("bad", "2020-01-01T10:05:00Z", (0.0, 0.0), (2, 4), 7.0).await;
    fx.memory.fail("mem://p/bad/b.tif", "checksum mismatch");

    let cube = fx.datacube(LoaderConfig::default()).load(&query()).await.unwrap();
    let plane = cube.plane(0, "b").unwrap();
    assert_all_eq!(plane.slice(s![0..2, 0..2]), 5.0);
    assert_all_eq!(plane.slice(s![0..2, 2..4]), ND);

    assert_eq!(cube.skipped.len(), 1);
    assert_eq!(cube.skipped[0].dataset, bad.id);
    assert_eq!(cube.skipped[0].band, "b");
    assert!(cube.skipped[0].reason.contains("checksum mismatch"));
}

#[tokio::test]
async fn test_abort_policy_fails_the_load() {
    let fx = Fixture::new().await;
    fx.add("good", "2020-01-01T10:00:00Z", (0.0, 0.0), (2, 2), 5.0).await;
    let bad = fx.add("bad", "2020-01-03T10:00:00Z", (0.0, 0.0), (2, 2), 7.0).await;
    fx.memory.fail("mem://p/bad/b.tif", "checksum mismatch");

    let config = LoaderConfig {
        io_error_policy: IoErrorPolicy::Abort,
        ..LoaderConfig::default()
    };
    match fx.datacube(config).load(&query()).await {
        Err(LoadError::Io { dataset, band, .. }) => {
            assert_eq!(dataset, bad.id);
            assert_eq!(band, "b");
        }
        other => panic!("expected an Io error, got {:?}", other.map(|c| c.shape())),
    }

    // The per-query override wins over the configuration.
    let cube = fx
        .datacube(LoaderConfig {
            io_error_policy: IoErrorPolicy::Abort,
            ..LoaderConfig::default()
        })
        .load(&query().skip_broken(true))
        .await
        .unwrap();
    assert_eq!(cube.skipped.len(), 1);
    // Group 0 is untouched by the failure in group 1.
    assert_all_eq!(cube.plane(0, "b").unwrap().slice(s![0..2, 0..2]), 5.0);
    assert_all_eq!(cube.plane(1, "b").unwrap(), ND);
}

#[tokio::test]
async fn test_missing_measurement_fails_before_reading() {
    let fx = Fixture::new().await;
    fx.add("d1", "2020-01-01T10:00:00Z", (0.0, 0.0), (2, 2), 5.0).await;
    fx.memory.fail("mem://p/d1/b.tif", "must not be opened");

    let result = fx
        .datacube(LoaderConfig::default())
        .load(&query().measurements(&["b", "swir"]))
        .await;
    assert!(matches!(
        result,
        Err(LoadError::MissingMeasurement { ref name, .. }) if name == "swir"
    ));
}

#[tokio::test]
async fn test_query_errors() {
    let fx = Fixture::new().await;
    let datacube = fx.datacube(LoaderConfig::default());

    assert!(matches!(
        datacube.load(&LoadQuery::new("nope")).await,
        Err(LoadError::InvalidQuery(_))
    ));
    assert!(matches!(
        datacube.load(&LoadQuery::default()).await,
        Err(LoadError::InvalidQuery(_))
    ));
    // Product "p" declares no load grid.
    assert!(matches!(
        datacube.load(&LoadQuery::new("p").lonlat((0.0, 1.0), (0.0, 1.0))).await,
        Err(LoadError::NoGridSpec(_))
    ));
}

#[tokio::test]
async fn test_reprojects_from_web_mercator() {
    let fx = Fixture::new().await;
    // 20x20 pixels of 0.1 degree at the equator, top-left at (0, 0).
    let res = 11_131.949_079_327_358;
    let builder = DatasetDocBuilder::new("p")
        .time("2020-01-01T10:00:00Z")
        .crs("EPSG:3857")
        .grid((20, 20), [res, 0.0, 0.0, 0.0, -res, 0.0])
        .measurement("b", "b.tif");
    let product = fx.index.products().get("p").await.unwrap();
    let dataset = Dataset::new(product, builder.build(), vec!["mem://merc/odc-metadata.yaml".into()]).unwrap();
    fx.index.datasets().add(&dataset, false).await.unwrap();

    let mercator = Crs::from_epsg(3857).unwrap();
    fx.memory.insert_array(
        "mem://merc/b.tif",
        GeoBox::new((20, 20), Affine::new(res, 0.0, 0.0, 0.0, -res, 0.0), mercator),
        Array2::from_elem((20, 20), 9.0),
        Some(ND),
    );

    let query = LoadQuery::new("p")
        .lonlat((0.5, 1.5), (-1.5, -0.5))
        .output_crs(Crs::wgs84(), (0.1, -0.1))
        .resampling(Resampling::Bilinear)
        .group_by(GroupBy::time());
    let cube = fx.datacube(LoaderConfig::default()).load(&query).await.unwrap();
    assert_eq!(cube.shape(), (1, 1, 10, 10));
    assert_all_eq!(cube.plane(0, "b").unwrap(), 9.0);
    assert_eq!(cube.keys, vec![GroupKey::Time(t("2020-01-01T10:00:00Z"))]);
}

#[tokio::test]
async fn test_find_and_group_stages() {
    let fx = Fixture::new().await;
    fx.add("a", "2020-01-01T10:00:00Z", (0.0, 0.0), (2, 2), 1.0).await;
    fx.add("b", "2020-01-02T10:00:00Z", (0.0, 0.0), (2, 2), 2.0).await;
    fx.add("c", "2020-01-02T10:00:00Z", (50.0, 0.0), (2, 2), 3.0).await;
    let datacube = fx.datacube(LoaderConfig::default());

    let found = datacube.find_datasets(&query()).await.unwrap();
    assert_eq!(found.len(), 2);

    let groups = datacube.group_datasets(found, &GroupBy::solar_day());
    assert_eq!(groups.len(), 2);

    let product = fx.index.products().get("p").await.unwrap();
    let geobox = GeoBox::new((2, 2), Affine::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0), Crs::wgs84());
    let cube = datacube
        .load_data(&groups, &geobox, &product.measurements, &Fuser::default())
        .unwrap();
    assert_all_eq!(cube.plane(0, "b").unwrap(), 1.0);
    assert_all_eq!(cube.plane(1, "b").unwrap(), 2.0);

    let filtered = query().dataset_predicate(|d| d.center_time() > Some(t("2020-01-02T00:00:00Z")));
    assert_eq!(datacube.find_datasets(&filtered).await.unwrap().len(), 1);

    let listed = datacube.list_measurements().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0, "p");
}
