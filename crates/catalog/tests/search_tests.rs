//! Search behaviour over an in-memory index.

use catalog::{CatalogError, Dataset, Index, QueryError, SearchTerms};
use chrono::{DateTime, Utc};
use cube_common::{BoundingBox, Crs};
use futures::TryStreamExt;
use projection::Geometry;
use serde_json::json;
use test_utils::{landsat_index, yaml_doc, DatasetDocBuilder, TELEMETRY_METADATA_TYPE};

fn t(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

async fn add(index: &Index, builder: DatasetDocBuilder) -> Dataset {
    let doc = builder.build();
    let product = index.products().match_document(&doc, None, false).await.unwrap();
    let dataset = Dataset::new(product, doc, vec!["s3://bucket/ds.yaml".into()]).unwrap();
    index.datasets().add(&dataset, true).await.unwrap();
    dataset
}

fn lonlat_box(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Geometry {
    Geometry::from_bbox(&BoundingBox::new(min_x, min_y, max_x, max_y), Crs::wgs84())
}

#[tokio::test]
async fn test_time_range_overlap_is_inclusive() {
    let index = landsat_index().await.unwrap();
    let ds = add(
        &index,
        DatasetDocBuilder::new("ls8_ard").time_span("2020-01-01T10:00:00Z", "2020-01-01T10:00:30Z"),
    )
    .await;

    let hit = |start: &str, end: &str| {
        SearchTerms::new()
            .product("ls8_ard")
            .time(t(start), t(end))
    };

    // Partial overlap at either side.
    for (start, end) in [
        ("2020-01-01T09:00:00Z", "2020-01-01T10:00:10Z"),
        ("2020-01-01T10:00:20Z", "2020-01-01T11:00:00Z"),
        // Touching endpoints.
        ("2020-01-01T09:00:00Z", "2020-01-01T10:00:00Z"),
        ("2020-01-01T10:00:30Z", "2020-01-01T11:00:00Z"),
        // Query inside the span.
        ("2020-01-01T10:00:05Z", "2020-01-01T10:00:06Z"),
    ] {
        let found = index.datasets().search(&hit(start, end)).await.unwrap();
        assert_eq!(found, vec![ds.clone()], "query {}..{}", start, end);
    }

    for (start, end) in [
        ("2020-01-01T09:00:00Z", "2020-01-01T09:59:59Z"),
        ("2020-01-01T10:00:31Z", "2020-01-02T00:00:00Z"),
    ] {
        let found = index.datasets().search(&hit(start, end)).await.unwrap();
        assert!(found.is_empty(), "query {}..{}", start, end);
    }
}

#[tokio::test]
async fn test_reversed_range_is_normalized() {
    let index = landsat_index().await.unwrap();
    add(&index, DatasetDocBuilder::new("ls8_ard").time("2020-06-01T00:00:00Z")).await;

    let terms = SearchTerms::new().time(t("2020-07-01T00:00:00Z"), t("2020-05-01T00:00:00Z"));
    assert_eq!(index.datasets().count(&terms).await.unwrap(), 1);
}

#[tokio::test]
async fn test_archived_excluded_unless_requested() {
    let index = landsat_index().await.unwrap();
    let ds = add(&index, DatasetDocBuilder::new("ls8_ard")).await;
    index.datasets().archive(&[ds.id], false).await.unwrap();

    let terms = SearchTerms::new().product("ls8_ard");
    assert!(index.datasets().search(&terms).await.unwrap().is_empty());

    let found = index
        .datasets()
        .search(&terms.clone().include_archived())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].is_archived());

    // Direct lookup still works.
    assert!(index.datasets().get(ds.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_no_match_is_empty_not_error() {
    let index = landsat_index().await.unwrap();
    add(&index, DatasetDocBuilder::new("ls8_ard").platform("landsat-8")).await;

    let terms = SearchTerms::new().eq("platform", "landsat-9");
    assert!(index.datasets().search(&terms).await.unwrap().is_empty());

    let terms = SearchTerms::new().product("no_such_product");
    assert!(index.datasets().search(&terms).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_field_rejected() {
    let index = landsat_index().await.unwrap();
    let err = index
        .datasets()
        .search(&SearchTerms::new().eq("orbit", 12))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CatalogError::Query(QueryError::UnknownField(ref f)) if f == "orbit"
    ));
}

#[tokio::test]
async fn test_field_type_ambiguity_needs_product() {
    let index = landsat_index().await.unwrap();
    index
        .metadata_types()
        .add_document(&yaml_doc(TELEMETRY_METADATA_TYPE).unwrap())
        .await
        .unwrap();
    index
        .products()
        .add_document(&json!({
            "name": "buoys",
            "metadata_type": "telemetry",
            "metadata": {"kind": "buoy"},
            "measurements": [{"name": "sst", "dtype": "float32", "nodata": "NaN"}]
        }))
        .await
        .unwrap();

    let err = index
        .datasets()
        .search(&SearchTerms::new().eq("cloud_cover", 10.0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CatalogError::Query(QueryError::AmbiguousField { .. })
    ));

    // Scoped to one product, the field has a single type.
    index
        .datasets()
        .search(&SearchTerms::new().product("ls8_ard").eq("cloud_cover", 10.0))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_field_predicates() {
    let index = landsat_index().await.unwrap();
    let clear = add(
        &index,
        DatasetDocBuilder::new("ls8_ard").platform("landsat-8").cloud_cover(5.0),
    )
    .await;
    add(
        &index,
        DatasetDocBuilder::new("ls8_ard").platform("landsat-8").cloud_cover(60.0),
    )
    .await;
    add(
        &index,
        DatasetDocBuilder::new("ls8_ard").platform("landsat-9").cloud_cover(1.0),
    )
    .await;

    let terms = SearchTerms::new()
        .eq("platform", "landsat-8")
        .range("cloud_cover", 0.0, 10.0);
    assert_eq!(index.datasets().search(&terms).await.unwrap(), vec![clear]);
}

#[tokio::test]
async fn test_spatial_search_uses_exact_geometry() {
    let index = landsat_index().await.unwrap();
    // A diamond whose bounding box is (0, 0, 1, 1).
    let diamond = add(
        &index,
        DatasetDocBuilder::new("ls8_ard")
            .lonlat_grid(0.0, 1.0, 0.1, (10, 10))
            .geometry(json!({
                "type": "Polygon",
                "coordinates": [[[0.5, 0.0], [1.0, 0.5], [0.5, 1.0], [0.0, 0.5], [0.5, 0.0]]]
            })),
    )
    .await;

    let corner = SearchTerms::new().geopolygon(lonlat_box(0.0, 0.0, 0.1, 0.1));
    assert!(index.datasets().search(&corner).await.unwrap().is_empty());

    let centre = SearchTerms::new().geopolygon(lonlat_box(0.4, 0.4, 0.6, 0.6));
    assert_eq!(index.datasets().search(&centre).await.unwrap(), vec![diamond]);

    let far = SearchTerms::new().geopolygon(lonlat_box(10.0, 10.0, 11.0, 11.0));
    assert!(index.datasets().search(&far).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_spatial_search_across_crs() {
    let index = landsat_index().await.unwrap();
    // UTM 55S grid near 147E, 35.2S.
    let ds = add(
        &index,
        DatasetDocBuilder::new("ls8_ard")
            .crs("EPSG:32755")
            .grid((100, 200), [30.0, 0.0, 500000.0, 0.0, -30.0, 6100000.0]),
    )
    .await;

    let hit = SearchTerms::new().geopolygon(lonlat_box(146.9, -35.4, 147.1, -35.0));
    assert_eq!(index.datasets().search(&hit).await.unwrap(), vec![ds]);

    let miss = SearchTerms::new().geopolygon(lonlat_box(140.0, -30.0, 141.0, -29.0));
    assert!(index.datasets().search(&miss).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_order_and_limit() {
    let index = landsat_index().await.unwrap();
    let late = add(&index, DatasetDocBuilder::new("ls8_ard").time("2020-03-01T00:00:00Z")).await;
    let early = add(&index, DatasetDocBuilder::new("ls8_ard").time("2020-01-01T00:00:00Z")).await;
    add(&index, DatasetDocBuilder::new("ls8_ard").time("2020-05-01T00:00:00Z")).await;

    let terms = SearchTerms::new().order_by("time").limit(2);
    let found = index.datasets().search(&terms).await.unwrap();
    assert_eq!(found, vec![early, late]);
}

#[tokio::test]
async fn test_search_stream_is_restartable() {
    let index = landsat_index().await.unwrap();
    for day in 1..=3 {
        add(
            &index,
            DatasetDocBuilder::new("ls8_ard").time(&format!("2020-01-0{}T00:00:00Z", day)),
        )
        .await;
    }

    let search = index
        .datasets()
        .search_stream(&SearchTerms::new().product("ls8_ard"))
        .await
        .unwrap();
    let first: Vec<Dataset> = search.stream().try_collect().await.unwrap();
    let second: Vec<Dataset> = search.stream().try_collect().await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_search_by_product() {
    let index = landsat_index().await.unwrap();
    add(&index, DatasetDocBuilder::new("ls8_ard")).await;
    add(&index, DatasetDocBuilder::new("ls8_ard")).await;
    add(&index, DatasetDocBuilder::new("s2_ard")).await;

    let grouped = index
        .datasets()
        .search_by_product(&SearchTerms::new())
        .await
        .unwrap();
    let mut counts: Vec<(String, usize)> = grouped
        .iter()
        .map(|(p, ds)| (p.name.clone(), ds.len()))
        .collect();
    counts.sort();
    assert_eq!(counts, vec![("ls8_ard".to_string(), 2), ("s2_ard".to_string(), 1)]);
}
