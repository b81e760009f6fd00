//! Deferred loads: chunked compute units, memoisation and cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use catalog::Measurement;
use cube_common::Crs;
use loader::{
    group_datasets, load_data, Affine, BandSource, CancellationToken, DataSource, DriverFactory,
    DriverRegistry, Fuser, GeoBox, Group, GroupBy, LazyCube, LoadError, LoadOptions, MemoryDriver,
    RayonScheduler, Result, Scheduler, SequentialScheduler,
};
use ndarray::Array2;
use test_utils::{eo3_product, gradient_grid, make_dataset, product_doc, DatasetDocBuilder};

const ND: f64 = -999.0;

/// Counts opens before handing over to the memory driver.
struct Counting {
    inner: MemoryDriver,
    opens: AtomicUsize,
}

impl DriverFactory for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn open(&self, source: &BandSource) -> Result<Box<dyn DataSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open(source)
    }
}

fn grid(shape: (usize, usize)) -> GeoBox {
    GeoBox::new(shape, Affine::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0), Crs::wgs84())
}

/// Three days of 8x8 gradients, one dataset per day, served by a counting driver.
fn setup() -> (Vec<Group>, Vec<Measurement>, Arc<Counting>) {
    let product = eo3_product(&product_doc("p", &[("b", "int16", ND)])).unwrap();
    let driver = Arc::new(Counting {
        inner: MemoryDriver::new(),
        opens: AtomicUsize::new(0),
    });

    let mut datasets = Vec::new();
    for day in 1..=3 {
        let builder = DatasetDocBuilder::new("p")
            .time(&format!("2020-01-0{}T10:00:00Z", day))
            .lonlat_grid(0.0, 0.0, 1.0, (8, 8))
            .measurement("b", "b.tif");
        let location = format!("mem://day{}/odc-metadata.yaml", day);
        datasets.push(make_dataset(&product, &builder, &location).unwrap());
        driver.inner.insert_array(
            &format!("mem://day{}/b.tif", day),
            grid((8, 8)),
            gradient_grid(8, 8, 0.0, 7.0) + (day * 100) as f64,
            None,
        );
    }

    let groups = group_datasets(datasets, &GroupBy::solar_day());
    (groups, product.measurements.clone(), driver)
}

fn lazy(groups: Vec<Group>, measurements: Vec<Measurement>, driver: Arc<Counting>) -> LazyCube {
    let registry = DriverRegistry::new().with_driver("mem", None, driver);
    LazyCube::new(
        groups,
        grid((8, 8)),
        measurements,
        Fuser::default(),
        LoadOptions::default(),
        Arc::new(registry),
        (4, 4),
    )
}

#[test]
fn test_lazy_matches_eager() {
    let (groups, measurements, driver) = setup();
    let registry = DriverRegistry::new().with_driver("mem", None, driver.clone());
    let eager = load_data(
        &groups,
        &grid((8, 8)),
        &measurements,
        &Fuser::default(),
        &LoadOptions::default(),
        &registry,
    )
    .unwrap();

    let cube = lazy(groups, measurements, driver);
    assert_eq!(cube.shape(), (3, 1, 8, 8));
    assert_eq!(cube.unit_count(), 3 * 4);

    let computed = cube
        .compute(&RayonScheduler::new(), &CancellationToken::new())
        .unwrap();
    assert_eq!(computed.data, eager.data);
    assert_eq!(computed.keys, eager.keys);
    assert_eq!(computed.plane(2, "b").unwrap()[[0, 7]], 307.0);
}

#[test]
fn test_units_are_computed_once() {
    let (groups, measurements, driver) = setup();
    let cube = lazy(groups, measurements, driver.clone());
    assert_eq!(cube.computed_count(), 0);

    // Pulling one plane computes only that plane's chunks.
    let plane = cube.plane(1, "b").unwrap();
    assert_eq!(plane[[3, 3]], 203.0);
    assert_eq!(cube.computed_count(), 4);
    assert_eq!(driver.opens.load(Ordering::SeqCst), 4);

    let first = cube.compute(&SequentialScheduler, &CancellationToken::new()).unwrap();
    assert_eq!(driver.opens.load(Ordering::SeqCst), 12);

    // Clones share the plan and its results.
    let again = cube
        .clone()
        .compute(&SequentialScheduler, &CancellationToken::new())
        .unwrap();
    assert_eq!(driver.opens.load(Ordering::SeqCst), 12);
    assert_eq!(first.data, again.data);
}

/// Runs tasks in order and cancels after `after` of them.
struct CancelAfter {
    after: usize,
    token: CancellationToken,
}

impl Scheduler for CancelAfter {
    fn run(&self, tasks: usize, task: &(dyn Fn(usize) -> Result<()> + Sync)) -> Result<()> {
        for i in 0..tasks {
            if i == self.after {
                self.token.cancel();
            }
            task(i)?;
        }
        Ok(())
    }
}

#[test]
fn test_cancellation_returns_error_not_partial_cube() {
    let (groups, measurements, driver) = setup();
    let cube = lazy(groups, measurements, driver);

    let token = CancellationToken::new();
    let scheduler = CancelAfter {
        after: 5,
        token: token.clone(),
    };
    assert!(matches!(
        cube.compute(&scheduler, &token),
        Err(LoadError::Cancelled)
    ));
    assert_eq!(cube.computed_count(), 5);

    // A fresh token resumes from the memoised units.
    let done = cube
        .compute(&SequentialScheduler, &CancellationToken::new())
        .unwrap();
    assert_eq!(cube.computed_count(), 12);
    assert_eq!(done.shape(), (3, 1, 8, 8));
}

#[test]
fn test_failed_units_are_retried() {
    let (groups, measurements, driver) = setup();
    driver.inner.fail("mem://day2/b.tif", "offline");
    let cube = lazy(groups.clone(), measurements.clone(), driver.clone());

    let cube_with_skips = cube
        .compute(&SequentialScheduler, &CancellationToken::new())
        .unwrap();
    // One skip record per dataset, however many chunks it touched.
    assert_eq!(cube_with_skips.skipped.len(), 1);
    assert!(cube_with_skips
        .plane(1, "b")
        .unwrap()
        .iter()
        .all(|&v| v == ND));

    let abort = LazyCube::new(
        groups,
        grid((8, 8)),
        measurements,
        Fuser::default(),
        LoadOptions::default().with_policy(loader::IoErrorPolicy::Abort),
        Arc::new(DriverRegistry::new().with_driver("mem", None, driver.clone())),
        (4, 4),
    );
    assert!(abort.compute(&SequentialScheduler, &CancellationToken::new()).is_err());
    let done_before = abort.computed_count();
    assert!(done_before < abort.unit_count());

    driver.inner.remove("mem://day2/b.tif");
    driver.inner.insert_array(
        "mem://day2/b.tif",
        grid((8, 8)),
        Array2::from_elem((8, 8), 1.0),
        None,
    );
    let recovered = abort
        .compute(&SequentialScheduler, &CancellationToken::new())
        .unwrap();
    assert!(recovered.plane(1, "b").unwrap().iter().all(|&v| v == 1.0));
}
