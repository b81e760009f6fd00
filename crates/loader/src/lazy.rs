//! Deferred loading.
//!
//! A [`LazyCube`] is a load plan split into independent compute units, one
//! per (group, band, spatial chunk). Each unit fuses its group's datasets in
//! group order into its own chunk, so units never share mutable state and a
//! [`Scheduler`] may run them in any order or in parallel. Results are kept
//! once computed; computing the same cube again reuses them.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use ndarray::{s, Array2, Array4};
use rayon::prelude::*;

use catalog::Measurement;

use crate::driver::DriverRegistry;
use crate::error::{LoadError, Result};
use crate::fuse::Fuser;
use crate::geobox::GeoBox;
use crate::grouping::{Group, GroupKey};
use crate::load::{fuse_plane, DataCube, LoadOptions, PlaneContext, SkippedRead};
use crate::window::Window;

/// Runs a batch of numbered tasks.
pub trait Scheduler: Send + Sync {
    /// Run `task(0)` .. `task(tasks - 1)`, stopping at the first error.
    fn run(&self, tasks: usize, task: &(dyn Fn(usize) -> Result<()> + Sync)) -> Result<()>;
}

/// Runs tasks one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialScheduler;

impl Scheduler for SequentialScheduler {
    fn run(&self, tasks: usize, task: &(dyn Fn(usize) -> Result<()> + Sync)) -> Result<()> {
        (0..tasks).try_for_each(task)
    }
}

/// Runs tasks on a rayon thread pool.
#[derive(Debug, Default)]
pub struct RayonScheduler {
    pool: Option<rayon::ThreadPool>,
}

impl RayonScheduler {
    /// Use rayon's global pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a dedicated pool of `threads` workers; 0 means the global pool.
    pub fn with_threads(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Ok(Self::new());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("datacube-load-{}", i))
            .build()
            .map_err(|e| LoadError::invalid_config(format!("cannot build thread pool: {}", e)))?;
        Ok(Self { pool: Some(pool) })
    }
}

impl Scheduler for RayonScheduler {
    fn run(&self, tasks: usize, task: &(dyn Fn(usize) -> Result<()> + Sync)) -> Result<()> {
        let all = || (0..tasks).into_par_iter().try_for_each(task);
        match &self.pool {
            Some(pool) => pool.install(all),
            None => all(),
        }
    }
}

/// Cooperative cancellation, checked between compute units.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One (group, band, chunk) piece of the cube.
#[derive(Debug)]
struct ComputeUnit {
    group: usize,
    band: usize,
    window: Window,
    result: OnceLock<(Array2<f64>, Vec<SkippedRead>)>,
}

#[derive(Debug)]
struct Plan {
    groups: Vec<Group>,
    geobox: GeoBox,
    measurements: Vec<Measurement>,
    fuser: Fuser,
    options: LoadOptions,
    registry: Arc<DriverRegistry>,
    units: Vec<ComputeUnit>,
}

/// A cube whose pixels are read on demand.
#[derive(Debug, Clone)]
pub struct LazyCube {
    plan: Arc<Plan>,
    dimension: String,
}

impl LazyCube {
    /// Plan a load of `groups` onto `geobox`, split into chunks of at most
    /// `chunk` (rows, cols) pixels.
    pub fn new(
        groups: Vec<Group>,
        geobox: GeoBox,
        measurements: Vec<Measurement>,
        fuser: Fuser,
        options: LoadOptions,
        registry: Arc<DriverRegistry>,
        chunk: (usize, usize),
    ) -> Self {
        let chunks = geobox.chunks(chunk);
        let mut units = Vec::with_capacity(groups.len() * measurements.len() * chunks.len());
        for group in 0..groups.len() {
            for band in 0..measurements.len() {
                units.extend(chunks.iter().map(|&window| ComputeUnit {
                    group,
                    band,
                    window,
                    result: OnceLock::new(),
                }));
            }
        }

        tracing::debug!(
            groups = groups.len(),
            bands = measurements.len(),
            chunks = chunks.len(),
            units = units.len(),
            "Planned lazy load"
        );

        Self {
            dimension: "time".to_string(),
            plan: Arc::new(Plan {
                groups,
                geobox,
                measurements,
                fuser,
                options,
                registry,
                units,
            }),
        }
    }

    /// Name the group dimension of the computed cube.
    pub fn with_dimension(mut self, dimension: &str) -> Self {
        self.dimension = dimension.to_string();
        self
    }

    /// `(groups, bands, height, width)`
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        let (h, w) = self.plan.geobox.shape;
        (self.plan.groups.len(), self.plan.measurements.len(), h, w)
    }

    pub fn keys(&self) -> Vec<GroupKey> {
        self.plan.groups.iter().map(|g| g.key.clone()).collect()
    }

    pub fn bands(&self) -> Vec<String> {
        self.plan.measurements.iter().map(|m| m.name.clone()).collect()
    }

    pub fn geobox(&self) -> &GeoBox {
        &self.plan.geobox
    }

    /// Number of compute units in the plan.
    pub fn unit_count(&self) -> usize {
        self.plan.units.len()
    }

    /// Number of units already computed.
    pub fn computed_count(&self) -> usize {
        self.plan.units.iter().filter(|u| u.result.get().is_some()).count()
    }

    fn compute_unit(&self, index: usize) -> Result<()> {
        let plan = &self.plan;
        let Some(unit) = plan.units.get(index) else {
            return Ok(());
        };
        if unit.result.get().is_some() {
            return Ok(());
        }

        let measurement = &plan.measurements[unit.band];
        let chunk_geobox = plan.geobox.window(&unit.window);
        let mut chunk = Array2::from_elem(unit.window.shape(), measurement.fill_value());
        let ctx = PlaneContext {
            fuser: &plan.fuser,
            options: &plan.options,
            registry: &plan.registry,
        };
        let skipped = fuse_plane(
            &mut chunk.view_mut(),
            &chunk_geobox,
            unit.group,
            &plan.groups[unit.group].datasets,
            measurement,
            &ctx,
        )?;

        // A concurrent computation of the same unit produced the same value.
        let _ = unit.result.set((chunk, skipped));
        Ok(())
    }

    fn run_units(
        &self,
        indices: &[usize],
        scheduler: &dyn Scheduler,
        cancel: &CancellationToken,
    ) -> Result<()> {
        scheduler.run(indices.len(), &|i: usize| {
            if cancel.is_cancelled() {
                return Err(LoadError::Cancelled);
            }
            self.compute_unit(indices[i])
        })?;
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        Ok(())
    }

    /// Compute every unit and assemble the cube.
    ///
    /// A cancelled computation returns [`LoadError::Cancelled`]; units that
    /// finished stay memoised for a later call.
    pub fn compute(&self, scheduler: &dyn Scheduler, cancel: &CancellationToken) -> Result<DataCube> {
        let plan = &self.plan;
        let pending: Vec<usize> = (0..plan.units.len())
            .filter(|&i| plan.units[i].result.get().is_none())
            .collect();
        tracing::info!(
            units = plan.units.len(),
            pending = pending.len(),
            "Computing lazy cube"
        );
        self.run_units(&pending, scheduler, cancel)?;

        let nodata: Vec<f64> = plan.measurements.iter().map(Measurement::fill_value).collect();
        let mut data = Array4::from_shape_fn(self.shape(), |(_, b, _, _)| nodata[b]);
        let mut seen = HashSet::new();
        let mut skipped = Vec::new();
        for unit in &plan.units {
            let (chunk, unit_skipped) = unit.result.get().ok_or(LoadError::Cancelled)?;
            let w = unit.window;
            data.slice_mut(s![unit.group, unit.band, w.row_off..w.row_end(), w.col_off..w.col_end()])
                .assign(chunk);
            for skip in unit_skipped {
                if seen.insert((skip.group, skip.dataset, skip.band.clone())) {
                    skipped.push(skip.clone());
                }
            }
        }

        Ok(DataCube {
            dimension: self.dimension.clone(),
            keys: self.keys(),
            bands: self.bands(),
            geobox: plan.geobox.clone(),
            data,
            nodata,
            skipped,
        })
    }

    /// Compute a single band of a single group.
    pub fn plane(&self, group: usize, band: &str) -> Result<Array2<f64>> {
        let plan = &self.plan;
        let b = plan
            .measurements
            .iter()
            .position(|m| m.name == band)
            .ok_or_else(|| LoadError::MissingMeasurement {
                product: String::new(),
                name: band.to_string(),
            })?;
        if group >= plan.groups.len() {
            return Err(LoadError::InvalidQuery(format!(
                "group {} out of range ({} groups)",
                group,
                plan.groups.len()
            )));
        }

        let indices: Vec<usize> = (0..plan.units.len())
            .filter(|&i| plan.units[i].group == group && plan.units[i].band == b)
            .collect();
        self.run_units(&indices, &SequentialScheduler, &CancellationToken::new())?;

        let mut out = Array2::from_elem(plan.geobox.shape, plan.measurements[b].fill_value());
        for &i in &indices {
            let unit = &plan.units[i];
            let (chunk, _) = unit.result.get().ok_or(LoadError::Cancelled)?;
            let w = unit.window;
            out.slice_mut(s![w.row_off..w.row_end(), w.col_off..w.col_end()])
                .assign(chunk);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_stops_at_first_error() {
        let ran = std::sync::Mutex::new(Vec::new());
        let result = SequentialScheduler.run(5, &|i: usize| {
            ran.lock().unwrap().push(i);
            if i == 2 {
                Err(LoadError::Cancelled)
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(LoadError::Cancelled)));
        assert_eq!(*ran.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_rayon_runs_every_task() {
        let count = std::sync::atomic::AtomicUsize::new(0);
        let scheduler = RayonScheduler::with_threads(2).unwrap();
        scheduler
            .run(100, &|_: usize| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
