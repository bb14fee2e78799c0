//! Shared fixture: a scratch archive with a catalog, cached grids and
//! JSON-backed source datasets

#![allow(dead_code)]

use climate_regrid::catalog::{Catalog, CatalogSpec};
use climate_regrid::config::RunConfig;
use climate_regrid::dataset::{Axis, Dataset, MemoryDataset, Variable};
use climate_regrid::grid::{GridCache, GridDefinition, GridShape, Projection};
use climate_regrid::processing::{
    PassThroughFactory, ProcessingUnit, ProcessingUnitFactory,
};
use climate_regrid::{Error, Result, Scheduler};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Scratch archive.
pub struct Archive {
    pub dir: TempDir,
    pub catalog: Arc<Catalog>,
    pub grids: Arc<GridCache>,
}

impl Archive {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for sub in [
            "avg/Ens",
            "avg/Ctrl-1",
            "avg/Ctrl-A",
            "avg/Ctrl-B",
            "avg/GPCC",
            "diag/Ens",
            "diag/Ctrl-1",
            "diag/grand-ensemble",
            "grids",
            "raw",
        ] {
            std::fs::create_dir_all(root.join(sub)).unwrap();
        }
        let json = serde_json::json!({
            "avg_root": root.join("avg"),
            "diag_root": root.join("diag"),
            "grid_folder": root.join("grids"),
            "model_prefix": "cesm",
            "filetypes": [
                {"name": "atm", "families": ["climatology", "time_series"]},
                {"name": "cvdp", "families": ["diagnostic"]}
            ],
            "experiments": [
                {"name": "Ens", "begin": "1979-01-01", "end": "1995-01-01", "grid": "cesm1x1", "ensemble": "Ens"},
                {"name": "Ctrl-1", "begin": "1979-01-01", "end": "1995-01-01", "grid": "cesm1x1", "ensemble": "Ens"},
                {"name": "Ctrl-A", "begin": "1980-01-01", "end": "1995-01-01", "grid": "cesm1x1", "ensemble": "Ens"},
                {"name": "Ctrl-B", "begin": "1981-06-01", "end": "1995-01-01", "grid": "cesm1x1", "ensemble": "Ens"}
            ],
            "observations": [
                {"name": "GPCC", "resolutions": {"climatology": ["05"], "time_series": ["05"]}}
            ]
        });
        let spec: CatalogSpec = serde_json::from_value(json).unwrap();
        let catalog = Arc::new(Catalog::from_spec(spec).unwrap());
        let grids = Arc::new(GridCache::new(root.join("grids")));
        grids.store(grid("arb2", Some("d02"))).unwrap();
        grids.store(grid("gpcc", Some("05"))).unwrap();
        Self { dir, catalog, grids }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn scheduler(
        &self,
        config: RunConfig,
        units: Arc<dyn ProcessingUnitFactory>,
    ) -> Scheduler {
        Scheduler::builder(Arc::clone(&self.catalog))
            .grid_cache(Arc::clone(&self.grids))
            .processing_units(units)
            .config(config)
            .build()
    }

    /// Write a source dataset and backdate it by an hour.
    pub fn write_source(&self, relative: &str, dataset: &MemoryDataset) -> PathBuf {
        let path = self.path(relative);
        dataset.save(&path).unwrap();
        set_age(&path, Duration::from_secs(3600));
        path
    }
}

pub fn grid(name: &str, resolution: Option<&str>) -> GridDefinition {
    GridDefinition::new(
        name,
        resolution.map(str::to_string),
        Projection::Geographic,
        [0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        GridShape { ny: 2, nx: 2 },
    )
    .unwrap()
}

/// Monthly dataset with `months` samples of `precip(time, lat)` and a
/// `landmask(lat)`.
#[allow(clippy::cast_precision_loss)]
pub fn monthly(name: &str, months: usize) -> MemoryDataset {
    let mut ds = MemoryDataset::new(name);
    ds.push_axis(Axis::new("time", "days", (0..months).map(|i| i as f64 * 30.0).collect()))
        .unwrap();
    ds.push_axis(Axis::new("lat", "deg N", vec![-10.0, 10.0])).unwrap();
    ds.push_variable(Variable::new(
        "precip",
        "mm/day",
        vec!["time".into(), "lat".into()],
        (0..months * 2).map(|i| i as f64).collect(),
    ))
    .unwrap();
    ds.push_variable(Variable::new("landmask", "", vec!["lat".into()], vec![1.0, 0.0]))
        .unwrap();
    ds
}

/// Set a file's mtime to `age` before now.
pub fn set_age(path: &Path, age: Duration) {
    set_mtime(path, SystemTime::now() - age);
}

pub fn set_mtime(path: &Path, time: SystemTime) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

/// Pass-through factory counting constructions and regrid calls.
#[derive(Debug, Default)]
pub struct CountingFactory {
    pub constructed: AtomicUsize,
    pub regrids: Arc<AtomicUsize>,
}

impl CountingFactory {
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    pub fn regrids(&self) -> usize {
        self.regrids.load(Ordering::SeqCst)
    }
}

struct CountingUnit<'a> {
    inner: Box<dyn ProcessingUnit + 'a>,
    regrids: Arc<AtomicUsize>,
}

impl ProcessingUnit for CountingUnit<'_> {
    fn regrid(&mut self, grid: &GridDefinition) -> Result<()> {
        self.regrids.fetch_add(1, Ordering::SeqCst);
        self.inner.regrid(grid)
    }

    fn shift_longitude(&mut self, degrees: f64) -> Result<()> {
        self.inner.shift_longitude(degrees)
    }

    fn sync(&mut self, flush: bool) -> Result<()> {
        self.inner.sync(flush)
    }
}

impl ProcessingUnitFactory for CountingFactory {
    fn construct<'a>(
        &self,
        source: &'a dyn Dataset,
        sink: &'a mut dyn Dataset,
        variables: Option<&'a [String]>,
    ) -> Result<Box<dyn ProcessingUnit + 'a>> {
        self.constructed.fetch_add(1, Ordering::SeqCst);
        let inner = PassThroughFactory.construct(source, sink, variables)?;
        Ok(Box::new(CountingUnit {
            inner,
            regrids: Arc::clone(&self.regrids),
        }))
    }
}

/// Pass-through factory that errors for one source and panics for another.
#[derive(Debug)]
pub struct FailingFactory {
    pub error_on: String,
    pub panic_on: String,
}

impl ProcessingUnitFactory for FailingFactory {
    fn construct<'a>(
        &self,
        source: &'a dyn Dataset,
        sink: &'a mut dyn Dataset,
        variables: Option<&'a [String]>,
    ) -> Result<Box<dyn ProcessingUnit + 'a>> {
        if source.name() == self.error_on {
            return Err(Error::Other(format!("cannot process '{}'", source.name())));
        }
        assert!(source.name() != self.panic_on, "processing unit crashed on '{}'", source.name());
        PassThroughFactory.construct(source, sink, variables)
    }
}
