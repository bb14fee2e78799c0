//! Job scheduler: a bounded worker pool with per-job failure isolation
//!
//! Jobs are independent. They run on a `rayon` pool of
//! [`RunConfig::workers`] threads and may finish in any order; results are
//! folded into a [`BatchReport`] only after every job has returned.
//!
//! Any error or panic inside a job is caught at the job boundary, logged
//! with the job's context and recorded as a [`JobFailure`]. It never
//! reaches sibling jobs or the pool.
//!
//! Two jobs writing the same sink at the same time is a caller error and
//! is not detected here.
//!
//! ```rust,no_run
//! use climate_regrid::catalog::Catalog;
//! use climate_regrid::config::RunConfig;
//! use climate_regrid::product::ProductKind;
//! use climate_regrid::scheduler::{BatchRequest, Scheduler};
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(Catalog::from_json_file("catalog.json".as_ref())?);
//! let scheduler = Scheduler::builder(catalog)
//!     .config(RunConfig::from_env()?)
//!     .build();
//! let jobs = scheduler.build_jobs(&BatchRequest::new(ProductKind::TimeSeries))?;
//! let report = scheduler.run(&jobs)?;
//! println!("{report}");
//! # Ok::<(), climate_regrid::Error>(())
//! ```

mod job;
mod report;
mod worker;

pub use job::{build_jobs, BatchRequest, GridRequest, Job, JobBuilder, JobOptions, JobTarget};
pub use report::{BatchReport, JobFailure, JobOutcome, PlanEntry, PlannedAction, SkipReason};
pub use worker::{JobContext, DAYS_PER_MONTH, LANDMASK};

use crate::catalog::Catalog;
use crate::config::RunConfig;
use crate::dataset::{DatasetIo, JsonDatasetIo};
use crate::grid::GridCache;
use crate::processing::{PassThroughFactory, ProcessingUnitFactory};
use crate::resolver::PathResolver;
use crate::staleness::{Decision, StalenessOracle};
use crate::{Error, Result};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, info_span};

/// Runs batches of jobs.
pub struct Scheduler {
    resolver: PathResolver,
    grids: Arc<GridCache>,
    io: Arc<dyn DatasetIo>,
    units: Arc<dyn ProcessingUnitFactory>,
    config: RunConfig,
    oracle: StalenessOracle,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("grid_folder", &self.grids.folder())
            .field("config", &self.config)
            .field("oracle", &self.oracle)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Start building a scheduler over `catalog`.
    #[must_use]
    pub fn builder(catalog: Arc<Catalog>) -> SchedulerBuilder {
        SchedulerBuilder {
            catalog,
            grids: None,
            io: None,
            units: None,
            config: RunConfig::default(),
        }
    }

    /// Catalog in use.
    #[must_use]
    pub const fn catalog(&self) -> &Arc<Catalog> {
        self.resolver.catalog()
    }

    /// Path resolver in use.
    #[must_use]
    pub const fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Grid cache in use.
    #[must_use]
    pub const fn grids(&self) -> &Arc<GridCache> {
        &self.grids
    }

    /// Run configuration.
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Expand a batch request into jobs.
    ///
    /// # Errors
    ///
    /// See [`build_jobs`]; every error aborts the batch.
    pub fn build_jobs(&self, request: &BatchRequest) -> Result<Vec<Job>> {
        build_jobs(request, self.catalog(), &self.grids)
    }

    /// Run `jobs` on the configured number of workers.
    ///
    /// # Errors
    ///
    /// Only if the worker pool cannot be started; job failures are
    /// reported in the [`BatchReport`].
    pub fn run(&self, jobs: &[Job]) -> Result<BatchReport> {
        self.run_with_workers(jobs, self.config.workers())
    }

    /// Run `jobs` on `workers` threads.
    ///
    /// # Errors
    ///
    /// Returns `Config` for zero workers and `Other` if the pool cannot be
    /// started.
    pub fn run_with_workers(&self, jobs: &[Job], workers: usize) -> Result<BatchReport> {
        if workers == 0 {
            return Err(Error::Config("Worker count must be at least 1".to_string()));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("regrid-worker-{i}"))
            .build()
            .map_err(|e| Error::Other(format!("Cannot start worker pool: {e}")))?;

        info!(jobs = jobs.len(), workers, "starting batch");
        let results: Vec<_> = pool.install(|| jobs.par_iter().map(|job| self.run_one(job)).collect());
        let report = BatchReport::from_results(results);
        info!(
            computed = report.computed().len(),
            skipped = report.skipped().len(),
            failed = report.failed().len(),
            "batch finished"
        );
        Ok(report)
    }

    /// Decide what each job would do, without producing anything.
    ///
    /// Runs the path resolver and the staleness oracle only; no dataset is
    /// opened and no file is written or removed.
    #[must_use]
    pub fn plan(&self, jobs: &[Job]) -> Vec<PlanEntry> {
        jobs.iter()
            .map(|job| {
                let (sink, action) = match self.plan_job(job) {
                    Err(e) => (None, failed_action(&e)),
                    Ok(plan) if plan.native => (
                        Some(plan.sink.path()),
                        PlannedAction::Skip {
                            reason: SkipReason::NativeGrid,
                        },
                    ),
                    Ok(plan) => {
                        let action = match self.oracle.decide(
                            &plan.source_paths(),
                            &plan.sink,
                            self.config.overwrite(),
                        ) {
                            Ok(Decision::Recompute(reason)) => reason.into(),
                            Ok(Decision::Skip) => PlannedAction::Skip {
                                reason: SkipReason::UpToDate,
                            },
                            Err(e) => failed_action(&e),
                        };
                        (Some(plan.sink.path()), action)
                    }
                };
                PlanEntry {
                    job_id: job.id(),
                    job: job.to_string(),
                    sink,
                    action,
                }
            })
            .collect()
    }

    fn run_one(&self, job: &Job) -> std::result::Result<JobOutcome, JobFailure> {
        let span = info_span!(
            "job",
            id = job.id(),
            dataset = %job.target().name(),
            grid = %job.grid(),
            period = %job.period_label()
        );
        let _guard = span.enter();

        match panic::catch_unwind(AssertUnwindSafe(|| self.execute(job))) {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                error!(kind = e.kind(), error = %e, job = %job, "job failed");
                Err(JobFailure::new(job, e.kind(), e.to_string()))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(job = %job, panic = %message, "job panicked");
                Err(JobFailure::new(job, "JobFailure", format!("panic: {message}")))
            }
        }
    }
}

fn failed_action(e: &Error) -> PlannedAction {
    PlannedAction::Fail {
        error_kind: e.kind().to_string(),
        reason: e.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    catalog: Arc<Catalog>,
    grids: Option<Arc<GridCache>>,
    io: Option<Arc<dyn DatasetIo>>,
    units: Option<Arc<dyn ProcessingUnitFactory>>,
    config: RunConfig,
}

impl SchedulerBuilder {
    /// Share an existing grid cache (default: one over the catalog's grid
    /// folder).
    #[must_use]
    pub fn grid_cache(mut self, grids: Arc<GridCache>) -> Self {
        self.grids = Some(grids);
        self
    }

    /// Dataset-I/O collaborator (default: [`JsonDatasetIo`]).
    #[must_use]
    pub fn dataset_io(mut self, io: Arc<dyn DatasetIo>) -> Self {
        self.io = Some(io);
        self
    }

    /// Processing-unit collaborator (default: [`PassThroughFactory`]).
    #[must_use]
    pub fn processing_units(mut self, units: Arc<dyn ProcessingUnitFactory>) -> Self {
        self.units = Some(units);
        self
    }

    /// Run configuration (default: [`RunConfig::default`]).
    #[must_use]
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the scheduler.
    #[must_use]
    pub fn build(self) -> Scheduler {
        let grids = self
            .grids
            .unwrap_or_else(|| Arc::new(GridCache::new(self.catalog.grid_folder())));
        Scheduler {
            oracle: StalenessOracle::new(self.config.staleness()),
            resolver: PathResolver::new(self.catalog),
            grids,
            io: self.io.unwrap_or_else(|| Arc::new(JsonDatasetIo)),
            units: self.units.unwrap_or_else(|| Arc::new(PassThroughFactory)),
            config: self.config,
        }
    }
}
