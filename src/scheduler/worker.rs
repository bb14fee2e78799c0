//! Job execution: plan, decide, produce, publish
//!
//! ```text
//! plan ──> native grid? ──yes──> Skipped(NativeGrid)
//!   │
//!   └──> staleness ──skip──> Skipped(UpToDate)
//!          │
//!          └──> begin sink ──> produce ──> close ──> commit ──> Computed
//! ```
//!
//! Every dataset handle opened here is closed before the function that
//! opened it returns, on success and on error.

use super::job::{Job, JobTarget};
use super::report::{JobOutcome, SkipReason};
use super::Scheduler;
use crate::artifact::{ArtifactFile, PendingArtifact};
use crate::catalog::{DatasetIdentity, Ensemble, FileType, ResolvedAttributes};
use crate::dataset::{copy_dataset, Attributes, Dataset, MemoryDataset, OpenSpec, Variable};
use crate::ensemble::{AxisUnit, EnsembleConcatenator, EnsembleMember};
use crate::grid::GridDefinition;
use crate::product::{GridTarget, Period, ProductKind};
use crate::resolver::{DatasetRef, DiagnosticMode, FileNameSpec, NameStem};
use crate::staleness::Decision;
use crate::{Error, Result};
use chrono::NaiveDate;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name of the land-mask variable.
pub const LANDMASK: &str = "landmask";

/// Days per month of a climatological year (February averaged over leap
/// years).
pub const DAYS_PER_MONTH: [f64; 12] = [
    31.0, 28.25, 31.0, 30.0, 31.0, 30.0, 31.0, 31.0, 30.0, 31.0, 30.0, 31.0,
];

/// Cooperative deadline of one job.
#[derive(Debug, Clone, Copy)]
pub struct JobContext {
    started: Instant,
    deadline: Option<Duration>,
}

impl JobContext {
    /// Start the clock.
    #[must_use]
    pub fn start(deadline: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            deadline,
        }
    }

    /// Time since the job started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fail once the deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns `DeadlineExceeded` after the deadline.
    pub fn check(&self) -> Result<()> {
        let Some(deadline) = self.deadline else {
            return Ok(());
        };
        let elapsed = self.elapsed();
        if elapsed > deadline {
            return Err(Error::DeadlineExceeded { elapsed, deadline });
        }
        Ok(())
    }
}

/// Files read for one ensemble member (or the single dataset).
#[derive(Debug, Clone)]
struct SourceSet {
    member: String,
    begin: Option<NaiveDate>,
    open: OpenSpec,
}

/// Everything a job needs, resolved before any file is touched.
#[derive(Debug)]
pub(super) struct JobPlan {
    name: String,
    grid_label: String,
    period: Option<Period>,
    pub(super) sink: ArtifactFile,
    sources: Vec<SourceSet>,
    regrid: Option<Arc<GridDefinition>>,
    pub(super) native: bool,
    concatenator: Option<EnsembleConcatenator>,
}

impl JobPlan {
    pub(super) fn source_paths(&self) -> Vec<PathBuf> {
        self.sources.iter().flat_map(|s| s.open.paths()).collect()
    }
}

impl Scheduler {
    /// Run one job to completion.
    pub(super) fn execute(&self, job: &Job) -> Result<JobOutcome> {
        let ctx = JobContext::start(self.config.job_timeout());
        let plan = self.plan_job(job)?;
        if plan.native {
            info!(sink = %plan.sink, "target is the native grid, nothing to regrid");
            return Ok(JobOutcome::Skipped {
                sink: plan.sink,
                reason: SkipReason::NativeGrid,
            });
        }

        ctx.check()?;
        let decision = self
            .oracle
            .decide(&plan.source_paths(), &plan.sink, self.config.overwrite())?;
        let Decision::Recompute(reason) = decision else {
            info!(sink = %plan.sink, "sink up to date");
            return Ok(JobOutcome::Skipped {
                sink: plan.sink,
                reason: SkipReason::UpToDate,
            });
        };

        info!(sink = %plan.sink, reason = %reason, "computing sink");
        let pending = PendingArtifact::begin(plan.sink.clone(), self.config.replacement())?;
        self.produce(job, &plan, pending.write_path(), &ctx)?;
        ctx.check()?;
        let sink = pending.commit()?;
        info!(sink = %sink, elapsed = ?ctx.elapsed(), "sink written");
        Ok(JobOutcome::Computed { sink })
    }

    pub(super) fn plan_job(&self, job: &Job) -> Result<JobPlan> {
        match job.target() {
            JobTarget::Dataset(identity) => {
                self.plan_dataset(job, &DatasetRef::Identity(identity.clone()))
            }
            JobTarget::Name(name) => self.plan_dataset(job, &DatasetRef::Name(name.clone())),
            JobTarget::Ensemble(ensemble) => self.plan_ensemble(job, ensemble),
        }
    }

    fn checked_filetype(&self, job: &Job) -> Result<Option<&FileType>> {
        let Some(name) = job.options().filetype.as_deref() else {
            return Ok(None);
        };
        let filetype = self.resolver.catalog().filetype(name)?;
        if !filetype.supports(job.kind()) {
            return Err(Error::UnsupportedMode(format!(
                "File type '{name}' has no {} template",
                job.kind()
            )));
        }
        Ok(Some(filetype))
    }

    fn open_spec(
        &self,
        job: &Job,
        filetype: Option<&FileType>,
        folder: PathBuf,
        file: String,
    ) -> OpenSpec {
        let catalog = self.resolver.catalog();
        let builder = ResolvedAttributes::builder()
            .global(catalog.global_attributes())
            .overrides(&job.options().overrides);
        let attributes = match filetype {
            Some(ft) => builder.filetype(ft.attributes()).build(),
            None => builder.build(),
        };
        OpenSpec {
            folder,
            files: vec![file],
            variables: job.options().variables.clone(),
            attributes,
            format: self.config.format(),
        }
    }

    fn sink_artifact(&self, folder: PathBuf, file_name: &str) -> ArtifactFile {
        ArtifactFile::new(folder, format!("{}{file_name}", self.config.sink_prefix()))
    }

    fn plan_dataset(&self, job: &Job, dataset: &DatasetRef) -> Result<JobPlan> {
        let kind = job.kind();
        let options = job.options();
        let resolution = self.resolver.resolve(
            dataset,
            kind,
            options.folder.as_deref(),
            options.diagnostic_mode,
        )?;
        let identity = resolution.identity.as_ref();
        let filetype = self.checked_filetype(job)?;
        let tag = self
            .resolver
            .grid_tag(kind, identity, job.grid(), options.resolution.as_deref())?;
        let period = self.resolver.effective_period(kind, identity, job.period())?;

        let stem = match (identity, options.filetype.as_deref()) {
            (Some(DatasetIdentity::Observation(obs)), _) => NameStem::Observation {
                prefix: obs.prefix(),
                resolution: options.resolution.as_deref(),
            },
            (_, Some(filetype)) => NameStem::Model {
                name: &resolution.name,
                filetype,
            },
            (Some(DatasetIdentity::Experiment(exp)), None) => {
                return Err(Error::Config(format!(
                    "Experiment '{}' needs a file type",
                    exp.name()
                )))
            }
            (None, None) => NameStem::Observation {
                prefix: &resolution.name,
                resolution: options.resolution.as_deref(),
            },
        };
        let mut names = FileNameSpec {
            kind,
            stem,
            grid_tag: "",
            period,
            concatenated: false,
        };
        let source_file = self.resolver.file_name(&names)?;
        names.grid_tag = &tag.tag;
        let sink_file = self.resolver.file_name(&names)?;

        let regrid = match job.grid() {
            GridTarget::Grid(grid) if tag.regrid => Some(Arc::clone(grid)),
            _ => None,
        };
        let grid_label = match (job.grid(), identity) {
            (GridTarget::Native, Some(identity)) => identity.native_grid().to_string(),
            (grid, _) => grid.label(),
        };
        debug!(source = %source_file, sink = %sink_file, regrid = tag.regrid, "planned dataset job");
        Ok(JobPlan {
            name: resolution.name.clone(),
            grid_label,
            period,
            sink: self.sink_artifact(resolution.folder.clone(), &sink_file),
            sources: vec![SourceSet {
                member: resolution.name.clone(),
                begin: None,
                open: self.open_spec(job, filetype, resolution.folder, source_file),
            }],
            regrid,
            native: tag.tag.is_empty(),
            concatenator: None,
        })
    }

    fn plan_ensemble(&self, job: &Job, ensemble: &Ensemble) -> Result<JobPlan> {
        let kind = job.kind();
        if !kind.supports_ensemble() {
            return Err(Error::UnsupportedMode(format!(
                "Ensembles of {kind} products cannot be concatenated"
            )));
        }
        let options = job.options();
        let filetype = self.checked_filetype(job)?.ok_or_else(|| {
            Error::Config(format!("Ensemble '{}' needs a file type", ensemble.key()))
        })?;
        let parent = DatasetIdentity::Experiment(Arc::clone(ensemble.parent()));
        let tag = self.resolver.grid_tag(kind, Some(&parent), job.grid(), None)?;
        let window = options.ensemble_window;
        let diagnostic = kind == ProductKind::Diagnostic;

        let member_period = |begin_year: i32| -> Result<Option<Period>> {
            if !diagnostic {
                return Ok(None);
            }
            let years = u32::try_from(window.len_for(AxisUnit::Year)?)
                .map_err(|_| Error::Config("Ensemble window is too long".to_string()))?;
            Period::from_length(begin_year, years).map(Some)
        };

        let sink_mode = diagnostic.then(|| options.diagnostic_mode.unwrap_or(DiagnosticMode::Ensemble));
        let sink_folder = self
            .resolver
            .resolve(
                &DatasetRef::Identity(parent.clone()),
                kind,
                options.folder.as_deref(),
                sink_mode,
            )?
            .folder;
        let period = match job.period() {
            Some(period) if diagnostic => Some(period),
            Some(period) => {
                return Err(Error::Config(format!(
                    "{kind} products take no period (got {period})"
                )))
            }
            None => member_period(ensemble.parent().begin_year())?,
        };
        let sink_file = self.resolver.file_name(&FileNameSpec {
            kind,
            stem: NameStem::Model {
                name: ensemble.key(),
                filetype: filetype.name(),
            },
            grid_tag: &tag.tag,
            period,
            concatenated: true,
        })?;

        let member_mode = diagnostic.then_some(DiagnosticMode::Ensemble);
        let mut sources = Vec::with_capacity(ensemble.members().len());
        for member in ensemble.members() {
            let identity = DatasetIdentity::Experiment(Arc::clone(member));
            let folder = self
                .resolver
                .resolve(&DatasetRef::Identity(identity), kind, None, member_mode)?
                .folder;
            let file = self.resolver.file_name(&FileNameSpec {
                kind,
                stem: NameStem::Model {
                    name: member.name(),
                    filetype: filetype.name(),
                },
                grid_tag: "",
                period: member_period(member.begin_year())?,
                concatenated: false,
            })?;
            sources.push(SourceSet {
                member: member.name().to_string(),
                begin: Some(member.begin()),
                open: self.open_spec(job, Some(filetype), folder, file),
            });
        }

        let concatenator = if diagnostic {
            EnsembleConcatenator::diagnostic(window)
        } else {
            EnsembleConcatenator::time_series(window)
        }
        .with_epoch_year(self.config.epoch_year());

        let regrid = match job.grid() {
            GridTarget::Grid(grid) if tag.regrid => Some(Arc::clone(grid)),
            _ => None,
        };
        let grid_label = match job.grid() {
            GridTarget::Native => ensemble.native_grid().to_string(),
            grid => grid.label(),
        };
        debug!(ensemble = ensemble.key(), members = sources.len(), sink = %sink_file, "planned ensemble job");
        Ok(JobPlan {
            name: ensemble.key().to_string(),
            grid_label,
            period,
            sink: self.sink_artifact(sink_folder, &sink_file),
            sources,
            regrid,
            native: false,
            concatenator: Some(concatenator),
        })
    }

    fn sink_attributes(&self, job: &Job, plan: &JobPlan) -> Attributes {
        let description = match job.kind() {
            ProductKind::Climatology => "Climatology",
            ProductKind::Diagnostic => "Diagnostics",
            ProductKind::TimeSeries | ProductKind::StationSeries | ProductKind::ShapeSeries => {
                "Time-Series"
            }
        };
        let mut atts = Attributes::new();
        atts.insert("name".to_string(), Value::String(plan.name.clone()));
        atts.insert(
            "period".to_string(),
            Value::String(plan.period.map(|p| p.to_string()).unwrap_or_default()),
        );
        atts.insert("grid".to_string(), Value::String(plan.grid_label.clone()));
        atts.insert(
            "title".to_string(),
            Value::String(format!(
                "{} {description} on {} Grid",
                plan.name, plan.grid_label
            )),
        );
        atts
    }

    fn produce(&self, job: &Job, plan: &JobPlan, write_path: &Path, ctx: &JobContext) -> Result<()> {
        let mut sink = self
            .io
            .create(write_path, self.sink_attributes(job, plan), self.config.format())?;
        let result = match &plan.concatenator {
            None => self.produce_dataset(job, plan, sink.as_mut(), ctx),
            Some(concatenator) => self.produce_ensemble(job, plan, concatenator, sink.as_mut(), ctx),
        }
        .and_then(|()| finish_sink(job, sink.as_mut()));
        let closed = sink.close();
        result.and(closed)
    }

    fn produce_dataset(
        &self,
        job: &Job,
        plan: &JobPlan,
        sink: &mut dyn Dataset,
        ctx: &JobContext,
    ) -> Result<()> {
        let source_set = plan
            .sources
            .first()
            .ok_or_else(|| Error::Other(format!("No source for '{}'", plan.name)))?;
        let source = self.io.open(&source_set.open)?;
        let result = self.transform(job, plan, source.as_ref(), sink, ctx);
        let closed = source.close();
        result.and(closed)
    }

    fn produce_ensemble(
        &self,
        job: &Job,
        plan: &JobPlan,
        concatenator: &EnsembleConcatenator,
        sink: &mut dyn Dataset,
        ctx: &JobContext,
    ) -> Result<()> {
        let mut members = Vec::with_capacity(plan.sources.len());
        let loaded = plan.sources.iter().try_for_each(|source| -> Result<()> {
            ctx.check()?;
            members.push(self.load_member(job, plan, source, ctx)?);
            Ok(())
        });
        if let Err(e) = loaded {
            for member in members {
                if let Err(close) = member.dataset.close() {
                    warn!(member = %member.name, error = %close, "could not close member");
                }
            }
            return Err(e);
        }

        let joined = concatenator.concatenate_checked(&plan.name, members, || ctx.check())?;
        copy_dataset(&joined, sink, job.options().variables.as_deref())?;
        sink.sync()
    }

    /// Open one member, regridded in memory when the target is not native.
    fn load_member(
        &self,
        job: &Job,
        plan: &JobPlan,
        source: &SourceSet,
        ctx: &JobContext,
    ) -> Result<EnsembleMember> {
        let begin = source.begin.ok_or_else(|| {
            Error::Other(format!("Member '{}' has no begin date", source.member))
        })?;
        let dataset = self.io.open(&source.open)?;
        if plan.regrid.is_none() && job.options().shift_longitude.is_none() {
            return Ok(EnsembleMember {
                name: source.member.clone(),
                begin,
                dataset,
            });
        }
        let mut transformed = MemoryDataset::new(source.member.clone());
        let result = self.transform(job, plan, dataset.as_ref(), &mut transformed, ctx);
        let closed = dataset.close();
        result.and(closed)?;
        Ok(EnsembleMember {
            name: source.member.clone(),
            begin,
            dataset: Box::new(transformed),
        })
    }

    fn transform(
        &self,
        job: &Job,
        plan: &JobPlan,
        source: &dyn Dataset,
        sink: &mut dyn Dataset,
        ctx: &JobContext,
    ) -> Result<()> {
        let mut unit = self
            .units
            .construct(source, sink, job.options().variables.as_deref())?;
        if let Some(grid) = &plan.regrid {
            ctx.check()?;
            debug!(grid = %grid.tag_name(), "regridding");
            unit.regrid(grid)?;
        }
        if let Some(degrees) = job.options().shift_longitude {
            unit.shift_longitude(degrees)?;
        }
        ctx.check()?;
        unit.sync(true)
    }
}

/// Post-processing shared by every sink.
fn finish_sink(job: &Job, sink: &mut dyn Dataset) -> Result<()> {
    if job.options().apply_landmask {
        match sink.variable(LANDMASK).cloned() {
            // Observations cover land only: mask where the land mask is zero.
            Some(mask) => sink.mask(&mask, true, &[])?,
            None => warn!(dataset = %sink.name(), "no land mask in sink, not masked"),
        }
    }
    let monthly = sink.axis("time").is_some_and(|time| time.len() == 12);
    if job.kind() == ProductKind::Climatology && monthly && !sink.has_variable("length_of_month") {
        sink.add_variable(
            Variable::new(
                "length_of_month",
                "days",
                vec!["time".to_string()],
                DAYS_PER_MONTH.to_vec(),
            ),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_without_deadline_never_fails() {
        let ctx = JobContext::start(None);
        assert!(ctx.check().is_ok());
    }

    #[test]
    fn test_context_deadline() {
        let ctx = JobContext::start(Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(ctx.check(), Err(Error::DeadlineExceeded { .. })));
    }

    #[test]
    fn test_days_per_month_sum() {
        let total: f64 = DAYS_PER_MONTH.iter().sum();
        assert!((total - 365.25).abs() < 1e-9);
    }
}
