//! Jobs and batch expansion
//!
//! A [`BatchRequest`] names what to produce; [`build_jobs`] expands it into
//! the full cross-product of datasets, file types, grids and periods. Grid
//! definitions are loaded here, once per (grid, resolution), so a missing
//! definition aborts the batch before any job exists.

use crate::catalog::{AttributeTable, Catalog, DatasetIdentity, Ensemble};
use crate::ensemble::{EnsembleWindow, DEFAULT_ENSEMBLE_YEARS};
use crate::grid::GridCache;
use crate::product::{GridTarget, Period, PeriodRule, ProductKind};
use crate::resolver::DiagnosticMode;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a job processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTarget {
    /// Registered experiment or observational dataset
    Dataset(DatasetIdentity),
    /// Ensemble, concatenated from its members
    Ensemble(Ensemble),
    /// Unregistered dataset (needs an explicit folder)
    Name(String),
}

impl JobTarget {
    /// Dataset or ensemble name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Dataset(identity) => identity.name(),
            Self::Ensemble(ensemble) => ensemble.key(),
            Self::Name(name) => name,
        }
    }
}

/// Per-job options.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOptions {
    /// Model output stream
    pub filetype: Option<String>,
    /// Observational resolution
    pub resolution: Option<String>,
    /// Explicit source folder
    pub folder: Option<PathBuf>,
    /// Diagnostic folder mode
    pub diagnostic_mode: Option<DiagnosticMode>,
    /// Variables carried into the sink (`None` keeps all)
    pub variables: Option<Vec<String>>,
    /// Samples per ensemble member
    pub ensemble_window: EnsembleWindow,
    /// Mask ocean cells with the dataset's `landmask`
    pub apply_landmask: bool,
    /// Longitude shift handed to the processing unit
    pub shift_longitude: Option<f64>,
    /// Variable-attribute overrides
    pub overrides: AttributeTable,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            filetype: None,
            resolution: None,
            folder: None,
            diagnostic_mode: None,
            variables: None,
            ensemble_window: EnsembleWindow::default(),
            apply_landmask: false,
            shift_longitude: None,
            overrides: AttributeTable::new(),
        }
    }
}

/// One unit of work, owned by exactly one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    id: usize,
    target: JobTarget,
    kind: ProductKind,
    grid: GridTarget,
    period: Option<Period>,
    options: JobOptions,
}

impl Job {
    /// Start building a job.
    #[must_use]
    pub fn builder(target: JobTarget, kind: ProductKind) -> JobBuilder {
        JobBuilder {
            target,
            kind,
            grid: GridTarget::Native,
            period: None,
            options: JobOptions::default(),
        }
    }

    /// Position in the batch.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Target.
    #[must_use]
    pub const fn target(&self) -> &JobTarget {
        &self.target
    }

    /// Product kind.
    #[must_use]
    pub const fn kind(&self) -> ProductKind {
        self.kind
    }

    /// Spatial target.
    #[must_use]
    pub const fn grid(&self) -> &GridTarget {
        &self.grid
    }

    /// Requested period.
    #[must_use]
    pub const fn period(&self) -> Option<Period> {
        self.period
    }

    /// Options.
    #[must_use]
    pub const fn options(&self) -> &JobOptions {
        &self.options
    }

    /// Period as printed in logs and reports.
    #[must_use]
    pub fn period_label(&self) -> String {
        self.period.map_or_else(|| "-".to_string(), |p| p.to_string())
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} on {} ({})",
            self.id,
            self.target.name(),
            self.kind,
            self.grid,
            self.period_label()
        )?;
        if let Some(filetype) = &self.options.filetype {
            write!(f, " [{filetype}]")?;
        }
        if let Some(resolution) = &self.options.resolution {
            write!(f, " [res {resolution}]")?;
        }
        Ok(())
    }
}

/// Builder for [`Job`].
#[derive(Debug)]
pub struct JobBuilder {
    target: JobTarget,
    kind: ProductKind,
    grid: GridTarget,
    period: Option<Period>,
    options: JobOptions,
}

impl JobBuilder {
    /// Spatial target (default: native).
    #[must_use]
    pub fn grid(mut self, grid: GridTarget) -> Self {
        self.grid = grid;
        self
    }

    /// Period.
    #[must_use]
    pub const fn period(mut self, period: Option<Period>) -> Self {
        self.period = period;
        self
    }

    /// File type.
    #[must_use]
    pub fn filetype(mut self, filetype: impl Into<String>) -> Self {
        self.options.filetype = Some(filetype.into());
        self
    }

    /// Observational resolution.
    #[must_use]
    pub fn resolution(mut self, resolution: impl Into<String>) -> Self {
        self.options.resolution = Some(resolution.into());
        self
    }

    /// Explicit source folder.
    #[must_use]
    pub fn folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.options.folder = Some(folder.into());
        self
    }

    /// Diagnostic folder mode.
    #[must_use]
    pub const fn diagnostic_mode(mut self, mode: Option<DiagnosticMode>) -> Self {
        self.options.diagnostic_mode = mode;
        self
    }

    /// Restrict sink variables.
    #[must_use]
    pub fn variables(mut self, variables: Option<Vec<String>>) -> Self {
        self.options.variables = variables;
        self
    }

    /// Ensemble window.
    #[must_use]
    pub const fn ensemble_window(mut self, window: EnsembleWindow) -> Self {
        self.options.ensemble_window = window;
        self
    }

    /// Mask with the land mask.
    #[must_use]
    pub const fn apply_landmask(mut self, apply: bool) -> Self {
        self.options.apply_landmask = apply;
        self
    }

    /// Longitude shift.
    #[must_use]
    pub const fn shift_longitude(mut self, degrees: Option<f64>) -> Self {
        self.options.shift_longitude = degrees;
        self
    }

    /// Variable-attribute overrides.
    #[must_use]
    pub fn overrides(mut self, overrides: AttributeTable) -> Self {
        self.options.overrides = overrides;
        self
    }

    /// Finish with the job's position in the batch.
    #[must_use]
    pub fn build(self, id: usize) -> Job {
        Job {
            id,
            target: self.target,
            kind: self.kind,
            grid: self.grid,
            period: self.period,
            options: self.options,
        }
    }
}

/// Requested grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GridRequest {
    /// Each dataset's own grid
    Native,
    /// A cached grid, at each listed resolution (none: no resolution tag)
    Named {
        /// Grid name
        name: String,
        /// Resolution tags
        #[serde(default)]
        resolutions: Vec<String>,
    },
}

/// Serialized batch description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Product kind
    pub kind: ProductKind,
    /// Observational datasets (`None`: all that support the kind)
    #[serde(default)]
    pub datasets: Option<Vec<String>>,
    /// Experiments, or ensemble keys when `ensembles` is set (`None`: all)
    #[serde(default)]
    pub experiments: Option<Vec<String>>,
    /// Concatenate ensembles instead of processing single experiments
    #[serde(default)]
    pub ensembles: bool,
    /// Target grids
    #[serde(default = "default_grids")]
    pub grids: Vec<GridRequest>,
    /// Resolution overrides per observational dataset
    #[serde(default)]
    pub resolutions: BTreeMap<String, Vec<String>>,
    /// Periods (empty: a single "no period" entry)
    #[serde(default)]
    pub periods: Vec<Period>,
    /// File types (`None`: all that support the kind)
    #[serde(default)]
    pub filetypes: Option<Vec<String>>,
    /// Years per ensemble member
    #[serde(default = "default_ensemble_years")]
    pub ensemble_years: u32,
    /// Diagnostic folder mode
    #[serde(default)]
    pub diagnostic_mode: Option<DiagnosticMode>,
    /// Variables carried into the sinks
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    /// Mask observational sinks with their land mask
    #[serde(default)]
    pub apply_landmask: bool,
    /// Longitude shift for every job
    #[serde(default)]
    pub shift_longitude: Option<f64>,
}

fn default_grids() -> Vec<GridRequest> {
    vec![GridRequest::Native]
}

const fn default_ensemble_years() -> u32 {
    DEFAULT_ENSEMBLE_YEARS
}

impl BatchRequest {
    /// Minimal request for `kind`: everything applicable, native grid.
    #[must_use]
    pub fn new(kind: ProductKind) -> Self {
        Self {
            kind,
            datasets: None,
            experiments: None,
            ensembles: false,
            grids: default_grids(),
            resolutions: BTreeMap::new(),
            periods: Vec::new(),
            filetypes: None,
            ensemble_years: DEFAULT_ENSEMBLE_YEARS,
            diagnostic_mode: None,
            variables: None,
            apply_landmask: false,
            shift_longitude: None,
        }
    }

    /// Parse a JSON request.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` for malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn window(&self) -> EnsembleWindow {
        EnsembleWindow::years(self.ensemble_years as usize)
    }
}

/// Grid targets with the resolution tag they were loaded for.
fn load_grids(request: &BatchRequest, grids: &GridCache) -> Result<Vec<GridTarget>> {
    let mut targets = Vec::new();
    for grid in &request.grids {
        match grid {
            GridRequest::Native => targets.push(GridTarget::Native),
            GridRequest::Named { name, resolutions } if resolutions.is_empty() => {
                targets.push(GridTarget::Grid(grids.load(name, None)?));
            }
            GridRequest::Named { name, resolutions } => {
                for res in resolutions {
                    targets.push(GridTarget::Grid(grids.load(name, Some(res))?));
                }
            }
        }
    }
    if targets.is_empty() {
        return Err(Error::Config("No target grids requested".to_string()));
    }
    Ok(targets)
}

/// Expand `request` into jobs, numbered from 0.
///
/// # Errors
///
/// Raised before any job exists, so every error aborts the batch:
/// - `UnsupportedMode` for point products, or ensembles of a kind without
///   a time axis, or file types lacking a template for the kind
/// - `NotFound` for unknown datasets, file types or grid definitions
/// - `Config` for periods given to kinds that forbid them, for model
///   climatologies without periods, and for an empty ensemble window
pub fn build_jobs(request: &BatchRequest, catalog: &Catalog, grids: &GridCache) -> Result<Vec<Job>> {
    let kind = request.kind;
    if kind.is_point_product() {
        return Err(Error::UnsupportedMode(format!(
            "{kind} products cannot be scheduled in a batch"
        )));
    }
    if request.ensembles && !kind.supports_ensemble() {
        return Err(Error::UnsupportedMode(format!(
            "Ensembles of {kind} products cannot be concatenated"
        )));
    }
    if request.ensembles && request.ensemble_years == 0 {
        return Err(Error::Config(
            "Ensemble window must span at least one year".to_string(),
        ));
    }
    if kind.period_rule() == PeriodRule::Forbidden && !request.periods.is_empty() {
        return Err(Error::Config(format!(
            "{kind} products take no period (got {} periods)",
            request.periods.len()
        )));
    }

    let targets = load_grids(request, grids)?;
    let periods: Vec<Option<Period>> = if request.periods.is_empty() {
        vec![None]
    } else {
        request.periods.iter().copied().map(Some).collect()
    };

    let mut jobs = Vec::new();
    let mut push = |builder: JobBuilder| {
        let builder = builder
            .diagnostic_mode(request.diagnostic_mode)
            .variables(request.variables.clone())
            .shift_longitude(request.shift_longitude);
        jobs.push(builder.build(jobs.len()));
    };

    for obs in select_observations(request, catalog)? {
        let resolutions = request
            .resolutions
            .get(obs.name())
            .cloned()
            .unwrap_or_else(|| obs.resolutions(kind).to_vec());
        for res in resolutions {
            for grid in &targets {
                for period in &periods {
                    let identity = DatasetIdentity::Observation(Arc::clone(&obs));
                    push(
                        Job::builder(JobTarget::Dataset(identity), kind)
                            .grid(grid.clone())
                            .period(*period)
                            .resolution(res.clone())
                            .apply_landmask(request.apply_landmask),
                    );
                }
            }
        }
    }

    let filetypes = select_filetypes(request, catalog)?;
    if request.ensembles {
        for ensemble in select_ensembles(request, catalog)? {
            for ft in &filetypes {
                for grid in &targets {
                    for period in &periods {
                        push(
                            Job::builder(JobTarget::Ensemble(ensemble.clone()), kind)
                                .grid(grid.clone())
                                .period(*period)
                                .filetype(ft.clone())
                                .ensemble_window(request.window()),
                        );
                    }
                }
            }
        }
    } else if kind == ProductKind::Diagnostic {
        debug!("diagnostic products of single experiments are produced externally");
    } else {
        let experiments = select_experiments(request, catalog)?;
        if kind == ProductKind::Climatology && request.periods.is_empty() && !experiments.is_empty() {
            return Err(Error::Config(
                "Climatologies of model experiments need at least one period".to_string(),
            ));
        }
        for exp in experiments {
            for ft in &filetypes {
                for grid in &targets {
                    for period in &periods {
                        push(
                            Job::builder(JobTarget::Dataset(DatasetIdentity::Experiment(Arc::clone(&exp))), kind)
                                .grid(grid.clone())
                                .period(*period)
                                .filetype(ft.clone()),
                        );
                    }
                }
            }
        }
    }

    info!(kind = %kind, jobs = jobs.len(), grids = targets.len(), "batch expanded");
    Ok(jobs)
}

fn select_observations(
    request: &BatchRequest,
    catalog: &Catalog,
) -> Result<Vec<Arc<crate::catalog::ObservationalDataset>>> {
    let kind = request.kind;
    if kind == ProductKind::Diagnostic {
        return Ok(Vec::new());
    }
    let Some(names) = &request.datasets else {
        return Ok(catalog
            .observations()
            .iter()
            .filter(|obs| obs.supports(kind) || request.resolutions.contains_key(obs.name()))
            .cloned()
            .collect());
    };
    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        let obs = catalog.observation(name).ok_or_else(|| {
            Error::NotFound(format!("Observational dataset '{name}' is not registered"))
        })?;
        if obs.supports(kind) || request.resolutions.contains_key(name) {
            selected.push(obs);
        } else {
            warn!(dataset = %name, kind = %kind, "dataset has no resolutions for this kind, skipped");
        }
    }
    Ok(selected)
}

fn select_experiments(
    request: &BatchRequest,
    catalog: &Catalog,
) -> Result<Vec<Arc<crate::catalog::ModelExperiment>>> {
    let Some(names) = &request.experiments else {
        return Ok(catalog.experiments().to_vec());
    };
    names
        .iter()
        .map(|name| {
            catalog
                .experiment(name)
                .ok_or_else(|| Error::NotFound(format!("Experiment '{name}' is not registered")))
        })
        .collect()
}

fn select_ensembles(request: &BatchRequest, catalog: &Catalog) -> Result<Vec<Ensemble>> {
    let Some(keys) = &request.experiments else {
        return Ok(catalog.ensembles().to_vec());
    };
    keys.iter()
        .map(|key| {
            catalog
                .ensemble(key)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("Ensemble '{key}' is not registered")))
        })
        .collect()
}

fn select_filetypes(request: &BatchRequest, catalog: &Catalog) -> Result<Vec<String>> {
    let kind = request.kind;
    let Some(names) = &request.filetypes else {
        return Ok(catalog
            .filetypes()
            .iter()
            .filter(|ft| ft.supports(kind))
            .map(|ft| ft.name().to_string())
            .collect());
    };
    for name in names {
        if !catalog.filetype(name)?.supports(kind) {
            return Err(Error::UnsupportedMode(format!(
                "File type '{name}' has no {kind} template"
            )));
        }
    }
    Ok(names.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridDefinition, GridShape, Projection};
    use tempfile::TempDir;

    const CATALOG: &str = r#"{
        "avg_root": "/data/avg",
        "diag_root": "/data/diag",
        "grid_folder": "/data/grids",
        "model_prefix": "cesm",
        "filetypes": [
            {"name": "atm", "families": ["climatology", "time_series"]},
            {"name": "lnd", "families": ["climatology", "time_series"]},
            {"name": "cvdp", "families": ["diagnostic"]}
        ],
        "experiments": [
            {"name": "Ens", "begin": "1979-01-01", "end": "1995-01-01", "grid": "cesm1x1", "ensemble": "Ens"},
            {"name": "Ctrl-1", "begin": "1979-01-01", "end": "1995-01-01", "grid": "cesm1x1", "ensemble": "Ens"},
            {"name": "Ctrl-A", "begin": "1980-01-01", "end": "1995-01-01", "grid": "cesm1x1", "ensemble": "Ens"}
        ],
        "observations": [
            {"name": "GPCC", "resolutions": {"climatology": ["025", "05"], "time_series": ["05"]}},
            {"name": "CRU", "resolutions": {"time_series": ["05"]}}
        ]
    }"#;

    fn setup() -> (TempDir, Catalog, GridCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = GridCache::new(dir.path());
        for res in ["d01", "d02"] {
            cache
                .store(
                    GridDefinition::new(
                        "arb2",
                        Some(res.to_string()),
                        Projection::Geographic,
                        [0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
                        GridShape { ny: 2, nx: 2 },
                    )
                    .unwrap(),
                )
                .unwrap();
        }
        (dir, Catalog::from_json_str(CATALOG).unwrap(), cache)
    }

    #[test]
    fn test_time_series_cross_product() {
        let (_dir, catalog, cache) = setup();
        let mut request = BatchRequest::new(ProductKind::TimeSeries);
        request.grids = vec![
            GridRequest::Native,
            GridRequest::Named {
                name: "arb2".into(),
                resolutions: vec!["d01".into(), "d02".into()],
            },
        ];
        let jobs = build_jobs(&request, &catalog, &cache).unwrap();
        // obs: GPCC(1 res) + CRU(1 res) = 2, times 3 grids = 6
        // exps: 3 experiments x 2 file types x 3 grids = 18
        assert_eq!(jobs.len(), 24);
        let ids: Vec<usize> = jobs.iter().map(Job::id).collect();
        assert_eq!(ids, (0..24).collect::<Vec<_>>());
        assert!(jobs.iter().all(|j| j.period().is_none()));
    }

    #[test]
    fn test_climatology_needs_periods_for_experiments() {
        let (_dir, catalog, cache) = setup();
        let request = BatchRequest::new(ProductKind::Climatology);
        assert!(matches!(
            build_jobs(&request, &catalog, &cache),
            Err(Error::Config(_))
        ));

        let mut obs_only = BatchRequest::new(ProductKind::Climatology);
        obs_only.experiments = Some(Vec::new());
        let jobs = build_jobs(&obs_only, &catalog, &cache).unwrap();
        // GPCC at two resolutions, CRU has no climatology
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].options().resolution.as_deref(), Some("05"));
    }

    #[test]
    fn test_periods_forbidden_for_time_series() {
        let (_dir, catalog, cache) = setup();
        let mut request = BatchRequest::new(ProductKind::TimeSeries);
        request.periods = vec![Period::new(1979, 1994).unwrap()];
        assert!(matches!(
            build_jobs(&request, &catalog, &cache),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_grid_aborts_batch() {
        let (_dir, catalog, cache) = setup();
        let mut request = BatchRequest::new(ProductKind::TimeSeries);
        request.grids = vec![GridRequest::Named {
            name: "arb3".into(),
            resolutions: Vec::new(),
        }];
        let err = build_jobs(&request, &catalog, &cache).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(err.is_batch_fatal());
    }

    #[test]
    fn test_ensemble_jobs() {
        let (_dir, catalog, cache) = setup();
        let mut request = BatchRequest::new(ProductKind::Diagnostic);
        request.ensembles = true;
        request.ensemble_years = 10;
        let jobs = build_jobs(&request, &catalog, &cache).unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(matches!(jobs[0].target(), JobTarget::Ensemble(e) if e.key() == "Ens"));
        assert_eq!(jobs[0].options().filetype.as_deref(), Some("cvdp"));
        assert_eq!(jobs[0].options().ensemble_window, EnsembleWindow::years(10));

        let mut clim = BatchRequest::new(ProductKind::Climatology);
        clim.ensembles = true;
        assert!(matches!(
            build_jobs(&clim, &catalog, &cache),
            Err(Error::UnsupportedMode(_))
        ));
    }

    #[test]
    fn test_empty_ensemble_window_aborts_batch() {
        let (_dir, catalog, cache) = setup();
        let mut request = BatchRequest::new(ProductKind::TimeSeries);
        request.ensembles = true;
        request.ensemble_years = 0;
        let err = build_jobs(&request, &catalog, &cache).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.is_batch_fatal());

        // Without ensembles the window is irrelevant.
        request.ensembles = false;
        assert!(build_jobs(&request, &catalog, &cache).is_ok());
    }

    #[test]
    fn test_point_products_and_unknown_names() {
        let (_dir, catalog, cache) = setup();
        assert!(matches!(
            build_jobs(&BatchRequest::new(ProductKind::StationSeries), &catalog, &cache),
            Err(Error::UnsupportedMode(_))
        ));

        let mut request = BatchRequest::new(ProductKind::TimeSeries);
        request.experiments = Some(vec!["Nope".into()]);
        assert!(matches!(
            build_jobs(&request, &catalog, &cache),
            Err(Error::NotFound(_))
        ));

        let mut request = BatchRequest::new(ProductKind::TimeSeries);
        request.filetypes = Some(vec!["cvdp".into()]);
        assert!(matches!(
            build_jobs(&request, &catalog, &cache),
            Err(Error::UnsupportedMode(_))
        ));
    }

    #[test]
    fn test_request_from_json_defaults() {
        let request = BatchRequest::from_json_str(
            r#"{"kind": "climatology", "periods": ["1979-1994"],
                "grids": [{"type": "named", "name": "arb2", "resolutions": ["d02"]}]}"#,
        )
        .unwrap();
        assert_eq!(request.ensemble_years, 15);
        assert!(!request.ensembles);
        assert_eq!(request.periods, vec![Period::new(1979, 1994).unwrap()]);
        assert_eq!(request.grids.len(), 1);
    }
}
