//! Dataset identities: model experiments, observational datasets, ensembles

use crate::grid::GridDefinition;
use crate::product::{Period, ProductKind};
use crate::{Error, Result};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A single model run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelExperiment {
    name: String,
    short_name: Option<String>,
    title: String,
    begin: NaiveDate,
    end: NaiveDate,
    native_grid: String,
    ensemble: Option<String>,
    avg_folder: PathBuf,
    diag_folder: PathBuf,
}

impl ModelExperiment {
    /// Create a builder with the required fields.
    #[must_use]
    pub fn builder(
        name: impl Into<String>,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> ModelExperimentBuilder {
        ModelExperimentBuilder::new(name, begin, end)
    }

    /// Experiment name (unique among experiments).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optional alias.
    #[must_use]
    pub fn short_name(&self) -> Option<&str> {
        self.short_name.as_deref()
    }

    /// Human-readable title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// First simulated day.
    #[must_use]
    pub const fn begin(&self) -> NaiveDate {
        self.begin
    }

    /// Day after the last simulated day.
    #[must_use]
    pub const fn end(&self) -> NaiveDate {
        self.end
    }

    /// Year of [`begin`](Self::begin).
    #[must_use]
    pub fn begin_year(&self) -> i32 {
        self.begin.year()
    }

    /// Year of [`end`](Self::end) (exclusive).
    #[must_use]
    pub fn end_year(&self) -> i32 {
        self.end.year()
    }

    /// Full simulated period.
    ///
    /// # Errors
    ///
    /// Returns `Config` if begin and end fall in the same year.
    pub fn full_period(&self) -> Result<Period> {
        Period::new(self.begin_year(), self.end_year())
    }

    /// Name of the native grid.
    #[must_use]
    pub fn native_grid(&self) -> &str {
        &self.native_grid
    }

    /// Key of the ensemble this run belongs to.
    #[must_use]
    pub fn ensemble(&self) -> Option<&str> {
        self.ensemble.as_deref()
    }

    /// Whether this record is the ensemble mean owning the ensemble folders.
    #[must_use]
    pub fn is_ensemble_mean(&self) -> bool {
        self.ensemble.is_none() || self.ensemble.as_deref() == Some(self.name.as_str())
    }

    /// Folder of aggregated means.
    #[must_use]
    pub fn avg_folder(&self) -> &Path {
        &self.avg_folder
    }

    /// Folder of diagnostic-package output.
    #[must_use]
    pub fn diag_folder(&self) -> &Path {
        &self.diag_folder
    }
}

/// Builder for [`ModelExperiment`].
#[derive(Debug)]
pub struct ModelExperimentBuilder {
    name: String,
    short_name: Option<String>,
    title: Option<String>,
    begin: NaiveDate,
    end: NaiveDate,
    native_grid: Option<String>,
    ensemble: Option<String>,
    avg_folder: Option<PathBuf>,
    diag_folder: Option<PathBuf>,
}

impl ModelExperimentBuilder {
    /// Create a builder with required fields.
    #[must_use]
    pub fn new(name: impl Into<String>, begin: NaiveDate, end: NaiveDate) -> Self {
        Self {
            name: name.into(),
            short_name: None,
            title: None,
            begin,
            end,
            native_grid: None,
            ensemble: None,
            avg_folder: None,
            diag_folder: None,
        }
    }

    /// Set the alias.
    #[must_use]
    pub fn short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = Some(short_name.into());
        self
    }

    /// Set the title (defaults to the name).
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the native grid name.
    #[must_use]
    pub fn native_grid(mut self, grid: impl Into<String>) -> Self {
        self.native_grid = Some(grid.into());
        self
    }

    /// Set the ensemble key.
    #[must_use]
    pub fn ensemble(mut self, key: impl Into<String>) -> Self {
        self.ensemble = Some(key.into());
        self
    }

    /// Set the aggregated-mean folder.
    #[must_use]
    pub fn avg_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.avg_folder = Some(folder.into());
        self
    }

    /// Set the diagnostic folder.
    #[must_use]
    pub fn diag_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.diag_folder = Some(folder.into());
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the name is empty, the native grid or a folder
    /// is missing, begin does not precede end or begin is not the first
    /// of a month.
    pub fn build(self) -> Result<ModelExperiment> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("Experiment without a name".to_string()));
        }
        if self.begin >= self.end {
            return Err(Error::Config(format!(
                "Experiment '{}': begin date {} must precede end date {}",
                self.name, self.begin, self.end
            )));
        }
        if self.begin.day() != 1 {
            return Err(Error::Config(format!(
                "Experiment '{}': begin date {} must be the first of a month",
                self.name, self.begin
            )));
        }
        let missing = |what: &str| {
            Error::Config(format!("Experiment '{}' has no {what}", self.name))
        };
        let native_grid = self.native_grid.clone().ok_or_else(|| missing("native grid"))?;
        let avg_folder = self.avg_folder.clone().ok_or_else(|| missing("average folder"))?;
        let diag_folder = self.diag_folder.clone().ok_or_else(|| missing("diagnostic folder"))?;
        Ok(ModelExperiment {
            title: self.title.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            short_name: self.short_name,
            begin: self.begin,
            end: self.end,
            native_grid,
            ensemble: self.ensemble,
            avg_folder,
            diag_folder,
        })
    }
}

/// Gridded observational dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationalDataset {
    name: String,
    prefix: String,
    title: String,
    folder: PathBuf,
    native_grid: String,
    resolutions: BTreeMap<ProductKind, Vec<String>>,
}

impl ObservationalDataset {
    /// Create an observational dataset record.
    pub fn new(
        name: impl Into<String>,
        prefix: impl Into<String>,
        title: impl Into<String>,
        folder: impl Into<PathBuf>,
        native_grid: impl Into<String>,
        resolutions: BTreeMap<ProductKind, Vec<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            title: title.into(),
            folder: folder.into(),
            native_grid: native_grid.into(),
            resolutions,
        }
    }

    /// Dataset name (unique among observational datasets).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File name prefix, e.g. `gpcc`.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Folder holding all derived files.
    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Native grid name.
    #[must_use]
    pub fn native_grid(&self) -> &str {
        &self.native_grid
    }

    /// Resolutions available for `kind` (empty if unsupported).
    #[must_use]
    pub fn resolutions(&self, kind: ProductKind) -> &[String] {
        self.resolutions.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// Whether any resolution exists for `kind`.
    #[must_use]
    pub fn supports(&self, kind: ProductKind) -> bool {
        !self.resolutions(kind).is_empty()
    }
}

/// A registered dataset, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetIdentity {
    /// Model run
    Experiment(Arc<ModelExperiment>),
    /// Observational dataset
    Observation(Arc<ObservationalDataset>),
}

impl DatasetIdentity {
    /// Registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Experiment(exp) => exp.name(),
            Self::Observation(obs) => obs.name(),
        }
    }

    /// Title.
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Experiment(exp) => exp.title(),
            Self::Observation(obs) => obs.title(),
        }
    }

    /// Native grid name.
    #[must_use]
    pub fn native_grid(&self) -> &str {
        match self {
            Self::Experiment(exp) => exp.native_grid(),
            Self::Observation(obs) => obs.native_grid(),
        }
    }

    /// Whether `grid` is this dataset's own grid.
    ///
    /// For observations the grid's resolution tag, when present, must also
    /// equal the dataset resolution being processed.
    #[must_use]
    pub fn is_native(&self, grid: &GridDefinition, resolution: Option<&str>) -> bool {
        if grid.name() != self.native_grid() {
            return false;
        }
        match self {
            Self::Experiment(_) => true,
            Self::Observation(_) => grid.resolution().is_none() || grid.resolution() == resolution,
        }
    }
}

impl fmt::Display for DatasetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered group of experiments sharing an ensemble key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ensemble {
    key: String,
    parent: Arc<ModelExperiment>,
    members: Vec<Arc<ModelExperiment>>,
}

impl Ensemble {
    pub(crate) fn new(
        key: String,
        parent: Arc<ModelExperiment>,
        members: Vec<Arc<ModelExperiment>>,
    ) -> Self {
        Self {
            key,
            parent,
            members,
        }
    }

    /// Ensemble key (the name of the ensemble-mean experiment).
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Ensemble-mean record owning the ensemble folders.
    #[must_use]
    pub const fn parent(&self) -> &Arc<ModelExperiment> {
        &self.parent
    }

    /// Members in catalog order (the parent itself is not a member).
    #[must_use]
    pub fn members(&self) -> &[Arc<ModelExperiment>] {
        &self.members
    }

    /// Native grid shared by all members.
    #[must_use]
    pub fn native_grid(&self) -> &str {
        self.members
            .first()
            .map_or(self.parent.native_grid(), |m| m.native_grid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn builder(name: &str) -> ModelExperimentBuilder {
        ModelExperiment::builder(name, date(1979, 1, 1), date(1995, 1, 1))
            .native_grid("cesm1x1")
            .avg_folder("/avg")
            .diag_folder("/diag")
    }

    #[test]
    fn test_builder_defaults_title() {
        let exp = builder("Ctrl-1").short_name("ctrl1").build().unwrap();
        assert_eq!(exp.title(), "Ctrl-1");
        assert_eq!(exp.short_name(), Some("ctrl1"));
        assert_eq!(exp.full_period().unwrap(), Period::new(1979, 1995).unwrap());
        assert!(exp.is_ensemble_mean());
    }

    #[test]
    fn test_builder_rejects_mid_month_begin() {
        let result = ModelExperiment::builder("x", date(1979, 1, 15), date(1995, 1, 1))
            .native_grid("g")
            .avg_folder("/a")
            .diag_folder("/d")
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_inverted_dates() {
        let result = ModelExperiment::builder("x", date(1995, 1, 1), date(1979, 1, 1))
            .native_grid("g")
            .avg_folder("/a")
            .diag_folder("/d")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_member_is_not_ensemble_mean() {
        let member = builder("Ctrl-2").ensemble("Ens").build().unwrap();
        assert!(!member.is_ensemble_mean());
        let mean = builder("Ens").ensemble("Ens").build().unwrap();
        assert!(mean.is_ensemble_mean());
    }

    #[test]
    fn test_observation_resolutions() {
        let mut resolutions = BTreeMap::new();
        resolutions.insert(ProductKind::Climatology, vec!["025".to_string(), "05".to_string()]);
        let obs = ObservationalDataset::new("GPCC", "gpcc", "GPCC", "/obs", "gpcc", resolutions);
        assert!(obs.supports(ProductKind::Climatology));
        assert!(!obs.supports(ProductKind::TimeSeries));
        assert!(obs.resolutions(ProductKind::Diagnostic).is_empty());
    }
}
