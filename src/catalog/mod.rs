//! Immutable dataset catalog
//!
//! The catalog is built once at process start from a [`CatalogSpec`]
//! (usually a JSON document) and passed explicitly, as `Arc<Catalog>`, to
//! the path resolver and the scheduler. It is never mutated afterwards.
//!
//! ## Layout on disk
//!
//! ```text
//! avg_root/<experiment>/      aggregated means (climatologies, time series)
//! diag_root/<experiment>/     diagnostic-package output
//! diag_root/grand-ensemble/   diagnostics shared across ensembles
//! grid_folder/                griddef_<name>[_<res>].json
//! ```

mod attributes;
mod filetype;
mod identity;

pub use attributes::{AttributeTable, ResolvedAttributes, ResolvedAttributesBuilder, VarAtts};
pub use filetype::FileType;
pub use identity::{
    DatasetIdentity, Ensemble, ModelExperiment, ModelExperimentBuilder, ObservationalDataset,
};

use crate::product::{ProductKind, TemplateFamily};
use crate::{Error, Result};
use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Folder name shared by all grand-ensemble diagnostics.
pub const GRAND_ENSEMBLE_FOLDER: &str = "grand-ensemble";

/// Serialized catalog description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSpec {
    /// Root of aggregated-mean folders
    pub avg_root: PathBuf,
    /// Root of diagnostic-package folders
    pub diag_root: PathBuf,
    /// Folder of grid-definition cache files
    pub grid_folder: PathBuf,
    /// File name prefix of model output, e.g. `cesm`
    #[serde(default)]
    pub model_prefix: String,
    /// Global variable-attribute defaults (axes and common variables)
    #[serde(default)]
    pub global_attributes: AttributeTable,
    /// Output streams of model runs
    #[serde(default)]
    pub filetypes: Vec<FileTypeSpec>,
    /// Model runs, in catalog order
    #[serde(default)]
    pub experiments: Vec<ExperimentSpec>,
    /// Observational datasets
    #[serde(default)]
    pub observations: Vec<ObservationSpec>,
}

/// Serialized file type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTypeSpec {
    /// Stream name
    pub name: String,
    /// Template families available
    pub families: BTreeSet<TemplateFamily>,
    /// Variable attributes
    #[serde(default)]
    pub attributes: AttributeTable,
}

/// Serialized model run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSpec {
    /// Unique name
    pub name: String,
    /// Alias
    #[serde(default)]
    pub short_name: Option<String>,
    /// Title (defaults to the name)
    #[serde(default)]
    pub title: Option<String>,
    /// First simulated day (first of a month)
    pub begin: NaiveDate,
    /// Day after the last simulated day
    pub end: NaiveDate,
    /// Native grid name
    pub grid: String,
    /// Ensemble key
    #[serde(default)]
    pub ensemble: Option<String>,
    /// Aggregated-mean folder (defaults to `avg_root/<name>`)
    #[serde(default)]
    pub avg_folder: Option<PathBuf>,
    /// Diagnostic folder (defaults to `diag_root/<name>`)
    #[serde(default)]
    pub diag_folder: Option<PathBuf>,
}

/// Serialized observational dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationSpec {
    /// Unique name
    pub name: String,
    /// File prefix (defaults to the lower-case name)
    #[serde(default)]
    pub prefix: Option<String>,
    /// Title (defaults to the name)
    #[serde(default)]
    pub title: Option<String>,
    /// Folder (defaults to `avg_root/<name>`)
    #[serde(default)]
    pub folder: Option<PathBuf>,
    /// Native grid name (defaults to the lower-case name)
    #[serde(default)]
    pub grid: Option<String>,
    /// Available resolutions per product kind
    #[serde(default)]
    pub resolutions: BTreeMap<ProductKind, Vec<String>>,
}

/// Immutable registry of datasets, ensembles and file types.
#[derive(Debug, Clone)]
pub struct Catalog {
    avg_root: PathBuf,
    diag_root: PathBuf,
    grid_folder: PathBuf,
    model_prefix: String,
    global_attributes: AttributeTable,
    filetypes: Vec<FileType>,
    experiments: Vec<Arc<ModelExperiment>>,
    observations: Vec<Arc<ObservationalDataset>>,
    ensembles: Vec<Ensemble>,
    experiment_index: FxHashMap<String, usize>,
    observation_index: FxHashMap<String, usize>,
    ensemble_index: FxHashMap<String, usize>,
}

impl Catalog {
    /// Build and validate a catalog.
    ///
    /// # Errors
    ///
    /// Returns `Config` on duplicate names, colliding aliases, invalid
    /// dates, unregistered ensemble keys, ensembles mixing native grids or
    /// observational datasets claiming diagnostic products.
    pub fn from_spec(spec: CatalogSpec) -> Result<Self> {
        let mut filetypes = Vec::with_capacity(spec.filetypes.len());
        for ft in spec.filetypes {
            if filetypes.iter().any(|f: &FileType| f.name() == ft.name) {
                return Err(Error::Config(format!("Duplicate file type '{}'", ft.name)));
            }
            filetypes.push(FileType::new(ft.name, ft.families).with_attributes(ft.attributes));
        }

        let mut experiments = Vec::with_capacity(spec.experiments.len());
        let mut experiment_index = FxHashMap::default();
        for exp in spec.experiments {
            let mut builder = ModelExperiment::builder(&exp.name, exp.begin, exp.end)
                .native_grid(exp.grid)
                .avg_folder(exp.avg_folder.unwrap_or_else(|| spec.avg_root.join(&exp.name)))
                .diag_folder(exp.diag_folder.unwrap_or_else(|| spec.diag_root.join(&exp.name)));
            if let Some(short_name) = exp.short_name {
                builder = builder.short_name(short_name);
            }
            if let Some(title) = exp.title {
                builder = builder.title(title);
            }
            if let Some(ensemble) = exp.ensemble {
                builder = builder.ensemble(ensemble);
            }
            let exp = builder.build()?;

            let idx = experiments.len();
            for alias in std::iter::once(exp.name()).chain(exp.short_name()) {
                if experiment_index.insert(alias.to_string(), idx).is_some() {
                    return Err(Error::Config(format!(
                        "Experiment name or alias '{alias}' is registered twice"
                    )));
                }
            }
            experiments.push(Arc::new(exp));
        }

        let mut observations = Vec::with_capacity(spec.observations.len());
        let mut observation_index = FxHashMap::default();
        for obs in spec.observations {
            if obs.resolutions.contains_key(&ProductKind::Diagnostic) {
                return Err(Error::Config(format!(
                    "Observational dataset '{}' cannot provide diagnostic products",
                    obs.name
                )));
            }
            let lower = obs.name.to_lowercase();
            let record = ObservationalDataset::new(
                obs.name.clone(),
                obs.prefix.unwrap_or_else(|| lower.clone()),
                obs.title.unwrap_or_else(|| obs.name.clone()),
                obs.folder.unwrap_or_else(|| spec.avg_root.join(&obs.name)),
                obs.grid.unwrap_or(lower),
                obs.resolutions,
            );
            if observation_index
                .insert(obs.name.clone(), observations.len())
                .is_some()
            {
                return Err(Error::Config(format!(
                    "Observational dataset '{}' is registered twice",
                    obs.name
                )));
            }
            observations.push(Arc::new(record));
        }

        let (ensembles, ensemble_index) = Self::derive_ensembles(&experiments, &experiment_index)?;

        debug!(
            experiments = experiments.len(),
            observations = observations.len(),
            ensembles = ensembles.len(),
            "catalog built"
        );

        Ok(Self {
            avg_root: spec.avg_root,
            diag_root: spec.diag_root,
            grid_folder: spec.grid_folder,
            model_prefix: spec.model_prefix,
            global_attributes: spec.global_attributes,
            filetypes,
            experiments,
            observations,
            ensembles,
            experiment_index,
            observation_index,
            ensemble_index,
        })
    }

    fn derive_ensembles(
        experiments: &[Arc<ModelExperiment>],
        experiment_index: &FxHashMap<String, usize>,
    ) -> Result<(Vec<Ensemble>, FxHashMap<String, usize>)> {
        let mut order: Vec<String> = Vec::new();
        let mut members: FxHashMap<String, Vec<Arc<ModelExperiment>>> = FxHashMap::default();
        for exp in experiments {
            let Some(key) = exp.ensemble() else { continue };
            if key == exp.name() {
                continue;
            }
            if !members.contains_key(key) {
                order.push(key.to_string());
            }
            members.entry(key.to_string()).or_default().push(Arc::clone(exp));
        }

        let mut ensembles = Vec::with_capacity(order.len());
        let mut index = FxHashMap::default();
        for key in order {
            let parent = experiment_index
                .get(&key)
                .map(|&i| Arc::clone(&experiments[i]))
                .ok_or_else(|| {
                    Error::Config(format!(
                        "Ensemble '{key}' is not a registered experiment\nRegister the ensemble-mean run under that name"
                    ))
                })?;
            let group = members.remove(&key).unwrap_or_default();
            if let Some(first) = group.first() {
                if let Some(odd) = group.iter().find(|m| m.native_grid() != first.native_grid()) {
                    return Err(Error::Config(format!(
                        "Ensemble '{key}' mixes native grids '{}' ({}) and '{}' ({})",
                        first.native_grid(),
                        first.name(),
                        odd.native_grid(),
                        odd.name()
                    )));
                }
            }
            let idx = ensembles.len();
            index.insert(key.clone(), idx);
            if let Some(short_name) = parent.short_name() {
                index.entry(short_name.to_string()).or_insert(idx);
            }
            ensembles.push(Ensemble::new(key, parent, group));
        }
        Ok((ensembles, index))
    }

    /// Parse a catalog from JSON text.
    ///
    /// # Errors
    ///
    /// Returns a serialization error or any [`from_spec`](Self::from_spec)
    /// error.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_spec(serde_json::from_str(json)?)
    }

    /// Read a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file is missing, otherwise see
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_json_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(format!(
                "Catalog file '{}' does not exist",
                path.display()
            )));
        }
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Look up a dataset by name or experiment alias.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the name is registered as both an experiment and
    /// an observational dataset.
    pub fn lookup(&self, name: &str) -> Result<Option<DatasetIdentity>> {
        let experiment = self.experiment(name);
        let observation = self.observation(name);
        match (experiment, observation) {
            (Some(_), Some(_)) => Err(Error::Config(format!(
                "Dataset name '{name}' is ambiguous: registered as experiment and observation"
            ))),
            (Some(exp), None) => Ok(Some(DatasetIdentity::Experiment(exp))),
            (None, Some(obs)) => Ok(Some(DatasetIdentity::Observation(obs))),
            (None, None) => Ok(None),
        }
    }

    /// Experiment by name or alias.
    #[must_use]
    pub fn experiment(&self, name: &str) -> Option<Arc<ModelExperiment>> {
        self.experiment_index
            .get(name)
            .map(|&i| Arc::clone(&self.experiments[i]))
    }

    /// Observational dataset by name.
    #[must_use]
    pub fn observation(&self, name: &str) -> Option<Arc<ObservationalDataset>> {
        self.observation_index
            .get(name)
            .map(|&i| Arc::clone(&self.observations[i]))
    }

    /// Ensemble by key or by the alias of its ensemble-mean record.
    #[must_use]
    pub fn ensemble(&self, key: &str) -> Option<&Ensemble> {
        self.ensemble_index.get(key).map(|&i| &self.ensembles[i])
    }

    /// File type by name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown file types.
    pub fn filetype(&self, name: &str) -> Result<&FileType> {
        self.filetypes
            .iter()
            .find(|ft| ft.name() == name)
            .ok_or_else(|| Error::NotFound(format!("File type '{name}' is not registered")))
    }

    /// All experiments in catalog order.
    #[must_use]
    pub fn experiments(&self) -> &[Arc<ModelExperiment>] {
        &self.experiments
    }

    /// All observational datasets in catalog order.
    #[must_use]
    pub fn observations(&self) -> &[Arc<ObservationalDataset>] {
        &self.observations
    }

    /// All ensembles in catalog order.
    #[must_use]
    pub fn ensembles(&self) -> &[Ensemble] {
        &self.ensembles
    }

    /// All file types.
    #[must_use]
    pub fn filetypes(&self) -> &[FileType] {
        &self.filetypes
    }

    /// Root of aggregated-mean folders.
    #[must_use]
    pub fn avg_root(&self) -> &Path {
        &self.avg_root
    }

    /// Root of diagnostic folders.
    #[must_use]
    pub fn diag_root(&self) -> &Path {
        &self.diag_root
    }

    /// Folder shared by grand-ensemble diagnostics.
    #[must_use]
    pub fn grand_ensemble_folder(&self) -> PathBuf {
        self.diag_root.join(GRAND_ENSEMBLE_FOLDER)
    }

    /// Folder of grid-definition cache files.
    #[must_use]
    pub fn grid_folder(&self) -> &Path {
        &self.grid_folder
    }

    /// File name prefix of model output.
    #[must_use]
    pub fn model_prefix(&self) -> &str {
        &self.model_prefix
    }

    /// Global variable-attribute defaults.
    #[must_use]
    pub const fn global_attributes(&self) -> &AttributeTable {
        &self.global_attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "avg_root": "/data/cesmavg",
        "diag_root": "/data/cvdp",
        "grid_folder": "/data/grids",
        "model_prefix": "cesm",
        "filetypes": [
            {"name": "atm", "families": ["climatology", "time_series"]},
            {"name": "cvdp", "families": ["diagnostic"]}
        ],
        "experiments": [
            {"name": "Ens", "short_name": "ens", "begin": "1979-01-01", "end": "1995-01-01", "grid": "cesm1x1", "ensemble": "Ens"},
            {"name": "Ctrl-1", "short_name": "ctrl1", "begin": "1979-01-01", "end": "1995-01-01", "grid": "cesm1x1", "ensemble": "Ens"},
            {"name": "Ctrl-2", "begin": "1980-01-01", "end": "1995-01-01", "grid": "cesm1x1", "ensemble": "Ens"},
            {"name": "Solo", "begin": "2045-01-01", "end": "2060-01-01", "grid": "cesm1x1", "diag_folder": "/elsewhere/solo"}
        ],
        "observations": [
            {"name": "GPCC", "resolutions": {"climatology": ["025", "05", "10", "25"], "time_series": ["05", "25"]}}
        ]
    }"#;

    #[test]
    fn test_catalog_from_json() {
        let catalog = Catalog::from_json_str(CATALOG).unwrap();
        assert_eq!(catalog.experiments().len(), 4);
        assert_eq!(catalog.ensembles().len(), 1);

        let ctrl = catalog.experiment("ctrl1").unwrap();
        assert_eq!(ctrl.name(), "Ctrl-1");
        assert_eq!(ctrl.avg_folder(), Path::new("/data/cesmavg/Ctrl-1"));

        let solo = catalog.experiment("Solo").unwrap();
        assert_eq!(solo.diag_folder(), Path::new("/elsewhere/solo"));

        let gpcc = catalog.observation("GPCC").unwrap();
        assert_eq!(gpcc.prefix(), "gpcc");
        assert_eq!(gpcc.native_grid(), "gpcc");
        assert_eq!(gpcc.folder(), Path::new("/data/cesmavg/GPCC"));
    }

    #[test]
    fn test_ensemble_members_in_order() {
        let catalog = Catalog::from_json_str(CATALOG).unwrap();
        let ens = catalog.ensemble("ens").unwrap();
        assert_eq!(ens.key(), "Ens");
        let names: Vec<_> = ens.members().iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["Ctrl-1", "Ctrl-2"]);
        assert_eq!(ens.native_grid(), "cesm1x1");
    }

    #[test]
    fn test_lookup_tags_kind() {
        let catalog = Catalog::from_json_str(CATALOG).unwrap();
        assert!(matches!(
            catalog.lookup("GPCC").unwrap(),
            Some(DatasetIdentity::Observation(_))
        ));
        assert!(matches!(
            catalog.lookup("Ctrl-2").unwrap(),
            Some(DatasetIdentity::Experiment(_))
        ));
        assert!(catalog.lookup("unknown").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let mut spec: CatalogSpec = serde_json::from_str(CATALOG).unwrap();
        spec.experiments[3].short_name = Some("ctrl1".to_string());
        assert!(matches!(Catalog::from_spec(spec), Err(Error::Config(_))));
    }

    #[test]
    fn test_unregistered_ensemble_key_rejected() {
        let mut spec: CatalogSpec = serde_json::from_str(CATALOG).unwrap();
        spec.experiments[3].ensemble = Some("Missing".to_string());
        assert!(matches!(Catalog::from_spec(spec), Err(Error::Config(_))));
    }

    #[test]
    fn test_mixed_member_grids_rejected() {
        let mut spec: CatalogSpec = serde_json::from_str(CATALOG).unwrap();
        spec.experiments[2].grid = "cesm2x2".to_string();
        assert!(matches!(Catalog::from_spec(spec), Err(Error::Config(_))));
    }

    #[test]
    fn test_observation_diagnostics_rejected() {
        let mut spec: CatalogSpec = serde_json::from_str(CATALOG).unwrap();
        spec.observations[0]
            .resolutions
            .insert(ProductKind::Diagnostic, vec!["05".to_string()]);
        assert!(matches!(Catalog::from_spec(spec), Err(Error::Config(_))));
    }

    #[test]
    fn test_ambiguous_name_is_config_error() {
        let mut spec: CatalogSpec = serde_json::from_str(CATALOG).unwrap();
        spec.observations[0].name = "Solo".to_string();
        let catalog = Catalog::from_spec(spec).unwrap();
        assert!(matches!(catalog.lookup("Solo"), Err(Error::Config(_))));
    }

    #[test]
    fn test_filetype_lookup() {
        let catalog = Catalog::from_json_str(CATALOG).unwrap();
        assert!(catalog.filetype("atm").unwrap().supports(ProductKind::TimeSeries));
        assert!(matches!(catalog.filetype("ocn"), Err(Error::NotFound(_))));
        assert_eq!(
            catalog.grand_ensemble_folder(),
            PathBuf::from("/data/cvdp/grand-ensemble")
        );
    }
}
