//! Path resolver: folders and canonical file names of sources and sinks
//!
//! The resolver never invokes processing. A non-empty grid tag
//! ([`GridTag::regrid`]) is the only signal that resampling is needed;
//! the scheduler acts on it.

use crate::catalog::{Catalog, DatasetIdentity};
use crate::product::{GridTarget, Period, PeriodRule, ProductKind};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Dataset reference as given by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetRef {
    /// Already resolved identity
    Identity(DatasetIdentity),
    /// Raw name or alias, possibly unregistered
    Name(String),
}

impl From<DatasetIdentity> for DatasetRef {
    fn from(identity: DatasetIdentity) -> Self {
        Self::Identity(identity)
    }
}

impl From<&str> for DatasetRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity(identity) => f.write_str(identity.name()),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Where diagnostic-package output lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticMode {
    /// Folder of the ensemble the experiment belongs to
    Ensemble,
    /// The experiment's own diagnostic folder
    Member,
    /// Folder shared by all ensembles
    GrandEnsemble,
    /// Observational comparison (grand-ensemble folder when unregistered)
    Observations,
}

impl FromStr for DiagnosticMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ensemble" => Ok(Self::Ensemble),
            "member" => Ok(Self::Member),
            "grand-ensemble" | "grand_ensemble" => Ok(Self::GrandEnsemble),
            "observations" => Ok(Self::Observations),
            other => Err(Error::Config(format!("Unknown diagnostic mode '{other}'"))),
        }
    }
}

/// Result of [`PathResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Existing folder
    pub folder: PathBuf,
    /// Registered identity, if any
    pub identity: Option<DatasetIdentity>,
    /// Canonical dataset name
    pub name: String,
}

/// Grid part of a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridTag {
    /// `""` or `_<lower-case grid name>`
    pub tag: String,
    /// Whether the source must be resampled onto the target grid
    pub regrid: bool,
}

impl GridTag {
    /// Empty tag, no regridding.
    #[must_use]
    pub const fn native() -> Self {
        Self {
            tag: String::new(),
            regrid: false,
        }
    }
}

/// Dataset-specific part of a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameStem<'a> {
    /// Model output stream
    Model {
        /// Experiment (or ensemble) name, used by diagnostic names
        name: &'a str,
        /// File type
        filetype: &'a str,
    },
    /// Observational dataset
    Observation {
        /// File prefix
        prefix: &'a str,
        /// Resolution tag
        resolution: Option<&'a str>,
    },
}

/// Inputs of [`PathResolver::file_name`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameSpec<'a> {
    /// Product kind
    pub kind: ProductKind,
    /// Dataset part
    pub stem: NameStem<'a>,
    /// Grid part
    pub grid_tag: &'a str,
    /// Period (already made effective)
    pub period: Option<Period>,
    /// Concatenated ensemble output instead of a single run
    pub concatenated: bool,
}

/// Turns identities, product kinds, grids and periods into paths.
#[derive(Debug, Clone)]
pub struct PathResolver {
    catalog: Arc<Catalog>,
}

impl PathResolver {
    /// Create a resolver over `catalog`.
    #[must_use]
    pub const fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Catalog in use.
    #[must_use]
    pub const fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Resolve the folder, identity and canonical name of a dataset.
    ///
    /// An explicit folder is used verbatim. Otherwise the folder follows
    /// from the catalog: the aggregated-mean folder for climatologies and
    /// time series, a diagnostic folder chosen by `mode` for diagnostics.
    /// The folder must exist.
    ///
    /// # Errors
    ///
    /// - `Config` for an empty explicit folder or an ambiguous name
    /// - `UnsupportedMode` for diagnostics of observational datasets
    /// - `NotFound` for unregistered names without a usable folder, and
    ///   for missing folders
    pub fn resolve(
        &self,
        dataset: &DatasetRef,
        kind: ProductKind,
        folder: Option<&Path>,
        mode: Option<DiagnosticMode>,
    ) -> Result<Resolution> {
        if let Some(explicit) = folder {
            if explicit.as_os_str().is_empty() {
                return Err(Error::Config(format!(
                    "Empty folder given for dataset '{dataset}'"
                )));
            }
        }

        let identity = match dataset {
            DatasetRef::Identity(identity) => Some(identity.clone()),
            DatasetRef::Name(name) => self.catalog.lookup(name)?,
        };

        let (folder, name) = match &identity {
            None => {
                let name = dataset.to_string();
                let mode = mode.unwrap_or(DiagnosticMode::Ensemble);
                let folder = match folder {
                    Some(explicit) => explicit.to_path_buf(),
                    None if kind == ProductKind::Diagnostic
                        && matches!(
                            mode,
                            DiagnosticMode::GrandEnsemble | DiagnosticMode::Observations
                        ) =>
                    {
                        self.catalog.grand_ensemble_folder()
                    }
                    None => {
                        return Err(Error::NotFound(format!(
                            "Dataset '{name}' is not registered\nSpecify its folder explicitly to load it"
                        )))
                    }
                };
                (folder, name)
            }
            Some(DatasetIdentity::Observation(obs)) => {
                if kind == ProductKind::Diagnostic {
                    return Err(Error::UnsupportedMode(format!(
                        "Observational dataset '{}' has no diagnostic products",
                        obs.name()
                    )));
                }
                let folder = folder.map_or_else(|| obs.folder().to_path_buf(), Path::to_path_buf);
                (folder, obs.name().to_string())
            }
            Some(DatasetIdentity::Experiment(exp)) => {
                let folder = match folder {
                    Some(explicit) => explicit.to_path_buf(),
                    None if kind == ProductKind::Diagnostic => {
                        let mode = mode.unwrap_or(if exp.is_ensemble_mean() {
                            DiagnosticMode::Ensemble
                        } else {
                            DiagnosticMode::Member
                        });
                        match mode {
                            DiagnosticMode::Ensemble => self
                                .catalog
                                .diag_root()
                                .join(exp.ensemble().unwrap_or(exp.name())),
                            DiagnosticMode::GrandEnsemble => self.catalog.grand_ensemble_folder(),
                            DiagnosticMode::Member | DiagnosticMode::Observations => {
                                exp.diag_folder().to_path_buf()
                            }
                        }
                    }
                    None => exp.avg_folder().to_path_buf(),
                };
                (folder, exp.name().to_string())
            }
        };

        if !folder.is_dir() {
            return Err(Error::NotFound(format!(
                "Dataset folder does not exist: {}",
                folder.display()
            )));
        }
        debug!(dataset = %name, kind = %kind, folder = %folder.display(), "resolved dataset");
        Ok(Resolution {
            folder,
            identity,
            name,
        })
    }

    /// Grid tag for `target` and whether regridding is required.
    ///
    /// The tag is empty when the target is the dataset's native grid.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedMode` when a point product is requested on a
    /// raster grid, a raster product on stations or shapes, or a
    /// diagnostic product on any non-native grid.
    pub fn grid_tag(
        &self,
        kind: ProductKind,
        identity: Option<&DatasetIdentity>,
        target: &GridTarget,
        resolution: Option<&str>,
    ) -> Result<GridTag> {
        let tag = match target {
            GridTarget::Native => GridTag::native(),
            GridTarget::Grid(grid) => {
                if identity.is_some_and(|id| id.is_native(grid, resolution)) {
                    GridTag::native()
                } else {
                    GridTag {
                        tag: format!("_{}", grid.tag_name().to_lowercase()),
                        regrid: true,
                    }
                }
            }
            GridTarget::Stations(name) | GridTarget::Shapes(name) => {
                let point_kind = match target {
                    GridTarget::Stations(_) => ProductKind::StationSeries,
                    _ => ProductKind::ShapeSeries,
                };
                if kind != point_kind {
                    return Err(Error::UnsupportedMode(format!(
                        "Target '{name}' requires {point_kind} products, not {kind}"
                    )));
                }
                GridTag {
                    tag: format!("_{}", name.to_lowercase()),
                    regrid: false,
                }
            }
        };
        if tag.regrid && kind.is_point_product() {
            return Err(Error::UnsupportedMode(format!(
                "{kind} products are only available on the native grid, not '{target}'"
            )));
        }
        if tag.regrid && kind == ProductKind::Diagnostic {
            return Err(Error::UnsupportedMode(format!(
                "Diagnostic products cannot be regridded to '{target}'"
            )));
        }
        Ok(tag)
    }

    /// Period actually used for a product.
    ///
    /// # Errors
    ///
    /// - `Config` if a period is given for a kind that forbids it
    /// - `Config` if a model climatology has no period
    /// - `Config` if a diagnostic period cannot be inferred
    pub fn effective_period(
        &self,
        kind: ProductKind,
        identity: Option<&DatasetIdentity>,
        requested: Option<Period>,
    ) -> Result<Option<Period>> {
        match (kind.period_rule(), requested) {
            (PeriodRule::Forbidden, Some(period)) => Err(Error::Config(format!(
                "{kind} products take no period (got {period})"
            ))),
            (PeriodRule::Forbidden, None) => Ok(None),
            (PeriodRule::Mandatory, Some(period)) => Ok(Some(period)),
            (PeriodRule::Mandatory, None) => match (kind, identity) {
                (ProductKind::Climatology, Some(DatasetIdentity::Observation(_))) => Ok(None),
                (ProductKind::Diagnostic, Some(DatasetIdentity::Experiment(exp))) => {
                    exp.full_period().map(Some)
                }
                _ => Err(Error::Config(format!(
                    "A period is required for {kind} products{}",
                    identity.map_or_else(String::new, |id| format!(" of '{}'", id.name()))
                ))),
            },
        }
    }

    /// Period part of a file name.
    ///
    /// Climatologies print the period as written (`_1979-1994`), diagnostics
    /// print the last included year (`1979-1993`), time series print nothing.
    #[must_use]
    pub fn period_tag(kind: ProductKind, period: Option<Period>) -> String {
        match (kind, period) {
            (ProductKind::Climatology, Some(period)) => period.climatology_tag(),
            (ProductKind::Diagnostic, Some(period)) => period.diagnostic_tag(),
            _ => String::new(),
        }
    }

    /// Canonical file name.
    ///
    /// ```text
    /// climatology   <prefix><filetype><grid>_clim<period>.nc
    /// time series   <prefix><filetype><grid>_monthly.nc
    /// ensemble TS   <prefix><filetype><grid>_ensemble.nc
    /// diagnostic    <name>.<filetype>_data.<period>.nc
    /// ensemble diag <name>_ensemble.<filetype>_data.<period>.nc
    /// ```
    ///
    /// Observational stems are `<prefix>_<resolution>`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedMode` for observational diagnostics and for
    /// concatenated climatologies or point products, and `Config` when a
    /// diagnostic has no period.
    pub fn file_name(&self, spec: &FileNameSpec<'_>) -> Result<String> {
        let grid = spec.grid_tag;
        let period = Self::period_tag(spec.kind, spec.period);

        if spec.kind == ProductKind::Diagnostic {
            let NameStem::Model { name, filetype } = spec.stem else {
                return Err(Error::UnsupportedMode(
                    "Observational datasets have no diagnostic products".to_string(),
                ));
            };
            if spec.period.is_none() {
                return Err(Error::Config(format!(
                    "Diagnostic file of '{name}' needs a period"
                )));
            }
            let suffix = if spec.concatenated { "_ensemble" } else { "" };
            return Ok(format!("{name}{suffix}.{filetype}_data.{period}.nc"));
        }

        if spec.concatenated && spec.kind != ProductKind::TimeSeries {
            return Err(Error::UnsupportedMode(format!(
                "Ensembles of {} products cannot be concatenated",
                spec.kind
            )));
        }

        let stem = match spec.stem {
            NameStem::Model { filetype, .. } => {
                format!("{}{filetype}", self.catalog.model_prefix())
            }
            NameStem::Observation {
                prefix,
                resolution: Some(res),
            } => format!("{prefix}_{res}"),
            NameStem::Observation {
                prefix,
                resolution: None,
            } => prefix.to_string(),
        };
        let family = match spec.kind {
            ProductKind::Climatology => "clim",
            _ if spec.concatenated => "ensemble",
            _ => "monthly",
        };
        Ok(format!("{stem}{grid}_{family}{period}.nc"))
    }
}
