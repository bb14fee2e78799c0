//! Dataset-I/O collaborator interface
//!
//! The pipeline never touches file formats directly. It consumes an
//! opened-dataset abstraction ([`Dataset`]) with named axes, named
//! variables and a mutable attribute bag, and a factory ([`DatasetIo`])
//! that opens sources and creates sinks.
//!
//! [`MemoryDataset`] and [`JsonDatasetIo`] are the reference
//! implementation: JSON files holding whole datasets, good enough for
//! tests, demos and dry runs.

mod memory;

pub use memory::{JsonDatasetIo, MemoryDataset};

use crate::catalog::ResolvedAttributes;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Free-form attribute bag (global or per-variable).
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Coordinate axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    name: String,
    units: String,
    coords: Vec<f64>,
    #[serde(default)]
    atts: Attributes,
}

impl Axis {
    /// Create an axis.
    pub fn new(name: impl Into<String>, units: impl Into<String>, coords: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
            coords,
            atts: Attributes::new(),
        }
    }

    /// Add an attribute (builder style).
    #[must_use]
    pub fn with_attribute(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.atts.insert(key.to_string(), value.into());
        self
    }

    /// Axis name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Units.
    #[must_use]
    pub fn units(&self) -> &str {
        &self.units
    }

    /// Coordinate values.
    #[must_use]
    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    /// Number of coordinates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    /// Whether the axis has no coordinates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Axis attributes.
    #[must_use]
    pub const fn atts(&self) -> &Attributes {
        &self.atts
    }

    pub(crate) fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }
}

/// Data variable stored row-major over its axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    name: String,
    units: String,
    axes: Vec<String>,
    #[serde(with = "missing_as_null")]
    data: Vec<f64>,
    #[serde(default)]
    atts: Attributes,
}

/// JSON has no NaN: missing values are written as `null`.
mod missing_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(data.iter().map(|v| (!v.is_nan()).then_some(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

impl Variable {
    /// Create a variable.
    ///
    /// The data length is checked against the axes when the variable is
    /// added to a dataset.
    pub fn new(
        name: impl Into<String>,
        units: impl Into<String>,
        axes: Vec<String>,
        data: Vec<f64>,
    ) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
            axes,
            data,
            atts: Attributes::new(),
        }
    }

    /// Variable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Units.
    #[must_use]
    pub fn units(&self) -> &str {
        &self.units
    }

    /// Axis names, outermost first.
    #[must_use]
    pub fn axes(&self) -> &[String] {
        &self.axes
    }

    /// Whether the variable is defined on `axis`.
    #[must_use]
    pub fn has_axis(&self, axis: &str) -> bool {
        self.axes.iter().any(|a| a == axis)
    }

    /// Row-major values.
    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Mutable row-major values.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Variable attributes.
    #[must_use]
    pub const fn atts(&self) -> &Attributes {
        &self.atts
    }

    /// Mutable variable attributes.
    pub fn atts_mut(&mut self) -> &mut Attributes {
        &mut self.atts
    }

    pub(crate) fn rename(&mut self, name: &str, units: &str) {
        self.name = name.to_string();
        self.units = units.to_string();
    }

    pub(crate) fn rename_axis(&mut self, from: &str, to: &str) {
        for axis in &mut self.axes {
            if axis == from {
                *axis = to.to_string();
            }
        }
    }
}

/// Opened dataset (source or sink).
///
/// Handles are owned by exactly one job. [`Dataset::close`] consumes the
/// handle so a closed dataset cannot be used again.
pub trait Dataset: Send {
    /// Dataset name.
    fn name(&self) -> &str;

    /// Global attributes.
    fn attributes(&self) -> &Attributes;

    /// Mutable global attributes.
    fn attributes_mut(&mut self) -> &mut Attributes;

    /// Axis names in definition order.
    fn axis_names(&self) -> Vec<String>;

    /// Look up an axis.
    fn axis(&self, name: &str) -> Option<&Axis>;

    /// Whether an axis exists.
    fn has_axis(&self, name: &str) -> bool {
        self.axis(name).is_some()
    }

    /// Variable names in definition order.
    fn variable_names(&self) -> Vec<String>;

    /// Look up a variable.
    fn variable(&self, name: &str) -> Option<&Variable>;

    /// Whether a variable exists.
    fn has_variable(&self, name: &str) -> bool {
        self.variable(name).is_some()
    }

    /// Add a new axis.
    ///
    /// # Errors
    ///
    /// Returns `Config` if an axis with that name already exists.
    fn add_axis(&mut self, axis: Axis) -> Result<()>;

    /// Add (or replace) a variable.
    ///
    /// # Errors
    ///
    /// Returns `Config` if an axis is missing or the data length does not
    /// match the axes.
    fn add_variable(&mut self, variable: Variable) -> Result<()>;

    /// Replace an existing axis by one of equal length.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the axis does not exist and `Config` if the
    /// lengths differ.
    fn replace_axis(&mut self, axis: Axis) -> Result<()>;

    /// Mask variables with `mask` (non-zero entries are masked, or zero
    /// entries when `invert` is set). Masked cells become NaN.
    ///
    /// Applies to every variable in `varlist` (all variables when empty)
    /// whose trailing axes equal the mask's axes.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if a listed variable does not exist.
    fn mask(&mut self, mask: &Variable, invert: bool, varlist: &[String]) -> Result<()>;

    /// Flush pending changes to storage.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the backing store cannot be written.
    fn sync(&mut self) -> Result<()>;

    /// Flush and release the handle.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the backing store cannot be written.
    fn close(self: Box<Self>) -> Result<()>;
}

/// On-disk format tag handed to the I/O collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    /// Full netCDF-4
    #[default]
    Netcdf4,
    /// netCDF-4 classic model
    Netcdf4Classic,
}

/// Everything the I/O collaborator needs to open a source dataset.
#[derive(Debug, Clone)]
pub struct OpenSpec {
    /// Folder holding the files
    pub folder: PathBuf,
    /// File names, merged in order
    pub files: Vec<String>,
    /// Variables to load after renaming (`None` loads all)
    pub variables: Option<Vec<String>>,
    /// Variable renaming and scaling table
    pub attributes: ResolvedAttributes,
    /// Format tag
    pub format: FileFormat,
}

impl OpenSpec {
    /// Open spec for a single file without renaming.
    #[must_use]
    pub fn single(folder: impl Into<PathBuf>, file: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            files: vec![file.into()],
            variables: None,
            attributes: ResolvedAttributes::default(),
            format: FileFormat::default(),
        }
    }

    /// Absolute paths of all files.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| self.folder.join(f)).collect()
    }
}

/// Factory for dataset handles.
pub trait DatasetIo: Send + Sync {
    /// Open an existing dataset read-only.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if a file is missing.
    fn open(&self, spec: &OpenSpec) -> Result<Box<dyn Dataset>>;

    /// Create an empty, writable dataset at `path`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the dataset cannot be created.
    fn create(
        &self,
        path: &Path,
        attributes: Attributes,
        format: FileFormat,
    ) -> Result<Box<dyn Dataset>>;
}

/// Copy axes, variables and missing global attributes from one dataset
/// into another.
///
/// Axes already present in `to` are kept; variables are replaced.
/// `variables` restricts which variables are copied.
///
/// # Errors
///
/// Returns `Config` if a copied variable does not fit the target's axes.
pub fn copy_dataset(
    from: &dyn Dataset,
    to: &mut dyn Dataset,
    variables: Option<&[String]>,
) -> Result<()> {
    for (key, value) in from.attributes() {
        to.attributes_mut()
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    for name in from.axis_names() {
        if let Some(axis) = from.axis(&name) {
            if !to.has_axis(&name) {
                to.add_axis(axis.clone())?;
            }
        }
    }
    for name in from.variable_names() {
        if variables.is_some_and(|keep| !keep.iter().any(|k| *k == name)) {
            continue;
        }
        if let Some(variable) = from.variable(&name) {
            to.add_variable(variable.clone())?;
        }
    }
    Ok(())
}

/// Number of values implied by a list of axis lengths.
pub(crate) fn expected_len(lengths: &[usize]) -> usize {
    lengths.iter().product()
}

/// Check that a variable matches the axes of a dataset.
pub(crate) fn check_variable_shape(dataset: &dyn Dataset, variable: &Variable) -> Result<()> {
    let mut lengths = Vec::with_capacity(variable.axes().len());
    for axis in variable.axes() {
        let axis = dataset.axis(axis).ok_or_else(|| {
            Error::Config(format!(
                "Variable '{}' refers to unknown axis '{axis}' in dataset '{}'",
                variable.name(),
                dataset.name()
            ))
        })?;
        lengths.push(axis.len());
    }
    let expected = expected_len(&lengths);
    if variable.data().len() != expected {
        return Err(Error::Config(format!(
            "Variable '{}' holds {} values, axes {:?} require {expected}",
            variable.name(),
            variable.data().len(),
            variable.axes()
        )));
    }
    Ok(())
}
