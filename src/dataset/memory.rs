//! In-memory dataset persisted as a single JSON document.

use super::{check_variable_shape, Attributes, Axis, Dataset, DatasetIo, FileFormat, OpenSpec, Variable};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Dataset held entirely in memory.
///
/// When created with a backing path, [`Dataset::sync`] writes the whole
/// dataset as JSON to that path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryDataset {
    name: String,
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    axes: Vec<Axis>,
    #[serde(default)]
    variables: Vec<Variable>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl MemoryDataset {
    /// Create an empty dataset without backing storage.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Attach a backing path; the dataset is written there on sync.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Read a dataset from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist, a serialization
    /// error if it is not a dataset document, and `Config` if a variable
    /// does not fit the dataset's axes.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(format!(
                "Source file '{}' does not exist",
                path.display()
            )));
        }
        let text = fs::read_to_string(path)?;
        let mut dataset: Self = serde_json::from_str(&text)?;
        for variable in &dataset.variables {
            check_variable_shape(&dataset, variable).map_err(|e| {
                Error::Config(format!("Invalid dataset '{}': {e}", path.display()))
            })?;
        }
        dataset.path = Some(path.to_path_buf());
        Ok(dataset)
    }

    /// Write the dataset as JSON to `path`.
    ///
    /// # Errors
    ///
    /// Returns an IO or serialization error.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Backing path, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Add an axis.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the axis already exists.
    pub fn push_axis(&mut self, axis: Axis) -> Result<()> {
        if self.axes.iter().any(|a| a.name() == axis.name()) {
            return Err(Error::Config(format!(
                "Axis '{}' already exists in dataset '{}'",
                axis.name(),
                self.name
            )));
        }
        self.axes.push(axis);
        Ok(())
    }

    /// Add or replace a variable.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the variable does not fit the dataset's axes.
    pub fn push_variable(&mut self, variable: Variable) -> Result<()> {
        check_variable_shape(self, &variable)?;
        match self.variables.iter_mut().find(|v| v.name() == variable.name()) {
            Some(existing) => *existing = variable,
            None => self.variables.push(variable),
        }
        Ok(())
    }

    /// Set a global attribute (builder style).
    #[must_use]
    pub fn with_attribute(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    fn merge(&mut self, other: Self) -> Result<()> {
        for (key, value) in other.attributes {
            self.attributes.entry(key).or_insert(value);
        }
        for axis in other.axes {
            match self.axes.iter().find(|a| a.name() == axis.name()) {
                Some(existing) if existing.len() != axis.len() => {
                    return Err(Error::Config(format!(
                        "Axis '{}' has length {} in '{}' but {} in '{}'",
                        axis.name(),
                        existing.len(),
                        self.name,
                        axis.len(),
                        other.name
                    )));
                }
                Some(_) => {}
                None => self.axes.push(axis),
            }
        }
        for variable in other.variables {
            if !self.has_variable(variable.name()) {
                self.variables.push(variable);
            }
        }
        Ok(())
    }

    fn apply_attributes(&mut self, spec: &OpenSpec) {
        for axis in &mut self.axes {
            let Some(atts) = spec.attributes.get(axis.name()) else {
                continue;
            };
            if atts.name != axis.name() {
                let from = axis.name().to_string();
                axis.rename(&atts.name);
                for variable in &mut self.variables {
                    variable.rename_axis(&from, &atts.name);
                }
            }
        }
        for variable in &mut self.variables {
            let Some(atts) = spec.attributes.get(variable.name()) else {
                continue;
            };
            let (name, units) = (atts.name.clone(), atts.units.clone());
            let (scale, offset) = (atts.scale_factor, atts.offset);
            #[allow(clippy::float_cmp)]
            if scale != 1.0 || offset != 0.0 {
                for value in variable.data_mut() {
                    *value = *value * scale + offset;
                }
            }
            variable.rename(&name, &units);
        }
    }
}

impl Dataset for MemoryDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    fn axis_names(&self) -> Vec<String> {
        self.axes.iter().map(|a| a.name().to_string()).collect()
    }

    fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|a| a.name() == name)
    }

    fn variable_names(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.name().to_string()).collect()
    }

    fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name() == name)
    }

    fn add_axis(&mut self, axis: Axis) -> Result<()> {
        self.push_axis(axis)
    }

    fn add_variable(&mut self, variable: Variable) -> Result<()> {
        self.push_variable(variable)
    }

    fn replace_axis(&mut self, axis: Axis) -> Result<()> {
        let name = self.name.clone();
        let existing = self
            .axes
            .iter_mut()
            .find(|a| a.name() == axis.name())
            .ok_or_else(|| {
                Error::NotFound(format!("Axis '{}' not found in dataset '{name}'", axis.name()))
            })?;
        if existing.len() != axis.len() {
            return Err(Error::Config(format!(
                "Cannot replace axis '{}' of length {} with one of length {}",
                axis.name(),
                existing.len(),
                axis.len()
            )));
        }
        *existing = axis;
        Ok(())
    }

    fn mask(&mut self, mask: &Variable, invert: bool, varlist: &[String]) -> Result<()> {
        for name in varlist {
            if !self.has_variable(name) {
                return Err(Error::NotFound(format!(
                    "Variable '{name}' not found in dataset '{}'",
                    self.name
                )));
            }
        }
        let width = mask.data().len();
        if width == 0 {
            return Ok(());
        }
        let mask_axes = mask.axes();
        for variable in &mut self.variables {
            if variable.name() == mask.name() {
                continue;
            }
            if !varlist.is_empty() && !varlist.iter().any(|n| n == variable.name()) {
                continue;
            }
            let axes = variable.axes();
            if axes.len() < mask_axes.len() || axes[axes.len() - mask_axes.len()..] != *mask_axes {
                continue;
            }
            for chunk in variable.data_mut().chunks_mut(width) {
                for (value, flag) in chunk.iter_mut().zip(mask.data()) {
                    #[allow(clippy::float_cmp)]
                    let masked = (*flag != 0.0) != invert;
                    if masked {
                        *value = f64::NAN;
                    }
                }
            }
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if let Some(path) = &self.path {
            debug!(dataset = %self.name, path = %path.display(), "writing dataset");
            self.save(path)?;
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.sync()
    }
}

/// [`DatasetIo`] backed by [`MemoryDataset`] JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDatasetIo;

impl DatasetIo for JsonDatasetIo {
    fn open(&self, spec: &OpenSpec) -> Result<Box<dyn Dataset>> {
        let mut paths = spec.paths().into_iter();
        let first = paths.next().ok_or_else(|| {
            Error::Config(format!(
                "No source files given for folder '{}'",
                spec.folder.display()
            ))
        })?;
        let mut dataset = MemoryDataset::load(&first)?;
        for path in paths {
            dataset.merge(MemoryDataset::load(&path)?)?;
        }
        dataset.apply_attributes(spec);
        if let Some(keep) = &spec.variables {
            dataset.variables.retain(|v| keep.iter().any(|k| k == v.name()));
        }
        // Sources are read-only.
        dataset.path = None;
        Ok(Box::new(dataset))
    }

    fn create(
        &self,
        path: &Path,
        attributes: Attributes,
        _format: FileFormat,
    ) -> Result<Box<dyn Dataset>> {
        let name = attributes
            .get("name")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_default();
        let mut dataset = MemoryDataset::new(name).with_path(path);
        dataset.attributes = attributes;
        Ok(Box::new(dataset))
    }
}
