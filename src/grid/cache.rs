//! Grid-definition cache backed by one JSON file per `(name, resolution)`.
//!
//! The on-disk cache is write-rarely, read-mostly and shared by all
//! workers without cross-process locking. In front of it sits a
//! process-wide memo (`DashMap`) so every key resolves to at most one
//! definition per process lifetime.

use super::GridDefinition;
use crate::dataset::Dataset;
use crate::{Error, Result};
use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cache key: grid name plus optional resolution tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GridKey {
    name: String,
    resolution: Option<String>,
}

impl GridKey {
    /// Create a key.
    #[must_use]
    pub fn new(name: &str, resolution: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            resolution: resolution.map(str::to_string),
        }
    }

    /// Grid name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolution tag.
    #[must_use]
    pub fn resolution(&self) -> Option<&str> {
        self.resolution.as_deref()
    }

    /// Cache file name, e.g. `griddef_arb2_d02.json`.
    #[must_use]
    pub fn file_name(&self) -> String {
        match &self.resolution {
            Some(res) => format!("griddef_{}_{res}.json", self.name),
            None => format!("griddef_{}.json", self.name),
        }
    }
}

/// Process-wide grid cache.
///
/// # Example
///
/// ```rust,no_run
/// use climate_regrid::grid::GridCache;
///
/// let cache = GridCache::new("/data/grids");
/// let grid = cache.load("arb2", Some("d02"))?;
/// println!("{} is {:?}", grid.tag_name(), grid.shape());
/// # Ok::<(), climate_regrid::Error>(())
/// ```
#[derive(Debug)]
pub struct GridCache {
    folder: PathBuf,
    memo: DashMap<GridKey, Arc<GridDefinition>, FxBuildHasher>,
}

impl GridCache {
    /// Create a cache reading from and writing to `folder`.
    #[must_use]
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            memo: DashMap::with_hasher(FxBuildHasher),
        }
    }

    /// Folder holding the serialized definitions.
    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Number of definitions loaded in this process.
    #[must_use]
    pub fn len(&self) -> usize {
        self.memo.len()
    }

    /// Whether nothing has been loaded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }

    /// Path of the cache file for a key.
    #[must_use]
    pub fn path_for(&self, key: &GridKey) -> PathBuf {
        self.folder.join(key.file_name())
    }

    /// Load a grid definition.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` on a cache miss (the caller may derive a fresh
    /// definition and [`store`](Self::store) it) and `Config` if the file
    /// holds a definition for a different key.
    pub fn load(&self, name: &str, resolution: Option<&str>) -> Result<Arc<GridDefinition>> {
        let key = GridKey::new(name, resolution);
        if let Some(hit) = self.memo.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }

        let path = self.path_for(&key);
        if !path.is_file() {
            return Err(Error::NotFound(format!(
                "No cached grid definition for '{}' at {}\nDerive one from a reference dataset and store it first",
                key.file_name(),
                path.display()
            )));
        }

        let text = fs::read_to_string(&path)?;
        let definition: GridDefinition = serde_json::from_str(&text)?;
        definition.validate()?;
        if definition.key() != key {
            return Err(Error::Config(format!(
                "Grid cache file {} holds grid '{}', expected '{}'",
                path.display(),
                definition.tag_name(),
                key.file_name()
            )));
        }
        debug!(grid = %definition.tag_name(), path = %path.display(), "loaded grid definition");

        // First loader wins; concurrent loads of the same key are identical.
        let entry = self.memo.entry(key).or_insert_with(|| Arc::new(definition));
        Ok(Arc::clone(entry.value()))
    }

    /// Derive a grid definition from a reference dataset (not persisted).
    ///
    /// # Errors
    ///
    /// See [`GridDefinition::derive`].
    pub fn derive(
        &self,
        name: &str,
        resolution: Option<&str>,
        dataset: &dyn Dataset,
    ) -> Result<GridDefinition> {
        GridDefinition::derive(name, resolution.map(str::to_string), dataset)
    }

    /// Persist a definition and register it in the process memo.
    ///
    /// The file is written to a temporary name and renamed into place. If
    /// this process already holds a definition for the key, that one is
    /// kept and returned.
    ///
    /// # Errors
    ///
    /// Returns an IO or serialization error if the file cannot be written.
    pub fn store(&self, definition: GridDefinition) -> Result<Arc<GridDefinition>> {
        let key = definition.key();
        fs::create_dir_all(&self.folder)?;
        let path = self.path_for(&key);
        let tmp = self.folder.join(format!(".{}.tmp", key.file_name()));
        fs::write(&tmp, serde_json::to_vec_pretty(&definition)?)?;
        fs::rename(&tmp, &path)?;
        info!(grid = %definition.tag_name(), path = %path.display(), "stored grid definition");

        let entry = self.memo.entry(key).or_insert_with(|| Arc::new(definition.clone()));
        if **entry.value() != definition {
            warn!(
                grid = %definition.tag_name(),
                "grid definition already loaded in this process; keeping the loaded one"
            );
        }
        Ok(Arc::clone(entry.value()))
    }

    /// Load a definition, deriving and storing it from `reference` on a miss.
    ///
    /// # Errors
    ///
    /// Propagates everything except the cache miss itself.
    pub fn load_or_derive(
        &self,
        name: &str,
        resolution: Option<&str>,
        reference: &dyn Dataset,
    ) -> Result<Arc<GridDefinition>> {
        match self.load(name, resolution) {
            Err(Error::NotFound(_)) => {
                info!(grid = name, reference = reference.name(), "deriving grid definition");
                let definition = self.derive(name, resolution, reference)?;
                self.store(definition)
            }
            other => other,
        }
    }
}
