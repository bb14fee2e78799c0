//! Derived artifact files and safe replacement
//!
//! An [`ArtifactFile`] is a resolved `(folder, file name)` pair. Its
//! existence and modification time are read from the filesystem every
//! time they are asked for; nothing is cached across jobs.
//!
//! A [`PendingArtifact`] is a sink under construction. With the default
//! [`Replacement::Atomic`] strategy the sink is written to
//! `<folder>/.<file name>.tmp` and renamed over the final path on
//! [`PendingArtifact::commit`], so the previous artifact stays readable
//! until the new one is complete. Dropping an uncommitted pending artifact
//! removes whatever was written.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Resolved location of a source or derived file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactFile {
    folder: PathBuf,
    file_name: String,
}

impl ArtifactFile {
    /// Create an artifact reference.
    pub fn new(folder: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            file_name: file_name.into(),
        }
    }

    /// Containing folder.
    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// File name.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Full path.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.folder.join(&self.file_name)
    }

    /// Whether the file currently exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Current modification time, `None` if the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an IO error for anything other than a missing file.
    pub fn modified(&self) -> Result<Option<SystemTime>> {
        match fs::metadata(self.path()) {
            Ok(meta) => Ok(Some(meta.modified()?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Display for ArtifactFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().display())
    }
}

/// How an existing sink is replaced by a recomputed one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Replacement {
    /// Write to a temporary file, then rename over the sink
    #[default]
    Atomic,
    /// Delete the sink first, then write in place
    RemoveFirst,
}

impl FromStr for Replacement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" => Ok(Self::Atomic),
            "remove_first" | "remove-first" => Ok(Self::RemoveFirst),
            other => Err(Error::Config(format!(
                "Unknown replacement strategy '{other}' (expected 'atomic' or 'remove_first')"
            ))),
        }
    }
}

/// Sink being written.
#[derive(Debug)]
pub struct PendingArtifact {
    target: ArtifactFile,
    write_path: PathBuf,
    replacement: Replacement,
    armed: bool,
}

impl PendingArtifact {
    /// Prepare to (re)write `target`.
    ///
    /// With [`Replacement::RemoveFirst`] an existing sink is deleted here.
    /// With [`Replacement::Atomic`] a leftover temporary file from an
    /// earlier crash is removed and the sink is left alone.
    ///
    /// # Errors
    ///
    /// Returns an IO error if a file cannot be removed.
    pub fn begin(target: ArtifactFile, replacement: Replacement) -> Result<Self> {
        let write_path = match replacement {
            Replacement::Atomic => target.folder().join(format!(".{}.tmp", target.file_name())),
            Replacement::RemoveFirst => target.path(),
        };
        remove_if_present(&write_path)?;
        debug!(sink = %target, write_path = %write_path.display(), "sink pending");
        Ok(Self {
            target,
            write_path,
            replacement,
            armed: true,
        })
    }

    /// Final location.
    #[must_use]
    pub const fn target(&self) -> &ArtifactFile {
        &self.target
    }

    /// Where the dataset must be written.
    #[must_use]
    pub fn write_path(&self) -> &Path {
        &self.write_path
    }

    /// Replacement strategy in use.
    #[must_use]
    pub const fn replacement(&self) -> Replacement {
        self.replacement
    }

    /// Publish the written file at the final location.
    ///
    /// # Errors
    ///
    /// Returns `Other` if nothing was written and an IO error if the
    /// rename fails; the previous artifact is untouched in both cases.
    pub fn commit(mut self) -> Result<ArtifactFile> {
        if !self.write_path.is_file() {
            return Err(Error::Other(format!(
                "Sink '{}' was never written to '{}'",
                self.target,
                self.write_path.display()
            )));
        }
        if self.replacement == Replacement::Atomic {
            fs::rename(&self.write_path, self.target.path())?;
        }
        self.armed = false;
        debug!(sink = %self.target, "sink committed");
        Ok(self.target.clone())
    }
}

impl Drop for PendingArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = remove_if_present(&self.write_path) {
            warn!(
                path = %self.write_path.display(),
                error = %e,
                "could not remove abandoned sink"
            );
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modified_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = ArtifactFile::new(dir.path(), "missing.nc");
        assert!(!artifact.exists());
        assert!(artifact.modified().unwrap().is_none());
    }

    #[test]
    fn test_atomic_keeps_old_sink_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let target = ArtifactFile::new(dir.path(), "sink.nc");
        fs::write(target.path(), "old").unwrap();

        let pending = PendingArtifact::begin(target.clone(), Replacement::Atomic).unwrap();
        assert_eq!(pending.write_path(), dir.path().join(".sink.nc.tmp"));
        fs::write(pending.write_path(), "new").unwrap();
        assert_eq!(fs::read_to_string(target.path()).unwrap(), "old");

        pending.commit().unwrap();
        assert_eq!(fs::read_to_string(target.path()).unwrap(), "new");
        assert!(!dir.path().join(".sink.nc.tmp").exists());
    }

    #[test]
    fn test_atomic_drop_discards_temp() {
        let dir = tempfile::tempdir().unwrap();
        let target = ArtifactFile::new(dir.path(), "sink.nc");
        fs::write(target.path(), "old").unwrap();

        let pending = PendingArtifact::begin(target.clone(), Replacement::Atomic).unwrap();
        fs::write(pending.write_path(), "partial").unwrap();
        drop(pending);

        assert_eq!(fs::read_to_string(target.path()).unwrap(), "old");
        assert!(!dir.path().join(".sink.nc.tmp").exists());
    }

    #[test]
    fn test_remove_first_deletes_sink_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let target = ArtifactFile::new(dir.path(), "sink.nc");
        fs::write(target.path(), "old").unwrap();

        let pending = PendingArtifact::begin(target.clone(), Replacement::RemoveFirst).unwrap();
        assert!(!target.exists());
        fs::write(pending.write_path(), "new").unwrap();
        pending.commit().unwrap();
        assert_eq!(fs::read_to_string(target.path()).unwrap(), "new");
    }

    #[test]
    fn test_commit_without_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let target = ArtifactFile::new(dir.path(), "sink.nc");
        let pending = PendingArtifact::begin(target, Replacement::Atomic).unwrap();
        assert!(matches!(pending.commit(), Err(Error::Other(_))));
    }

    #[test]
    fn test_replacement_from_str() {
        assert_eq!("atomic".parse::<Replacement>().unwrap(), Replacement::Atomic);
        assert_eq!(
            "remove-first".parse::<Replacement>().unwrap(),
            Replacement::RemoveFirst
        );
        assert!("rename".parse::<Replacement>().is_err());
    }
}
