//! Staleness oracle: skip or recompute a derived artifact
//!
//! The decision compares the sink's modification time against a single
//! "source age" computed from all source files. The default rule,
//! [`StalenessRule::OldestSource`], takes the *oldest* source mtime: a
//! sink newer than any one source is considered fresh, even if another
//! source was modified after the sink was written. This matches the
//! behaviour existing archives were produced under.
//!
//! [`StalenessRule::NewestSource`] is the stricter opt-in: recompute as
//! soon as any source is newer than the sink.

use crate::artifact::ArtifactFile;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::SystemTime;

/// How the source age is derived from the source mtimes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessRule {
    /// Oldest source mtime (skip if the sink is newer than any source)
    #[default]
    OldestSource,
    /// Newest source mtime (recompute if any source is newer than the sink)
    NewestSource,
}

impl FromStr for StalenessRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oldest" | "oldest_source" => Ok(Self::OldestSource),
            "newest" | "newest_source" => Ok(Self::NewestSource),
            other => Err(Error::Config(format!(
                "Unknown staleness rule '{other}' (expected 'oldest' or 'newest')"
            ))),
        }
    }
}

/// Why a sink has to be (re)computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomputeReason {
    /// Overwrite was requested
    Overwrite,
    /// The sink does not exist
    SinkMissing,
    /// No source files were given
    NoSources,
    /// The sink is not strictly newer than the source age
    SourceNewer,
}

impl fmt::Display for RecomputeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Overwrite => "overwrite requested",
            Self::SinkMissing => "sink missing",
            Self::NoSources => "no source files",
            Self::SourceNewer => "source newer than sink",
        })
    }
}

/// Outcome of a staleness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Produce the sink
    Recompute(RecomputeReason),
    /// Sink is up to date
    Skip,
}

impl Decision {
    /// Whether the sink must be produced.
    #[must_use]
    pub const fn needs_recompute(self) -> bool {
        matches!(self, Self::Recompute(_))
    }
}

/// Skip-or-recompute decisions from file modification times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StalenessOracle {
    rule: StalenessRule,
}

impl StalenessOracle {
    /// Create an oracle with the given rule.
    #[must_use]
    pub const fn new(rule: StalenessRule) -> Self {
        Self { rule }
    }

    /// Rule in use.
    #[must_use]
    pub const fn rule(&self) -> StalenessRule {
        self.rule
    }

    /// Decide from already-collected times.
    ///
    /// The sink is fresh only when its mtime is *strictly* greater than the
    /// source age.
    #[must_use]
    pub fn decide_with_times(
        &self,
        sources: &[SystemTime],
        sink: Option<SystemTime>,
        overwrite: bool,
    ) -> Decision {
        if overwrite {
            return Decision::Recompute(RecomputeReason::Overwrite);
        }
        let Some(sink) = sink else {
            return Decision::Recompute(RecomputeReason::SinkMissing);
        };
        let age = match self.rule {
            StalenessRule::OldestSource => sources.iter().min(),
            StalenessRule::NewestSource => sources.iter().max(),
        };
        match age {
            None => Decision::Recompute(RecomputeReason::NoSources),
            Some(age) if sink > *age => Decision::Skip,
            Some(_) => Decision::Recompute(RecomputeReason::SourceNewer),
        }
    }

    /// Decide for files on disk.
    ///
    /// Overwrite short-circuits before any filesystem access; an absent
    /// sink short-circuits before the sources are inspected. Removing an
    /// existing sink is left to the caller.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if a source file is missing.
    pub fn decide(
        &self,
        sources: &[PathBuf],
        sink: &ArtifactFile,
        overwrite: bool,
    ) -> Result<Decision> {
        if overwrite {
            return Ok(Decision::Recompute(RecomputeReason::Overwrite));
        }
        let Some(sink_time) = sink.modified()? else {
            return Ok(Decision::Recompute(RecomputeReason::SinkMissing));
        };
        let mut times = Vec::with_capacity(sources.len());
        for source in sources {
            let meta = fs::metadata(source).map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::NotFound(format!(
                    "Source file '{}' does not exist",
                    source.display()
                )),
                _ => Error::Io(e),
            })?;
            times.push(meta.modified()?);
        }
        Ok(self.decide_with_times(&times, Some(sink_time), false))
    }

    /// Boolean form of [`decide`](Self::decide).
    ///
    /// # Errors
    ///
    /// See [`decide`](Self::decide).
    pub fn needs_recompute(
        &self,
        sources: &[PathBuf],
        sink: &ArtifactFile,
        overwrite: bool,
    ) -> Result<bool> {
        Ok(self.decide(sources, sink, overwrite)?.needs_recompute())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_oldest_source_skips_despite_newer_source() {
        let oracle = StalenessOracle::default();
        let decision = oracle.decide_with_times(&[at(100), at(200)], Some(at(150)), false);
        assert_eq!(decision, Decision::Skip);
    }

    #[test]
    fn test_newest_source_recomputes() {
        let oracle = StalenessOracle::new(StalenessRule::NewestSource);
        let decision = oracle.decide_with_times(&[at(100), at(200)], Some(at(150)), false);
        assert_eq!(decision, Decision::Recompute(RecomputeReason::SourceNewer));
    }

    #[test]
    fn test_equal_times_recompute() {
        let oracle = StalenessOracle::default();
        let decision = oracle.decide_with_times(&[at(100)], Some(at(100)), false);
        assert!(decision.needs_recompute());
    }

    #[test]
    fn test_overwrite_and_missing_sink() {
        let oracle = StalenessOracle::default();
        assert_eq!(
            oracle.decide_with_times(&[at(1)], Some(at(9)), true),
            Decision::Recompute(RecomputeReason::Overwrite)
        );
        assert_eq!(
            oracle.decide_with_times(&[at(1)], None, false),
            Decision::Recompute(RecomputeReason::SinkMissing)
        );
        assert_eq!(
            oracle.decide_with_times(&[], Some(at(9)), false),
            Decision::Recompute(RecomputeReason::NoSources)
        );
    }

    #[test]
    fn test_rule_from_str() {
        assert_eq!("oldest".parse::<StalenessRule>().unwrap(), StalenessRule::OldestSource);
        assert_eq!("NEWEST".parse::<StalenessRule>().unwrap(), StalenessRule::NewestSource);
        assert!("latest".parse::<StalenessRule>().is_err());
    }
}
