//! Run configuration
//!
//! One immutable [`RunConfig`] per process, built with
//! [`RunConfig::builder`] or read from the environment:
//!
//! | Variable                  | Effect                                        |
//! |---------------------------|-----------------------------------------------|
//! | `REGRID_THREADS`          | worker count (default 4, 1 in debug mode)     |
//! | `REGRID_DEBUG=DEBUG`      | debug mode: sink files get a `test_` prefix   |
//! | `REGRID_OVERWRITE=OVERWRITE` | recompute everything (defaults to debug)   |
//! | `REGRID_STALENESS`        | `oldest` (default) or `newest`                |
//! | `REGRID_REPLACEMENT`      | `atomic` (default) or `remove_first`          |
//! | `REGRID_JOB_TIMEOUT_SECS` | per-job deadline, unset means none            |

use crate::artifact::Replacement;
use crate::dataset::FileFormat;
use crate::ensemble::DEFAULT_EPOCH_YEAR;
use crate::staleness::StalenessRule;
use crate::{Error, Result};
use std::time::Duration;

/// Worker count outside debug mode.
pub const DEFAULT_WORKERS: usize = 4;

/// Sink file prefix in debug mode.
pub const DEBUG_PREFIX: &str = "test_";

/// Immutable run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    workers: usize,
    debug: bool,
    overwrite: bool,
    staleness: StalenessRule,
    replacement: Replacement,
    job_timeout: Option<Duration>,
    epoch_year: i32,
    format: FileFormat,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            debug: false,
            overwrite: false,
            staleness: StalenessRule::default(),
            replacement: Replacement::default(),
            job_timeout: None,
            epoch_year: DEFAULT_EPOCH_YEAR,
            format: FileFormat::default(),
        }
    }
}

impl RunConfig {
    /// Start a builder from the defaults.
    #[must_use]
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `Config` for unparsable values.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup` (environment-like).
    ///
    /// # Errors
    ///
    /// Returns `Config` for unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let debug = lookup("REGRID_DEBUG").is_some_and(|v| v == "DEBUG");
        let overwrite = lookup("REGRID_OVERWRITE").map_or(debug, |v| v == "OVERWRITE");
        let workers = match lookup("REGRID_THREADS") {
            Some(value) => value.trim().parse::<usize>().map_err(|_| {
                Error::Config(format!("REGRID_THREADS must be a positive integer, got '{value}'"))
            })?,
            None if debug => 1,
            None => DEFAULT_WORKERS,
        };
        let mut builder = Self::builder()
            .workers(workers)
            .debug(debug)
            .overwrite(overwrite);
        if let Some(rule) = lookup("REGRID_STALENESS") {
            builder = builder.staleness(rule.parse()?);
        }
        if let Some(replacement) = lookup("REGRID_REPLACEMENT") {
            builder = builder.replacement(replacement.parse()?);
        }
        if let Some(secs) = lookup("REGRID_JOB_TIMEOUT_SECS") {
            let secs = secs.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!("REGRID_JOB_TIMEOUT_SECS must be whole seconds, got '{secs}'"))
            })?;
            builder = builder.job_timeout(Duration::from_secs(secs));
        }
        builder.build()
    }

    /// Number of concurrent workers.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Debug mode.
    #[must_use]
    pub const fn debug(&self) -> bool {
        self.debug
    }

    /// Recompute regardless of staleness.
    #[must_use]
    pub const fn overwrite(&self) -> bool {
        self.overwrite
    }

    /// Staleness rule.
    #[must_use]
    pub const fn staleness(&self) -> StalenessRule {
        self.staleness
    }

    /// Sink replacement strategy.
    #[must_use]
    pub const fn replacement(&self) -> Replacement {
        self.replacement
    }

    /// Per-job deadline.
    #[must_use]
    pub const fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout
    }

    /// Rebasing epoch year.
    #[must_use]
    pub const fn epoch_year(&self) -> i32 {
        self.epoch_year
    }

    /// Sink file format.
    #[must_use]
    pub const fn format(&self) -> FileFormat {
        self.format
    }

    /// Prefix for sink file names (`test_` in debug mode).
    #[must_use]
    pub const fn sink_prefix(&self) -> &'static str {
        if self.debug {
            DEBUG_PREFIX
        } else {
            ""
        }
    }
}

/// Builder for [`RunConfig`].
#[derive(Debug, Default)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    /// Set the worker count.
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Enable debug mode.
    #[must_use]
    pub const fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Force recomputation.
    #[must_use]
    pub const fn overwrite(mut self, overwrite: bool) -> Self {
        self.config.overwrite = overwrite;
        self
    }

    /// Set the staleness rule.
    #[must_use]
    pub const fn staleness(mut self, rule: StalenessRule) -> Self {
        self.config.staleness = rule;
        self
    }

    /// Set the replacement strategy.
    #[must_use]
    pub const fn replacement(mut self, replacement: Replacement) -> Self {
        self.config.replacement = replacement;
        self
    }

    /// Set a per-job deadline.
    #[must_use]
    pub const fn job_timeout(mut self, timeout: Duration) -> Self {
        self.config.job_timeout = Some(timeout);
        self
    }

    /// Set the rebasing epoch year.
    #[must_use]
    pub const fn epoch_year(mut self, year: i32) -> Self {
        self.config.epoch_year = year;
        self
    }

    /// Set the sink file format.
    #[must_use]
    pub const fn format(mut self, format: FileFormat) -> Self {
        self.config.format = format;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the worker count is zero.
    pub fn build(self) -> Result<RunConfig> {
        if self.config.workers == 0 {
            return Err(Error::Config(
                "Worker count must be at least 1".to_string(),
            ));
        }
        Ok(self.config)
    }
}
