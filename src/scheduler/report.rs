//! Job outcomes and the aggregate batch report

use super::job::Job;
use crate::artifact::ArtifactFile;
use crate::staleness::RecomputeReason;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Why a job produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Sink is newer than its sources
    UpToDate,
    /// Target is the dataset's native grid; the source is the product
    NativeGrid,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => f.write_str("up to date"),
            Self::NativeGrid => f.write_str("native grid"),
        }
    }
}

/// Result of a job that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Sink (re)written
    Computed {
        /// Published sink
        sink: ArtifactFile,
    },
    /// Nothing to do
    Skipped {
        /// Sink that was left alone
        sink: ArtifactFile,
        /// Why
        reason: SkipReason,
    },
}

/// Failed job with enough context to re-run it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    /// Position in the batch
    pub job_id: usize,
    /// Dataset or ensemble name
    pub dataset: String,
    /// Product kind
    pub kind: String,
    /// Grid label
    pub grid: String,
    /// Period label
    pub period: String,
    /// File type or resolution, if any
    pub filetype: Option<String>,
    /// Error class
    pub error_kind: String,
    /// Rendered error
    pub reason: String,
}

impl JobFailure {
    /// Build a failure record for `job`.
    #[must_use]
    pub fn new(job: &Job, error_kind: &str, reason: impl Into<String>) -> Self {
        let options = job.options();
        Self {
            job_id: job.id(),
            dataset: job.target().name().to_string(),
            kind: job.kind().to_string(),
            grid: job.grid().label(),
            period: job.period_label(),
            filetype: options.filetype.clone().or_else(|| options.resolution.clone()),
            error_kind: error_kind.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job #{} {} {} on {} ({})",
            self.job_id, self.dataset, self.kind, self.grid, self.period
        )?;
        if let Some(filetype) = &self.filetype {
            write!(f, " [{filetype}]")?;
        }
        write!(f, ": {}: {}", self.error_kind, self.reason)
    }
}

/// Aggregate counts of a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    computed: Vec<PathBuf>,
    skipped: Vec<PathBuf>,
    failed: Vec<JobFailure>,
}

impl BatchReport {
    /// Fold job results, in any order.
    #[must_use]
    pub fn from_results(results: impl IntoIterator<Item = Result<JobOutcome, JobFailure>>) -> Self {
        let mut report = Self::default();
        for result in results {
            match result {
                Ok(JobOutcome::Computed { sink }) => report.computed.push(sink.path()),
                Ok(JobOutcome::Skipped { sink, .. }) => report.skipped.push(sink.path()),
                Err(failure) => report.failed.push(failure),
            }
        }
        report.failed.sort_by_key(|f| f.job_id);
        report
    }

    /// Sinks written.
    #[must_use]
    pub fn computed(&self) -> &[PathBuf] {
        &self.computed
    }

    /// Sinks left alone.
    #[must_use]
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }

    /// Failures, ordered by job id.
    #[must_use]
    pub fn failed(&self) -> &[JobFailure] {
        &self.failed
    }

    /// Jobs that did not fail.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.computed.len() + self.skipped.len()
    }

    /// All jobs.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded() + self.failed.len()
    }

    /// Ids of failed jobs, ascending.
    #[must_use]
    pub fn failed_ids(&self) -> Vec<usize> {
        self.failed.iter().map(|f| f.job_id).collect()
    }

    /// Process exit status: 0 if nothing failed, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.failed.is_empty())
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} jobs: {} computed, {} skipped, {} failed",
            self.total(),
            self.computed.len(),
            self.skipped.len(),
            self.failed.len()
        )?;
        for failure in &self.failed {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}

/// Dry-run decision for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    /// The job would (re)write its sink
    Compute {
        /// Why
        reason: String,
    },
    /// The job would do nothing
    Skip {
        /// Why
        reason: SkipReason,
    },
    /// The job would fail before processing
    Fail {
        /// Error class
        error_kind: String,
        /// Rendered error
        reason: String,
    },
}

impl From<RecomputeReason> for PlannedAction {
    fn from(reason: RecomputeReason) -> Self {
        Self::Compute {
            reason: reason.to_string(),
        }
    }
}

/// Dry-run entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    /// Position in the batch
    pub job_id: usize,
    /// Job description
    pub job: String,
    /// Sink path, when it could be resolved
    pub sink: Option<PathBuf>,
    /// Decision
    #[serde(flatten)]
    pub action: PlannedAction,
}
