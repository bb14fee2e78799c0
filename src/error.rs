//! Error types for climate-regrid
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use std::time::Duration;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// climate-regrid error types
#[derive(Error, Debug)]
pub enum Error {
    /// Missing folder, file, catalog entry or grid-cache entry
    #[error("Not found: {0}")]
    NotFound(String),

    /// Ambiguous or malformed dataset/grid/period specification
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested product kind / file type combination is not implemented
    #[error("Unsupported mode: {0}")]
    UnsupportedMode(String),

    /// Ensemble members cannot be rebased or concatenated together
    #[error("Inconsistent ensemble: {0}\nAll members must share axes, grid and variable structure")]
    InconsistentEnsemble(String),

    /// Job ran past its configured deadline
    #[error("Job deadline exceeded after {elapsed:?} (limit {deadline:?})")]
    DeadlineExceeded {
        /// Time spent in the job so far
        elapsed: Duration,
        /// Configured per-job limit
        deadline: Duration,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error aborts a whole batch when raised while the job
    /// list is being built.
    ///
    /// Once jobs are running every class is contained at the job boundary.
    #[must_use]
    pub const fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Config(_) | Self::UnsupportedMode(_)
        )
    }

    /// Short, stable name of the error class (used in batch reports).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFoundError",
            Self::Config(_) => "ConfigError",
            Self::UnsupportedMode(_) => "UnsupportedModeError",
            Self::InconsistentEnsemble(_) => "InconsistentEnsembleError",
            Self::DeadlineExceeded { .. } => "DeadlineExceeded",
            Self::Io(_) => "IoError",
            Self::Serialization(_) => "SerializationError",
            Self::Other(_) => "JobFailure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_fatal_classes() {
        assert!(Error::NotFound("x".into()).is_batch_fatal());
        assert!(Error::Config("x".into()).is_batch_fatal());
        assert!(Error::UnsupportedMode("x".into()).is_batch_fatal());
        assert!(!Error::InconsistentEnsemble("x".into()).is_batch_fatal());
        assert!(!Error::Other("x".into()).is_batch_fatal());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Error::NotFound(String::new()).kind(), "NotFoundError");
        assert_eq!(
            Error::InconsistentEnsemble(String::new()).kind(),
            "InconsistentEnsembleError"
        );
    }
}
