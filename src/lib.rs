//! # climate-regrid: Incremental Regrid/Aggregation Pipeline
//!
//! climate-regrid maintains derived climate datasets (regridded
//! climatologies, time series and ensemble concatenations) computed from
//! raw model and observation archives. Given a catalog and a batch
//! request it decides which derived files are missing or stale,
//! recomputes only those, and runs the work on a bounded worker pool
//! where one failing job never takes down its siblings.
//!
//! ## Components
//!
//! - [`catalog`]: immutable registry of experiments, ensembles,
//!   observational datasets and file types
//! - [`grid`]: grid definitions and the process-wide grid cache
//! - [`resolver`]: folders and canonical file names
//! - [`staleness`]: skip-or-recompute decisions from mtimes
//! - [`ensemble`]: time-axis rebasing and member concatenation
//! - [`scheduler`]: batch expansion, worker pool, batch report
//!
//! Resampling mathematics and file-format encoding stay behind the
//! [`processing`] and [`dataset`] collaborator traits.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Muda elimination**: up-to-date sinks are never recomputed
//! - **Poka-Yoke safety**: sinks are written to a temporary file and
//!   renamed into place
//! - **Jidoka**: a failing job stops itself, not the batch
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use climate_regrid::catalog::Catalog;
//! use climate_regrid::config::RunConfig;
//! use climate_regrid::scheduler::{BatchRequest, Scheduler};
//! use std::sync::Arc;
//!
//! climate_regrid::telemetry::init_logging();
//! let catalog = Arc::new(Catalog::from_json_file("catalog.json".as_ref())?);
//! let request = BatchRequest::from_json_str(&std::fs::read_to_string("request.json")?)?;
//!
//! let scheduler = Scheduler::builder(catalog)
//!     .config(RunConfig::from_env()?)
//!     .build();
//! let jobs = scheduler.build_jobs(&request)?;
//! let report = scheduler.run(&jobs)?;
//! println!("{report}");
//! std::process::exit(report.exit_code());
//! # Ok::<(), climate_regrid::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod artifact;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod ensemble;
pub mod error;
pub mod grid;
pub mod processing;
pub mod product;
pub mod resolver;
pub mod scheduler;
pub mod staleness;
pub mod telemetry;

pub use error::{Error, Result};
pub use product::{GridTarget, Period, ProductKind};
pub use scheduler::{BatchReport, BatchRequest, Job, Scheduler};
