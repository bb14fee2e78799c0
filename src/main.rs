//! regrid-plan: plan or run a regrid batch from a catalog and a request
//!
//! Exit status: 0 when every job succeeded (or would), 1 when at least one
//! job failed, 2 when the batch could not be built at all.

use anyhow::Context;
use clap::{Parser, Subcommand};
use climate_regrid::catalog::Catalog;
use climate_regrid::config::RunConfig;
use climate_regrid::scheduler::{BatchRequest, PlannedAction, Scheduler};
use climate_regrid::telemetry;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "regrid-plan")]
#[command(version)]
#[command(about = "Plan or run incremental regrid/aggregation batches", long_about = None)]
struct Cli {
    /// Catalog JSON file
    #[arg(short, long)]
    catalog: PathBuf,

    /// Batch request JSON file
    #[arg(short, long)]
    request: PathBuf,

    /// Worker count (overrides REGRID_THREADS)
    #[arg(short, long)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show what each job would do (default)
    Plan {
        /// Print the plan as JSON
        #[arg(long, action)]
        json: bool,
    },

    /// Run the batch
    Run,
}

fn main() -> ExitCode {
    telemetry::init_logging();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("batch aborted: {e:#}");
            eprintln!("regrid-plan: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let catalog = Catalog::from_json_file(&cli.catalog)
        .with_context(|| format!("loading catalog {}", cli.catalog.display()))?;
    let text = std::fs::read_to_string(&cli.request)
        .with_context(|| format!("reading request {}", cli.request.display()))?;
    let request = BatchRequest::from_json_str(&text).context("parsing batch request")?;
    let config = RunConfig::from_env().context("reading REGRID_* environment")?;
    let workers = cli.workers.unwrap_or_else(|| config.workers());

    let scheduler = Scheduler::builder(Arc::new(catalog)).config(config).build();
    let jobs = scheduler.build_jobs(&request).context("building job list")?;
    info!(jobs = jobs.len(), kind = %request.kind, "job list built");

    match cli.command.as_ref().unwrap_or(&Commands::Plan { json: false }) {
        Commands::Plan { json } => {
            let entries = scheduler.plan(&jobs);
            if *json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    let action = match &entry.action {
                        PlannedAction::Compute { reason } => format!("compute ({reason})"),
                        PlannedAction::Skip { reason } => format!("skip ({reason})"),
                        PlannedAction::Fail { error_kind, reason } => {
                            format!("fail ({error_kind}: {reason})")
                        }
                    };
                    let sink = entry
                        .sink
                        .as_ref()
                        .map_or_else(|| "-".to_string(), |p| p.display().to_string());
                    println!("{:>4}  {:<40}  {action}\n      {sink}", entry.job_id, entry.job);
                }
            }
            let failed = entries
                .iter()
                .any(|e| matches!(e.action, PlannedAction::Fail { .. }));
            Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }
        Commands::Run => {
            let report = scheduler.run_with_workers(&jobs, workers)?;
            println!("{report}");
            Ok(ExitCode::from(u8::try_from(report.exit_code()).unwrap_or(1)))
        }
    }
}
