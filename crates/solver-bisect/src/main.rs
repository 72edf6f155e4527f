//! Solver Bisect
//!
//! Binary search over an SMT solver's revision history for the commit that
//! introduced (or fixed) a bug, building each candidate in its own cached
//! directory next to a pristine checkout.
//!
//! # Usage
//!
//! ```bash
//! # Which z3 commit introduced the ASAN report?
//! solver-bisect run commits.txt z3 AddressSanitizer bug.smt2 inducing \
//!     --project-root ~/z3 --sanitizer -j 16
//!
//! # Which cvc5 commit made `sat` go away, within a sub-range?
//! solver-bisect run commits.txt cvc5 sat bug.smt2 fixing \
//!     --project-root ~/cvc5 --start 76f9e1d2b --end e2db2b864
//!
//! # Revision list for a checkout
//! solver-bisect list ~/z3 --range z3-4.12.0..HEAD > commits.txt
//!
//! # Verbose logging
//! RUST_LOG=debug solver-bisect run ...
//! ```
//!
//! Exit codes: 0 found (revision on stdout), 1 no candidate in range,
//! 2 configuration error, 3 indeterminate test outcome, 4 range unbuildable.

mod cli;

use anyhow::{Context, Result};
use bisect_core::{
    BisectConfig, BisectOutcome, BisectReport, BisectionRequest, Bisector, BuildCache,
    CommandRunner, GitClient, ProcessRunner, RetryPolicy, RevisionList, TestRunner,
};
use clap::Parser;
use cli::{Args, Command, ListArgs, RunArgs};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

const EXIT_NO_CANDIDATE: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_INDETERMINATE: u8 = 3;
const EXIT_UNEVALUABLE: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "solver_bisect=info,bisect_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match args.command {
        Command::Run(run) => run_bisect(run).await,
        Command::List(list) => list_revisions(list).await.map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

/// Defaults, then the config file, then `BISECT_*`, then flags
fn load_config(args: &RunArgs) -> Result<BisectConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = BisectConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?;
            config
                .apply_env()
                .context("applying BISECT_* environment overrides")?;
            config
        }
        None => BisectConfig::from_env().context("reading BISECT_* environment")?,
    };
    args.apply_to(&mut config);
    config.validate()?;
    Ok(config)
}

async fn run_bisect(args: RunArgs) -> Result<ExitCode> {
    let config = load_config(&args)?;
    let project_root = config
        .project_root
        .clone()
        .context("no project root: pass --project-root or set BISECT_PROJECT_ROOT")?;
    anyhow::ensure!(
        project_root.is_dir(),
        "project root {} is not a directory",
        project_root.display()
    );
    anyhow::ensure!(
        args.input.is_file(),
        "reproduction input {} not found",
        args.input.display()
    );

    let list = RevisionList::load(&args.revisions, config.list_order)?;
    let revisions = list
        .slice(args.start.as_deref(), args.end.as_deref())
        .with_context(|| format!("selecting range from {}", args.revisions.display()))?;

    info!(
        solver = %args.solver,
        mode = %args.mode,
        candidates = revisions.len(),
        project_root = %project_root.display(),
        sanitizer = config.build.sanitizer,
        "Starting bisection"
    );

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
    let cache = BuildCache::new(&project_root, args.solver, runner.clone())
        .with_options(config.build.options())
        .with_step_timeout(config.build.step_timeout());
    let tests = TestRunner::new(runner, args.solver, config.test.timeout())
        .with_timeout_policy(config.test.timeout_policy)
        .with_capture_path(config.test.capture_path.clone());
    let bisector = Bisector::new(cache, tests)
        .with_retry(RetryPolicy::from(&config.retry))
        .with_seed(config.seed);

    let request = BisectionRequest {
        revisions,
        solver: args.solver,
        input: args.input.clone(),
        marker: args.marker.clone(),
        mode: args.mode,
    };
    let report = bisector.run(&request).await;
    info!("{}", report.summary());

    if let Some(path) = &args.report {
        if let Err(e) = write_report(path, &report) {
            tracing::warn!(path = %path.display(), "Failed to write report: {e:#}");
        }
    }

    if let Some(revision) = report.resolved_revision() {
        println!("{revision}");
    }
    Ok(ExitCode::from(exit_status(report.outcome.as_ref())))
}

fn write_report(path: &Path, report: &BisectReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "Report written");
    Ok(())
}

fn exit_status(outcome: Option<&BisectOutcome>) -> u8 {
    match outcome {
        Some(BisectOutcome::Found { .. }) => 0,
        Some(BisectOutcome::NoCandidate) | None => EXIT_NO_CANDIDATE,
        Some(BisectOutcome::Indeterminate { .. }) => EXIT_INDETERMINATE,
        Some(BisectOutcome::Unevaluable { .. }) => EXIT_UNEVALUABLE,
    }
}

async fn list_revisions(args: ListArgs) -> Result<()> {
    let git = GitClient::new(Arc::new(ProcessRunner::new()));
    let log = git
        .list_revisions(&args.project_root, args.range.as_deref())
        .await
        .with_context(|| format!("reading history of {}", args.project_root.display()))?;
    print!("{log}");
    Ok(())
}
