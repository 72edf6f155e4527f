//! Command-line interface

use bisect_core::{BisectConfig, BisectMode, ListOrder, SolverKind, TimeoutPolicy};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bisect a revision list for the commit that introduced or fixed a bug
    Run(RunArgs),
    /// Print the revision history of a checkout in revision-list format
    List(ListArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Revision list file, one `<hash> [subject]` per line
    pub revisions: PathBuf,

    /// Solver under test (z3, cvc5, cvc4)
    pub solver: SolverKind,

    /// Text whose presence in the solver output means the bug reproduced
    pub marker: String,

    /// Reproduction input passed to the solver
    pub input: PathBuf,

    /// Transition to search for (inducing, fixing)
    pub mode: BisectMode,

    /// Newest revision of the range, included (defaults to the newest listed)
    #[arg(long)]
    pub start: Option<String>,

    /// Revision just before the range, excluded (defaults to the whole list)
    #[arg(long)]
    pub end: Option<String>,

    /// Pristine solver checkout (overrides BISECT_PROJECT_ROOT)
    #[arg(long)]
    pub project_root: Option<PathBuf>,

    /// Parallel build jobs (overrides BISECT_JOBS)
    #[arg(long, short = 'j')]
    pub jobs: Option<usize>,

    /// Build with AddressSanitizer
    #[arg(long, default_value_t = false)]
    pub sanitizer: bool,

    /// Wall-clock limit for one solver run (overrides BISECT_TEST_TIMEOUT_SECS)
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Build attempts per step before the range is declared unevaluable
    #[arg(long)]
    pub max_build_attempts: Option<u32>,

    /// Seed for candidate re-selection after failed builds
    #[arg(long)]
    pub seed: Option<u64>,

    /// Classification of a timed-out run (bug-absent, bug-present, indeterminate)
    #[arg(long)]
    pub timeout_policy: Option<TimeoutPolicy>,

    /// The revision list is newest first (`git log` order)
    #[arg(long, conflicts_with = "oldest_first")]
    pub newest_first: bool,

    /// The revision list is oldest first
    #[arg(long)]
    pub oldest_first: bool,

    /// Write the JSON run report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl RunArgs {
    /// Apply flags on top of file and environment settings
    pub fn apply_to(&self, config: &mut BisectConfig) {
        if let Some(root) = &self.project_root {
            config.project_root = Some(root.clone());
        }
        if let Some(jobs) = self.jobs {
            config.build.jobs = jobs;
        }
        if self.sanitizer {
            config.build.sanitizer = true;
        }
        if let Some(secs) = self.timeout_secs {
            config.test.timeout_secs = secs;
        }
        if let Some(policy) = self.timeout_policy {
            config.test.timeout_policy = policy;
        }
        if let Some(attempts) = self.max_build_attempts {
            config.retry.max_build_attempts = attempts;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if self.newest_first {
            config.list_order = ListOrder::NewestFirst;
        } else if self.oldest_first {
            config.list_order = ListOrder::OldestFirst;
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Solver checkout to read history from
    pub project_root: PathBuf,

    /// Revision range understood by `git log`, e.g. `z3-4.12.0..HEAD`
    #[arg(long)]
    pub range: Option<String>,
}
