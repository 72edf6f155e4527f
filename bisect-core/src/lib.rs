//! Solver Bisect Library
//!
//! This library provides:
//! - Revision list loading and range slicing
//! - A per-revision build cache for z3, cvc5 and cvc4 source trees
//! - A test oracle that runs a built solver and matches a bug marker
//! - A binary search engine over the revision history
//!
//! # Pipeline
//!
//! ```text
//! RevisionList::slice ──► Bisector::run
//!                            │
//!                            ├─► BuildCache::materialize   (copy, checkout, build, prune)
//!                            └─► TestRunner::evaluate      (run, classify)
//! ```
//!
//! # Usage
//!
//! ```bash
//! # Find the commit that introduced an ASAN crash
//! solver-bisect run revisions.txt z3 AddressSanitizer bug.smt2 inducing \
//!     --project-root ~/z3 --start a1b2c3d --end 9f8e7d6 --sanitizer
//!
//! # Produce a revision list from a checkout
//! solver-bisect list ~/z3 --range v4.12.0..HEAD > revisions.txt
//! ```

pub mod build_cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod revisions;
pub mod runner;
pub mod solver;
pub mod test_runner;
pub mod vcs;

// Re-export key engine types
pub use engine::{
    ArtifactSource, BisectMode, BisectOutcome, BisectReport, BisectionRequest, Bisector, Oracle,
    RetryPolicy, SearchRange, StepRecord,
};

// Re-export build and test types
pub use build_cache::{BuildArtifact, BuildCache, CacheEntryStatus, CacheMarker};
pub use test_runner::{Evaluation, Termination, TestOutcome, TestRunner, TimeoutPolicy};

// Re-export process plumbing
pub use runner::{
    CommandOutput, CommandRunner, CommandSpec, ExitStatus, ProcessRunner, ScriptedRunner,
};

pub use config::{BisectConfig, BuildConfig, RetryConfig, TestConfig};
pub use error::{BisectError, BisectResult};
pub use revisions::{ListOrder, Revision, RevisionList};
pub use solver::{BuildOptions, SolverKind};
pub use vcs::GitClient;
