//! Bisection Engine: binary search over a chronological revision list
//!
//! Each step materializes the midpoint revision, asks the oracle whether the
//! bug is present, and narrows the [`SearchRange`] toward the transition:
//!
//! ```text
//!              bug present        bug absent
//! inducing     keep [low, mid-1]  keep [mid+1, high]
//! fixing       keep [mid+1, high] keep [low, mid-1]
//! ```
//!
//! The search ends when `low > high`; the answer is the revision at `low`
//! (the earliest revision where the bug appears, or disappears), if any.
//!
//! A candidate that fails to build is replaced by a uniformly random index
//! in the current range, with bounded attempts and exponential backoff. An
//! indeterminate oracle answer stops the search immediately.

pub mod range;
pub mod report;

pub use range::SearchRange;
pub use report::{BisectOutcome, BisectReport, StepRecord};

use crate::build_cache::BuildArtifact;
use crate::config::RetryConfig;
use crate::error::{BisectError, BisectResult};
use crate::revisions::Revision;
use crate::solver::SolverKind;
use crate::test_runner::{Evaluation, TestOutcome};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which transition the search is looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BisectMode {
    /// First revision where the bug is present
    Inducing,
    /// First revision where the bug is gone
    Fixing,
}

impl BisectMode {
    /// Whether `outcome` puts a revision on the far side of the transition.
    /// `None` for outcomes that cannot steer the search.
    pub fn is_transitioned(&self, outcome: TestOutcome) -> Option<bool> {
        match (self, outcome) {
            (_, TestOutcome::Indeterminate) => None,
            (Self::Inducing, TestOutcome::BugPresent) => Some(true),
            (Self::Inducing, TestOutcome::BugAbsent) => Some(false),
            (Self::Fixing, TestOutcome::BugPresent) => Some(false),
            (Self::Fixing, TestOutcome::BugAbsent) => Some(true),
        }
    }
}

impl std::fmt::Display for BisectMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inducing => write!(f, "inducing"),
            Self::Fixing => write!(f, "fixing"),
        }
    }
}

impl std::str::FromStr for BisectMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inducing" => Ok(Self::Inducing),
            "fixing" => Ok(Self::Fixing),
            other => Err(format!(
                "unknown mode '{other}' (expected inducing or fixing)"
            )),
        }
    }
}

/// Immutable description of one search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BisectionRequest {
    /// Candidates, oldest first
    pub revisions: Vec<Revision>,
    pub solver: SolverKind,
    /// Reproduction input
    pub input: PathBuf,
    pub marker: String,
    pub mode: BisectMode,
}

/// Produces runnable artifacts for revisions
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn materialize(&self, revision: &Revision) -> BisectResult<BuildArtifact>;
}

/// Answers "is the bug present in this artifact?"
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn evaluate(&self, artifact: &BuildArtifact, input: &Path, marker: &str) -> Evaluation;
}

/// Bounded retry for candidates that fail to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Build attempts per search step, re-rolled candidates included
    pub max_build_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_build_attempts: config.max_build_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts
    pub fn immediate(max_build_attempts: u32) -> Self {
        Self {
            max_build_attempts: max_build_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the `failures`-th consecutive failure: base, 2x base, 4x base, ...
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// A candidate that built successfully
struct Candidate {
    index: usize,
    artifact: BuildArtifact,
    attempts: u32,
}

/// Retry budget exhausted for one step
struct CandidateFailure {
    attempts: u32,
    last_error: BisectError,
}

/// The search driver
pub struct Bisector<A, O> {
    source: A,
    oracle: O,
    retry: RetryPolicy,
    seed: Option<u64>,
}

impl<A: ArtifactSource, O: Oracle> Bisector<A, O> {
    pub fn new(source: A, oracle: O) -> Self {
        Self {
            source,
            oracle,
            retry: RetryPolicy::default(),
            seed: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fix the RNG used for candidate re-selection
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn source(&self) -> &A {
        &self.source
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Search the whole revision list
    pub async fn run(&self, request: &BisectionRequest) -> BisectReport {
        self.search(request, SearchRange::full(request.revisions.len()))
            .await
    }

    /// Search starting from `initial`
    pub async fn search(&self, request: &BisectionRequest, initial: SearchRange) -> BisectReport {
        let revisions = &request.revisions;
        let mut report = BisectReport::new(
            request.mode,
            request.solver,
            &request.marker,
            &request.input,
            revisions.len(),
        );
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut range = initial.clamp_to(revisions.len());
        let mut step = 0u32;

        while let Some(mid) = range.midpoint() {
            step += 1;
            let (low, high) = (range.low(), range.high().unwrap_or_default());
            tracing::info!(
                step,
                low,
                high,
                mid,
                revision = %revisions[mid].id,
                remaining = range.len(),
                "Bisecting"
            );

            let candidate = match self.build_candidate(revisions, range, mid, &mut rng).await {
                Ok(candidate) => candidate,
                Err(failure) => {
                    tracing::error!(
                        low,
                        high,
                        attempts = failure.attempts,
                        error = %failure.last_error,
                        "No buildable candidate within retry budget"
                    );
                    report.finish(BisectOutcome::Unevaluable {
                        low,
                        high,
                        attempts: failure.attempts,
                        last_error: failure.last_error.to_string(),
                    });
                    return report;
                }
            };

            let revision = &revisions[candidate.index];
            let evaluation = self
                .oracle
                .evaluate(&candidate.artifact, &request.input, &request.marker)
                .await;

            report.record(StepRecord {
                step,
                index: candidate.index,
                revision: revision.id.clone(),
                low,
                high,
                build_attempts: candidate.attempts,
                outcome: evaluation.outcome,
                termination: evaluation.termination.clone(),
                duration_ms: evaluation.duration_ms,
            });

            let Some(transitioned) = request.mode.is_transitioned(evaluation.outcome) else {
                tracing::error!(
                    revision = %revision.id,
                    low,
                    high,
                    termination = ?evaluation.termination,
                    "Indeterminate test outcome; stopping for manual inspection"
                );
                report.finish(BisectOutcome::Indeterminate {
                    revision: revision.id.clone(),
                    low,
                    high,
                });
                return report;
            };

            range = if transitioned {
                range.keep_below(candidate.index)
            } else {
                range.keep_above(candidate.index)
            };
            tracing::info!(
                revision = %revision.id,
                outcome = %evaluation.outcome,
                next = %range,
                "Candidate classified"
            );
        }

        let outcome = match revisions.get(range.low()) {
            Some(revision) => BisectOutcome::Found {
                index: range.low(),
                revision: revision.id.clone(),
            },
            None => BisectOutcome::NoCandidate,
        };
        tracing::info!(%outcome, steps = step, "Bisection concluded");
        report.finish(outcome);
        report
    }

    /// Build `mid`, re-rolling a random index in `range` after each failure
    async fn build_candidate(
        &self,
        revisions: &[Revision],
        range: SearchRange,
        mid: usize,
        rng: &mut StdRng,
    ) -> Result<Candidate, CandidateFailure> {
        let mut index = mid;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.source.materialize(&revisions[index]).await {
                Ok(artifact) => {
                    return Ok(Candidate {
                        index,
                        artifact,
                        attempts,
                    })
                }
                Err(e) => {
                    tracing::warn!(
                        revision = %revisions[index].id,
                        attempt = attempts,
                        max_attempts = self.retry.max_build_attempts,
                        error = %e,
                        "Candidate failed to build"
                    );
                    if attempts >= self.retry.max_build_attempts {
                        return Err(CandidateFailure {
                            attempts,
                            last_error: e,
                        });
                    }
                    let delay = self.retry.delay_after(attempts);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    index = range.random_index(rng).unwrap_or(mid);
                }
            }
        }
    }
}
