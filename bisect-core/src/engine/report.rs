//! Bisection Report: structured record of one search
//!
//! Serializable so a long run can be inspected after the fact.

use super::BisectMode;
use crate::solver::SolverKind;
use crate::test_runner::{Termination, TestOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One evaluated candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-indexed search step
    pub step: u32,
    /// Index of the evaluated revision in the chronological list
    pub index: usize,
    pub revision: String,
    /// Range bounds before this step
    pub low: usize,
    pub high: usize,
    /// Builds attempted for this step (re-rolled candidates included)
    pub build_attempts: u32,
    pub outcome: TestOutcome,
    pub termination: Termination,
    pub duration_ms: u64,
}

/// Terminal state of a search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BisectOutcome {
    /// Transition point found
    Found { index: usize, revision: String },
    /// Range exhausted, no revision satisfies the narrowing condition
    NoCandidate,
    /// The oracle could not answer for `revision`; bounds at the time of the stop
    Indeterminate {
        revision: String,
        low: usize,
        high: usize,
    },
    /// No candidate in the range could be built within the retry budget
    Unevaluable {
        low: usize,
        high: usize,
        attempts: u32,
        last_error: String,
    },
}

impl BisectOutcome {
    pub fn revision(&self) -> Option<&str> {
        match self {
            Self::Found { revision, .. } => Some(revision),
            _ => None,
        }
    }
}

impl std::fmt::Display for BisectOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Found { revision, .. } => write!(f, "found {revision}"),
            Self::NoCandidate => write!(f, "no candidate revision in range"),
            Self::Indeterminate {
                revision,
                low,
                high,
            } => write!(
                f,
                "indeterminate result for {revision} with range [{low}, {high}]; inspect manually"
            ),
            Self::Unevaluable {
                low,
                high,
                attempts,
                last_error,
            } => write!(
                f,
                "could not evaluate range [{low}, {high}] after {attempts} build attempts: {last_error}"
            ),
        }
    }
}

/// Full record of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BisectReport {
    pub mode: BisectMode,
    pub solver: SolverKind,
    pub marker: String,
    pub input: PathBuf,
    pub revision_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    pub outcome: Option<BisectOutcome>,
}

impl BisectReport {
    pub fn new(
        mode: BisectMode,
        solver: SolverKind,
        marker: impl Into<String>,
        input: impl Into<PathBuf>,
        revision_count: usize,
    ) -> Self {
        Self {
            mode,
            solver,
            marker: marker.into(),
            input: input.into(),
            revision_count,
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            outcome: None,
        }
    }

    pub fn record(&mut self, step: StepRecord) {
        self.steps.push(step);
    }

    pub fn finish(&mut self, outcome: BisectOutcome) {
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
    }

    /// Resolved revision, if the search found one
    pub fn resolved_revision(&self) -> Option<&str> {
        self.outcome.as_ref().and_then(BisectOutcome::revision)
    }

    /// Total builds attempted across all steps
    pub fn total_build_attempts(&self) -> u32 {
        self.steps.iter().map(|s| s.build_attempts).sum()
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        let outcome = self
            .outcome
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "in progress".to_string());
        format!(
            "{} {} search over {} revisions: {} ({} steps, {} builds)",
            self.solver,
            self.mode,
            self.revision_count,
            outcome,
            self.steps.len(),
            self.total_build_attempts()
        )
    }
}
