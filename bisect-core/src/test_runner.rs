//! Test Runner: runs a built solver on the reproduction input and
//! classifies the run against the bug marker.
//!
//! # Classification
//!
//! ```text
//! could not launch                         → Indeterminate
//! timed out                                → TimeoutPolicy (default BugAbsent)
//! killed by a signal, marker absent        → Indeterminate
//! marker in output (minus the sat/unsat trap) → BugPresent
//! anything else                            → BugAbsent
//! ```

use crate::build_cache::BuildArtifact;
use crate::engine::Oracle;
use crate::error::BisectError;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec, ExitStatus};
use crate::solver::SolverKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Three-valued oracle answer for one revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    BugPresent,
    BugAbsent,
    /// The run could not be interpreted; the search must stop
    Indeterminate,
}

impl std::fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BugPresent => write!(f, "bug present"),
            Self::BugAbsent => write!(f, "bug absent"),
            Self::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// Classification applied when the solver run hits the timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// A hang counts as "marker not seen"
    #[default]
    BugAbsent,
    /// A hang is itself the bug
    BugPresent,
    /// A hang stops the search for manual inspection
    Indeterminate,
}

impl TimeoutPolicy {
    fn outcome(&self) -> TestOutcome {
        match self {
            Self::BugAbsent => TestOutcome::BugAbsent,
            Self::BugPresent => TestOutcome::BugPresent,
            Self::Indeterminate => TestOutcome::Indeterminate,
        }
    }
}

impl std::str::FromStr for TimeoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "bug_absent" | "absent" => Ok(Self::BugAbsent),
            "bug_present" | "present" => Ok(Self::BugPresent),
            "indeterminate" => Ok(Self::Indeterminate),
            other => Err(format!(
                "unknown timeout policy '{other}' (expected bug-absent, bug-present or indeterminate)"
            )),
        }
    }
}

/// How the solver process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Termination {
    Exited { code: i32 },
    Signaled { signal: i32 },
    TimedOut,
    LaunchFailed { message: String },
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Exited(code) => Self::Exited { code },
            ExitStatus::Signaled(signal) => Self::Signaled { signal },
            ExitStatus::TimedOut => Self::TimedOut,
        }
    }
}

/// Detailed result of one evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub outcome: TestOutcome,
    pub termination: Termination,
    /// Marker found in the captured output (after the sat/unsat guard)
    pub marker_found: bool,
    pub duration_ms: u64,
}

/// Marker test on captured output.
///
/// Plain substring search, except that a marker starting with `sat` never
/// matches output that begins with `unsat`: `unsat` contains `sat`.
pub fn marker_matches(output: &str, marker: &str) -> bool {
    if !output.contains(marker) {
        return false;
    }
    !(marker.starts_with("sat") && output.starts_with("unsat"))
}

/// Classify a finished command against `marker`
pub fn classify(output: &CommandOutput, marker: &str, timeout_policy: TimeoutPolicy) -> Evaluation {
    let text = output.combined();
    let marker_found = marker_matches(&text, marker);

    let outcome = match output.status {
        ExitStatus::TimedOut => timeout_policy.outcome(),
        ExitStatus::Signaled(_) if !marker_found => TestOutcome::Indeterminate,
        _ if marker_found => TestOutcome::BugPresent,
        _ => TestOutcome::BugAbsent,
    };

    Evaluation {
        outcome,
        termination: output.status.into(),
        marker_found,
        duration_ms: output.duration.as_millis() as u64,
    }
}

/// Runs built solvers against a reproduction input
pub struct TestRunner {
    runner: Arc<dyn CommandRunner>,
    solver: SolverKind,
    timeout: Duration,
    timeout_policy: TimeoutPolicy,
    capture_path: Option<PathBuf>,
}

impl TestRunner {
    pub fn new(runner: Arc<dyn CommandRunner>, solver: SolverKind, timeout: Duration) -> Self {
        Self {
            runner,
            solver,
            timeout,
            timeout_policy: TimeoutPolicy::default(),
            capture_path: None,
        }
    }

    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    /// Write the combined output of every run to `path`
    pub fn with_capture_path(mut self, path: Option<PathBuf>) -> Self {
        self.capture_path = path;
        self
    }

    /// Evaluate a built artifact
    pub async fn evaluate(&self, artifact: &BuildArtifact, input: &Path, marker: &str) -> Evaluation {
        self.evaluate_binary(&artifact.binary, input, marker, self.timeout)
            .await
    }

    /// Run `binary` on `input` under `timeout` and classify the output
    pub async fn evaluate_binary(
        &self,
        binary: &Path,
        input: &Path,
        marker: &str,
        timeout: Duration,
    ) -> Evaluation {
        let start = Instant::now();
        let spec = CommandSpec::new(binary.display().to_string())
            .args(self.solver.run_args(input))
            .timeout(timeout);

        let output = match self.runner.run(&spec).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(binary = %binary.display(), error = %e, "Solver could not be launched");
                let message = match e {
                    BisectError::SpawnFailed { message, .. } => message,
                    other => other.to_string(),
                };
                return Evaluation {
                    outcome: TestOutcome::Indeterminate,
                    termination: Termination::LaunchFailed { message },
                    marker_found: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
        };

        if let Some(path) = &self.capture_path {
            if let Err(e) = std::fs::write(path, output.combined()) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write captured output");
            }
        }

        let evaluation = classify(&output, marker, self.timeout_policy);
        tracing::debug!(
            binary = %binary.display(),
            status = %output.status,
            marker_found = evaluation.marker_found,
            outcome = %evaluation.outcome,
            "Solver run classified"
        );
        evaluation
    }
}

#[async_trait]
impl Oracle for TestRunner {
    async fn evaluate(&self, artifact: &BuildArtifact, input: &Path, marker: &str) -> Evaluation {
        TestRunner::evaluate(self, artifact, input, marker).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScriptedRunner;

    fn artifact() -> BuildArtifact {
        BuildArtifact {
            revision: "abc1234".to_string(),
            root: PathBuf::from("/work/z3_abc1234"),
            binary: PathBuf::from("/work/z3_abc1234/build/z3"),
        }
    }

    fn runner_returning(output: CommandOutput) -> Arc<ScriptedRunner> {
        Arc::new(ScriptedRunner::new(move |_| Ok(output.clone())))
    }

    #[test]
    fn test_marker_sat_unsat_trap() {
        assert!(!marker_matches("unsat\n", "sat"));
        assert!(!marker_matches("unsat\n(model sat)\n", "sat"));
        assert!(marker_matches("sat\n", "sat"));
        assert!(marker_matches("unknown\nsat\n", "sat"));
    }

    #[test]
    fn test_marker_anywhere_in_output() {
        let text = "unsat\n=================================================================\n==1234==ERROR: AddressSanitizer: heap-use-after-free";
        assert!(marker_matches(text, "AddressSanitizer"));
        assert!(!marker_matches("sat\n", "AddressSanitizer"));
    }

    #[test]
    fn test_classify_marker_in_stderr() {
        let output = CommandOutput::exited(1, "unsat\n", "ERROR: AddressSanitizer: SEGV\n");
        let evaluation = classify(&output, "AddressSanitizer", TimeoutPolicy::BugAbsent);
        assert_eq!(evaluation.outcome, TestOutcome::BugPresent);
        assert_eq!(evaluation.termination, Termination::Exited { code: 1 });
    }

    #[test]
    fn test_classify_sat_marker_against_unsat_output() {
        let output = CommandOutput::exited(0, "unsat\n", "");
        let evaluation = classify(&output, "sat", TimeoutPolicy::BugAbsent);
        assert_eq!(evaluation.outcome, TestOutcome::BugAbsent);
        assert!(!evaluation.marker_found);
    }

    #[test]
    fn test_classify_timeout_follows_policy() {
        let output = CommandOutput::timed_out("");
        assert_eq!(
            classify(&output, "BUG", TimeoutPolicy::BugAbsent).outcome,
            TestOutcome::BugAbsent
        );
        assert_eq!(
            classify(&output, "BUG", TimeoutPolicy::BugPresent).outcome,
            TestOutcome::BugPresent
        );
        assert_eq!(
            classify(&output, "BUG", TimeoutPolicy::Indeterminate).outcome,
            TestOutcome::Indeterminate
        );
    }

    #[test]
    fn test_classify_crash_without_marker_is_indeterminate() {
        let output = CommandOutput::signaled(11, "Segmentation fault");
        let evaluation = classify(&output, "AddressSanitizer", TimeoutPolicy::BugAbsent);
        assert_eq!(evaluation.outcome, TestOutcome::Indeterminate);

        let with_marker = CommandOutput::signaled(6, "AddressSanitizer: abort");
        assert_eq!(
            classify(&with_marker, "AddressSanitizer", TimeoutPolicy::BugAbsent).outcome,
            TestOutcome::BugPresent
        );
    }

    #[test]
    fn test_parse_timeout_policy() {
        assert_eq!(
            "bug-absent".parse::<TimeoutPolicy>().unwrap(),
            TimeoutPolicy::BugAbsent
        );
        assert_eq!(
            "Indeterminate".parse::<TimeoutPolicy>().unwrap(),
            TimeoutPolicy::Indeterminate
        );
        assert!("retry".parse::<TimeoutPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_evaluate_runs_binary_on_input_with_timeout() {
        let runner = runner_returning(CommandOutput::exited(0, "sat\n", ""));
        let tests = TestRunner::new(runner.clone(), SolverKind::Z3, Duration::from_secs(10));

        let evaluation = tests
            .evaluate(&artifact(), Path::new("/work/bug.smt2"), "sat")
            .await;

        assert_eq!(evaluation.outcome, TestOutcome::BugPresent);
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "/work/z3_abc1234/build/z3");
        assert_eq!(calls[0].args, vec!["/work/bug.smt2"]);
        assert_eq!(calls[0].timeout, Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_launch_failure_is_indeterminate() {
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            Err(BisectError::spawn(&spec.program, "No such file or directory"))
        }));
        let tests = TestRunner::new(runner, SolverKind::Cvc5, Duration::from_secs(10));

        let evaluation = tests
            .evaluate(&artifact(), Path::new("/work/bug.smt2"), "BUG")
            .await;

        assert_eq!(evaluation.outcome, TestOutcome::Indeterminate);
        assert_eq!(
            evaluation.termination,
            Termination::LaunchFailed {
                message: "No such file or directory".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_capture_file_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("output.txt");
        let runner = runner_returning(CommandOutput::exited(0, "unsat\n", "stats\n"));
        let tests = TestRunner::new(runner, SolverKind::Z3, Duration::from_secs(1))
            .with_capture_path(Some(capture.clone()));

        let evaluation = tests
            .evaluate(&artifact(), Path::new("bug.smt2"), "sat")
            .await;

        assert_eq!(evaluation.outcome, TestOutcome::BugAbsent);
        assert_eq!(std::fs::read_to_string(&capture).unwrap(), "unsat\nstats\n");
    }
}
