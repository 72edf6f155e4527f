//! End-to-end bisection over a scripted z3 history.
//!
//! The pristine checkout is a plain directory; `make` is scripted to drop a
//! fake `build/z3` whose content names the revision it was "built" from, and
//! the solver run answers from that content.

use bisect_core::{
    BisectMode, BisectOutcome, BisectionRequest, Bisector, BuildCache, BuildOptions,
    CommandOutput, CommandSpec, ListOrder, RetryPolicy, RevisionList, ScriptedRunner, SolverKind,
    TestOutcome, TestRunner,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// git log --format='%h %s', newest first
const HISTORY: &str = "\
h9 Bump version
h8 Fix arith solver crash (#7001)
h7 Refactor rewriter
h6 Add nlsat option
h5 Merge pull request #6990
h4 Update CI
h3 Simplify seq theory
h2 Inline helper
h1 Clean up includes
h0 Release 4.12.0
";

const ASAN_REPORT: &str = "=================================================================\n\
==12345==ERROR: AddressSanitizer: heap-use-after-free on address 0x602000000010\n";

fn pristine(root: &Path) -> PathBuf {
    let project = root.join("z3");
    std::fs::create_dir_all(project.join("scripts")).unwrap();
    std::fs::create_dir_all(project.join(".git")).unwrap();
    std::fs::write(project.join("scripts/mk_make.py"), "# generator").unwrap();
    project
}

/// Revision a cache directory was created for: `<parent>/z3_<rev>[/build]`
fn revision_of(dir: &Path) -> String {
    dir.ancestors()
        .filter_map(|p| p.file_name())
        .filter_map(|n| n.to_str())
        .find_map(|n| n.strip_prefix("z3_"))
        .unwrap()
        .to_string()
}

/// Toolchain plus solver, where `buggy(rev)` decides the solver's behavior
/// and `broken(rev)` makes `make` fail
fn scripted_world<B, F>(buggy: B, broken: F) -> Arc<ScriptedRunner>
where
    B: Fn(&str) -> bool + Send + Sync + 'static,
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    Arc::new(ScriptedRunner::new(move |spec: &CommandSpec| {
        match spec.program.as_str() {
            "git" => Ok(CommandOutput::ok()),
            "python3" => {
                let cwd = spec.cwd.as_ref().unwrap();
                std::fs::create_dir_all(cwd.join("build")).unwrap();
                Ok(CommandOutput::ok())
            }
            "make" => {
                let cwd = spec.cwd.as_ref().unwrap();
                let rev = revision_of(cwd);
                if broken(&rev) {
                    return Ok(CommandOutput::exited(2, "", "error: ld returned 1"));
                }
                std::fs::write(cwd.join("z3"), &rev).unwrap();
                Ok(CommandOutput::ok())
            }
            binary => {
                let rev = std::fs::read_to_string(binary).unwrap();
                if buggy(&rev) {
                    Ok(CommandOutput::exited(1, "", ASAN_REPORT))
                } else {
                    Ok(CommandOutput::exited(0, "sat\n", ""))
                }
            }
        }
    }))
}

fn index(rev: &str) -> usize {
    rev[1..].parse().unwrap()
}

fn request(revisions: Vec<bisect_core::Revision>, mode: BisectMode) -> BisectionRequest {
    BisectionRequest {
        revisions,
        solver: SolverKind::Z3,
        input: PathBuf::from("bug.smt2"),
        marker: "AddressSanitizer".to_string(),
        mode,
    }
}

fn engine(project: &Path, runner: Arc<ScriptedRunner>) -> Bisector<BuildCache, TestRunner> {
    let cache = BuildCache::new(project, SolverKind::Z3, runner.clone()).with_options(
        BuildOptions {
            jobs: 2,
            sanitizer: true,
        },
    );
    let tests = TestRunner::new(runner, SolverKind::Z3, Duration::from_secs(10));
    Bisector::new(cache, tests)
        .with_retry(RetryPolicy::immediate(8))
        .with_seed(Some(42))
}

#[tokio::test]
async fn test_finds_inducing_commit_and_reuses_cached_builds() {
    let tmp = tempfile::tempdir().unwrap();
    let project = pristine(tmp.path());
    let runner = scripted_world(|rev| index(rev) >= 6, |_| false);

    let list = RevisionList::parse(HISTORY, ListOrder::NewestFirst);
    let revisions = list.slice(None, None).unwrap();
    assert_eq!(revisions.first().unwrap().id, "h0");

    let bisector = engine(&project, runner.clone());
    let report = bisector.run(&request(revisions.clone(), BisectMode::Inducing)).await;

    assert_eq!(report.resolved_revision(), Some("h6"));
    assert!(report.steps.len() <= 4);
    let builds = runner.count("make");
    assert_eq!(builds, report.steps.len());

    // Every evaluated revision left a pruned cache entry
    for step in &report.steps {
        let dir = tmp.path().join(format!("z3_{}", step.revision));
        assert!(dir.join("build/z3").is_file());
        assert!(!dir.join("scripts").exists());
    }

    // A second run over the same history builds nothing new
    let again = bisector.run(&request(revisions, BisectMode::Inducing)).await;
    assert_eq!(again.resolved_revision(), Some("h6"));
    assert_eq!(runner.count("make"), builds);
}

#[tokio::test]
async fn test_finds_fixing_commit_within_sliced_range() {
    let tmp = tempfile::tempdir().unwrap();
    let project = pristine(tmp.path());
    let runner = scripted_world(|rev| index(rev) < 8, |_| false);

    let list = RevisionList::parse(HISTORY, ListOrder::NewestFirst);
    // everything newer than h2
    let revisions = list.slice(None, Some("h2")).unwrap();
    assert_eq!(revisions.len(), 7);
    assert_eq!(revisions[0].id, "h3");

    let report = engine(&project, runner.clone())
        .run(&request(revisions, BisectMode::Fixing))
        .await;

    assert_eq!(report.resolved_revision(), Some("h8"));
    // nothing outside the slice was ever built
    assert!(!tmp.path().join("z3_h2").exists());
    assert!(!tmp.path().join("z3_h0").exists());

    // sanitizer flags reach both build steps
    let make = runner
        .calls()
        .into_iter()
        .find(|c| c.program == "make")
        .unwrap();
    assert_eq!(make.args, vec!["-j2"]);
    assert!(make
        .env
        .iter()
        .any(|(k, v)| k == "CXXFLAGS" && v.contains("-fsanitize=address")));
}

#[tokio::test]
async fn test_skips_unbuildable_revisions() {
    let tmp = tempfile::tempdir().unwrap();
    let project = pristine(tmp.path());
    let runner = scripted_world(|rev| index(rev) >= 3, |rev| rev == "h4" || rev == "h7");

    let revisions = RevisionList::parse(HISTORY, ListOrder::NewestFirst)
        .slice(None, None)
        .unwrap();
    let report = engine(&project, runner)
        .run(&request(revisions, BisectMode::Inducing))
        .await;

    assert_eq!(report.resolved_revision(), Some("h3"));
    // failed builds never leave a cache directory behind
    assert!(!tmp.path().join("z3_h4").exists());
    assert!(!tmp.path().join("z3_h7").exists());
}

#[tokio::test]
async fn test_bug_present_everywhere_blames_oldest_revision() {
    let tmp = tempfile::tempdir().unwrap();
    let project = pristine(tmp.path());
    let runner = scripted_world(|_| true, |_| false);

    let revisions = RevisionList::parse(HISTORY, ListOrder::NewestFirst)
        .slice(None, None)
        .unwrap();
    let report = engine(&project, runner)
        .run(&request(revisions, BisectMode::Inducing))
        .await;

    assert_eq!(
        report.outcome,
        Some(BisectOutcome::Found {
            index: 0,
            revision: "h0".to_string(),
        })
    );
}

#[tokio::test]
async fn test_bug_never_fixed_has_no_candidate() {
    let tmp = tempfile::tempdir().unwrap();
    let project = pristine(tmp.path());
    let runner = scripted_world(|_| true, |_| false);

    let revisions = RevisionList::parse(HISTORY, ListOrder::NewestFirst)
        .slice(None, None)
        .unwrap();
    let report = engine(&project, runner)
        .run(&request(revisions, BisectMode::Fixing))
        .await;

    assert_eq!(report.outcome, Some(BisectOutcome::NoCandidate));
    assert!(report
        .steps
        .iter()
        .all(|s| s.outcome == TestOutcome::BugPresent));
}

#[cfg(unix)]
#[tokio::test]
async fn test_real_solver_process_is_classified() {
    use bisect_core::ProcessRunner;
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().unwrap();
    let project = pristine(tmp.path());

    // Build is scripted; the produced binary is a real shell script
    let builds = Arc::new(ScriptedRunner::new(|spec: &CommandSpec| {
        let cwd = spec.cwd.as_ref().unwrap();
        match spec.program.as_str() {
            "python3" => std::fs::create_dir_all(cwd.join("build")).unwrap(),
            "make" => {
                let rev = revision_of(cwd);
                let script = if index(&rev) >= 5 {
                    "#!/bin/sh\necho '==1==ERROR: AddressSanitizer: SEGV' >&2\nexit 1\n"
                } else {
                    "#!/bin/sh\necho sat\n"
                };
                let binary = cwd.join("z3");
                std::fs::write(&binary, script).unwrap();
                std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755))
                    .unwrap();
            }
            _ => {}
        }
        Ok(CommandOutput::ok())
    }));

    let cache = BuildCache::new(&project, SolverKind::Z3, builds);
    let tests = TestRunner::new(
        Arc::new(ProcessRunner::new()),
        SolverKind::Z3,
        Duration::from_secs(10),
    );
    let bisector = Bisector::new(cache, tests)
        .with_retry(RetryPolicy::immediate(8))
        .with_seed(Some(3));

    let revisions = RevisionList::parse(HISTORY, ListOrder::NewestFirst)
        .slice(None, None)
        .unwrap();
    let report = bisector
        .run(&request(revisions, BisectMode::Inducing))
        .await;

    assert_eq!(report.resolved_revision(), Some("h5"));
}
