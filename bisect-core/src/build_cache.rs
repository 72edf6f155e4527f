//! Build Cache/Orchestrator
//!
//! Materializes one runnable solver per revision. Each revision gets its own
//! copy of the pristine checkout at `{project-root}_{revision}`; after a
//! successful build everything but `build/` is pruned to bound disk usage.
//!
//! A JSON marker inside every cache directory records the entry's status.
//! Only `Succeeded` entries are reused, so a build that died halfway is
//! rebuilt instead of being mistaken for a hit.

use crate::engine::ArtifactSource;
use crate::error::{BisectError, BisectResult};
use crate::revisions::Revision;
use crate::runner::{CommandRunner, CommandSpec};
use crate::solver::{BuildOptions, SolverKind, BUILD_DIR};
use crate::vcs::GitClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Status marker file kept inside every cache directory
pub const CACHE_MARKER_FILE: &str = ".solver-bisect.json";

/// Bytes of build output kept in a failure message
const BUILD_LOG_EXCERPT_BYTES: usize = 2048;

/// Default limit for a single configure/make step
const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// A built, runnable revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub revision: String,
    /// Cache directory of this revision
    pub root: PathBuf,
    /// Solver binary inside `root`
    pub binary: PathBuf,
}

impl BuildArtifact {
    pub fn build_dir(&self) -> PathBuf {
        self.root.join(BUILD_DIR)
    }
}

/// Lifecycle of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEntryStatus {
    /// Copy/checkout/build in progress (or interrupted)
    Pending,
    Succeeded,
    Failed,
}

/// Contents of [`CACHE_MARKER_FILE`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMarker {
    pub revision: String,
    pub solver: SolverKind,
    pub sanitizer: bool,
    pub status: CacheEntryStatus,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Filesystem-backed build cache
pub struct BuildCache {
    project_root: PathBuf,
    solver: SolverKind,
    options: BuildOptions,
    step_timeout: Duration,
    runner: Arc<dyn CommandRunner>,
    git: GitClient,
}

impl BuildCache {
    /// Create a cache around the pristine checkout at `project_root`
    pub fn new(
        project_root: impl AsRef<Path>,
        solver: SolverKind,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        // Re-collecting the components drops a trailing separator, so
        // "/work/z3/" still caches into "/work/z3_<rev>"
        let project_root: PathBuf = project_root.as_ref().components().collect();
        Self {
            project_root,
            solver,
            options: BuildOptions::default(),
            step_timeout: DEFAULT_STEP_TIMEOUT,
            git: GitClient::new(runner.clone()),
            runner,
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Cache directory for `revision`: `{project-root}_{revision}`
    pub fn cache_path(&self, revision: &str) -> PathBuf {
        let mut name = OsString::from(self.project_root.as_os_str());
        name.push("_");
        name.push(revision);
        PathBuf::from(name)
    }

    /// Read the status marker of a cache directory
    pub fn read_marker(dir: &Path) -> Option<CacheMarker> {
        let text = std::fs::read_to_string(dir.join(CACHE_MARKER_FILE)).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn write_marker(
        &self,
        dir: &Path,
        revision: &str,
        status: CacheEntryStatus,
        message: Option<String>,
    ) -> BisectResult<()> {
        let marker = CacheMarker {
            revision: revision.to_string(),
            solver: self.solver,
            sanitizer: self.options.sanitizer,
            status,
            updated_at: Utc::now(),
            message,
        };
        std::fs::write(
            dir.join(CACHE_MARKER_FILE),
            serde_json::to_string_pretty(&marker)?,
        )?;
        Ok(())
    }

    fn artifact_for(&self, revision: &str) -> BuildArtifact {
        let root = self.cache_path(revision);
        BuildArtifact {
            revision: revision.to_string(),
            binary: root.join(self.solver.binary_relative_path()),
            root,
        }
    }

    /// Existing successful entry for `revision`, if any
    pub fn lookup(&self, revision: &str) -> Option<BuildArtifact> {
        let artifact = self.artifact_for(revision);
        let marker = Self::read_marker(&artifact.root)?;
        let usable = marker.status == CacheEntryStatus::Succeeded
            && marker.solver == self.solver
            && marker.sanitizer == self.options.sanitizer
            && artifact.binary.is_file();
        usable.then_some(artifact)
    }

    /// Produce a runnable artifact for `revision`, building it if needed
    pub async fn materialize(&self, revision: &Revision) -> BisectResult<BuildArtifact> {
        if let Some(artifact) = self.lookup(&revision.id) {
            prune(&artifact.root)?;
            tracing::info!(revision = %revision.id, path = %artifact.root.display(), "Build cache hit");
            return Ok(artifact);
        }

        let dir = self.cache_path(&revision.id);
        if dir.exists() {
            let status = Self::read_marker(&dir).map(|m| m.status);
            tracing::warn!(
                revision = %revision.id,
                path = %dir.display(),
                ?status,
                "Discarding unusable cache entry"
            );
            std::fs::remove_dir_all(&dir)?;
        }

        let start = Instant::now();
        tracing::info!(revision = %revision.id, solver = %self.solver, path = %dir.display(), "Building revision");

        match self.build_fresh(&revision.id, &dir).await {
            Ok(artifact) => {
                tracing::info!(
                    revision = %revision.id,
                    elapsed_secs = start.elapsed().as_secs(),
                    "Build succeeded"
                );
                Ok(artifact)
            }
            Err(e) => {
                tracing::warn!(revision = %revision.id, error = %e, "Build failed");
                if dir.exists() {
                    if let Err(mark) = self.write_marker(
                        &dir,
                        &revision.id,
                        CacheEntryStatus::Failed,
                        Some(e.to_string()),
                    ) {
                        tracing::warn!(path = %dir.display(), error = %mark, "Failed to mark cache entry as failed");
                    }
                    if let Err(rm) = std::fs::remove_dir_all(&dir) {
                        tracing::warn!(path = %dir.display(), error = %rm, "Failed to remove broken cache entry");
                    }
                }
                Err(e)
            }
        }
    }

    async fn build_fresh(&self, revision: &str, dir: &Path) -> BisectResult<BuildArtifact> {
        std::fs::create_dir_all(dir)
            .map_err(|e| BisectError::build(revision, "copy", e.to_string()))?;
        self.write_marker(dir, revision, CacheEntryStatus::Pending, None)?;

        let src = self.project_root.clone();
        let dst = dir.to_path_buf();
        tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(|e| BisectError::build(revision, "copy", e.to_string()))?
            .map_err(|e| {
                BisectError::build(
                    revision,
                    "copy",
                    format!("{}: {e}", self.project_root.display()),
                )
            })?;

        self.git
            .checkout(dir, revision)
            .await
            .map_err(|e| BisectError::build(revision, "checkout", e.to_string()))?;

        for step in self.solver.build_steps(&self.options) {
            let cwd = match step.subdir {
                Some(sub) => dir.join(sub),
                None => dir.to_path_buf(),
            };
            let mut spec = CommandSpec::new(resolve_program(&cwd, &step.program))
                .args(step.args)
                .current_dir(&cwd)
                .timeout(self.step_timeout);
            for (key, value) in step.env {
                spec = spec.env(key, value);
            }

            tracing::info!(revision, step = step.name, command = %spec.display(), "Running build step");
            let output = self
                .runner
                .run(&spec)
                .await
                .map_err(|e| BisectError::build(revision, step.name, e.to_string()))?;
            if !output.success() {
                return Err(BisectError::build(
                    revision,
                    step.name,
                    format!(
                        "{}: {}",
                        output.status,
                        output.excerpt(BUILD_LOG_EXCERPT_BYTES)
                    ),
                ));
            }
        }

        let artifact = self.artifact_for(revision);
        if !artifact.binary.is_file() {
            return Err(BisectError::build(
                revision,
                "verify",
                format!("solver binary missing at {}", artifact.binary.display()),
            ));
        }

        prune(dir).map_err(|e| BisectError::build(revision, "prune", e.to_string()))?;
        self.write_marker(dir, revision, CacheEntryStatus::Succeeded, None)?;
        Ok(artifact)
    }
}

#[async_trait]
impl ArtifactSource for BuildCache {
    async fn materialize(&self, revision: &Revision) -> BisectResult<BuildArtifact> {
        BuildCache::materialize(self, revision).await
    }
}

/// In-tree scripts (`./configure.sh`) are resolved against the step's
/// directory; everything else is looked up on PATH.
fn resolve_program(cwd: &Path, program: &str) -> String {
    match program.strip_prefix("./") {
        Some(script) => cwd.join(script).display().to_string(),
        None => program.to_string(),
    }
}

/// Remove everything in `dir` except the build output and the marker
fn prune(dir: &Path) -> BisectResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == BUILD_DIR || name == CACHE_MARKER_FILE {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Copy of the whole checkout, `.git` and ignored files included, with
/// symlinks recreated rather than followed
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    let walker = WalkBuilder::new(src)
        .standard_filters(false)
        .follow_links(false)
        .build();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::other)?;
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dst.join(relative);
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(src)?, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::copy(src, dst).map(|_| ())
}
