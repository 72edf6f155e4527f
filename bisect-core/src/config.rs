//! Bisection configuration
//!
//! Layered: defaults, then an optional TOML file, then `BISECT_*`
//! environment variables. The CLI applies its flags on top.

use crate::error::{BisectError, BisectResult};
use crate::revisions::ListOrder;
use crate::solver::BuildOptions;
use crate::test_runner::TimeoutPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Build orchestration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Parallel build jobs
    pub jobs: usize,
    /// AddressSanitizer-instrumented builds
    pub sanitizer: bool,
    /// Limit for each configure/make step (seconds)
    pub step_timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            sanitizer: false,
            step_timeout_secs: 2 * 60 * 60,
        }
    }
}

impl BuildConfig {
    pub fn options(&self) -> BuildOptions {
        BuildOptions {
            jobs: self.jobs,
            sanitizer: self.sanitizer,
        }
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

/// Test execution settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Wall-clock limit for one solver run (seconds)
    pub timeout_secs: u64,
    /// How a timed-out run is classified
    pub timeout_policy: TimeoutPolicy,
    /// Where the captured output of the latest run is written, if anywhere
    pub capture_path: Option<PathBuf>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            timeout_policy: TimeoutPolicy::default(),
            capture_path: Some(PathBuf::from("output.txt")),
        }
    }
}

impl TestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Build-failure retry settings for the search loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Build attempts per search step before giving up on the range
    pub max_build_attempts: u32,
    /// First backoff delay (milliseconds), doubled after every failure
    pub backoff_base_ms: u64,
    /// Backoff ceiling (milliseconds)
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_build_attempts: 8,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BisectConfig {
    /// Pristine solver checkout; cache entries are created next to it
    pub project_root: Option<PathBuf>,
    /// Order of the revision list file
    pub list_order: ListOrder,
    /// RNG seed for candidate re-selection (random when unset)
    pub seed: Option<u64>,
    pub build: BuildConfig,
    pub test: TestConfig,
    pub retry: RetryConfig,
}

impl Default for BisectConfig {
    fn default() -> Self {
        Self {
            project_root: None,
            list_order: ListOrder::default(),
            seed: None,
            build: BuildConfig::default(),
            test: TestConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value.to_lowercase() == "true" || value == "1"
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> BisectResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BisectError::config(format!("invalid value for {key}: '{value}'")))
}

impl BisectConfig {
    /// Create config from environment variables
    pub fn from_env() -> BisectResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load a TOML config file; missing keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> BisectResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            BisectError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Apply `BISECT_*` overrides from the process environment
    pub fn apply_env(&mut self) -> BisectResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `BISECT_*` overrides from an arbitrary lookup
    pub fn apply_env_from<F>(&mut self, lookup: F) -> BisectResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("BISECT_PROJECT_ROOT") {
            self.project_root = Some(PathBuf::from(path));
        }
        if let Some(val) = lookup("BISECT_LIST_ORDER") {
            self.list_order = val.parse().map_err(BisectError::config)?;
        }
        if let Some(val) = lookup("BISECT_SEED") {
            self.seed = Some(parse_env("BISECT_SEED", &val)?);
        }
        if let Some(val) = lookup("BISECT_JOBS") {
            self.build.jobs = parse_env("BISECT_JOBS", &val)?;
        }
        if let Some(val) = lookup("BISECT_SANITIZER") {
            self.build.sanitizer = parse_flag(&val);
        }
        if let Some(val) = lookup("BISECT_BUILD_TIMEOUT_SECS") {
            self.build.step_timeout_secs = parse_env("BISECT_BUILD_TIMEOUT_SECS", &val)?;
        }
        if let Some(val) = lookup("BISECT_TEST_TIMEOUT_SECS") {
            self.test.timeout_secs = parse_env("BISECT_TEST_TIMEOUT_SECS", &val)?;
        }
        if let Some(val) = lookup("BISECT_TIMEOUT_POLICY") {
            self.test.timeout_policy = val.parse().map_err(BisectError::config)?;
        }
        if let Some(val) = lookup("BISECT_CAPTURE_PATH") {
            self.test.capture_path = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }
        if let Some(val) = lookup("BISECT_MAX_BUILD_ATTEMPTS") {
            self.retry.max_build_attempts = parse_env("BISECT_MAX_BUILD_ATTEMPTS", &val)?;
        }
        Ok(())
    }

    /// Reject settings the search cannot run with
    pub fn validate(&self) -> BisectResult<()> {
        if self.build.jobs == 0 {
            return Err(BisectError::config("build.jobs must be at least 1"));
        }
        if self.test.timeout_secs == 0 {
            return Err(BisectError::config("test.timeout_secs must be at least 1"));
        }
        if self.retry.max_build_attempts == 0 {
            return Err(BisectError::config(
                "retry.max_build_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}
