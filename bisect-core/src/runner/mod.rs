//! Command Runner: narrow capability for running external commands
//!
//! Every external collaborator (git, the solver build toolchain, the built
//! solver itself) is invoked through [`CommandRunner`]. Production code uses
//! [`ProcessRunner`]; tests inject a [`ScriptedRunner`] so the build cache and
//! test runner can be exercised without real toolchains.

pub mod process;
pub mod scripted;

pub use process::ProcessRunner;
pub use scripted::ScriptedRunner;

use crate::error::BisectResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A single external command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute (looked up on PATH if not absolute)
    pub program: String,
    /// Arguments passed verbatim
    pub args: Vec<String>,
    /// Working directory (inherits the caller's when `None`)
    pub cwd: Option<PathBuf>,
    /// Environment overrides on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// Hard wall-clock limit
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

/// How a command terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Process exited on its own with this code
    Exited(i32),
    /// Process was terminated by a signal it did not handle
    Signaled(i32),
    /// Wall-clock timeout expired and the process was killed
    TimedOut,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {code}"),
            Self::Signaled(signal) => write!(f, "killed by signal {signal}"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Captured result of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    /// Output of a process that exited with `code`
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status: ExitStatus::Exited(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
        }
    }

    /// Output of a successful process with empty streams
    pub fn ok() -> Self {
        Self::exited(0, "", "")
    }

    /// Output of a process killed by the timeout
    pub fn timed_out(stdout: impl Into<String>) -> Self {
        Self {
            status: ExitStatus::TimedOut,
            stdout: stdout.into(),
            stderr: String::new(),
            duration: Duration::ZERO,
        }
    }

    /// Output of a process killed by `signal`
    pub fn signaled(signal: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: ExitStatus::Signaled(signal),
            stdout: String::new(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
        }
    }

    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Standard output followed by standard error
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len());
        text.push_str(&self.stdout);
        text.push_str(&self.stderr);
        text
    }

    /// Tail of stderr (or stdout when stderr is empty), for error messages
    pub fn excerpt(&self, max_bytes: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        truncate_tail(source.trim(), max_bytes).to_string()
    }
}

/// Keep the last `max_bytes` of `text`, respecting char boundaries
fn truncate_tail(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Runs external commands.
///
/// `Err` is reserved for commands that could not be started at all; a
/// non-zero exit, a signal or a timeout are all reported through
/// [`CommandOutput::status`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> BisectResult<CommandOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("make")
            .arg("-j8")
            .current_dir("/tmp/z3_abc/build")
            .env("CC", "clang")
            .timeout(Duration::from_secs(5));

        assert_eq!(spec.program, "make");
        assert_eq!(spec.args, vec!["-j8"]);
        assert_eq!(spec.cwd.as_deref(), Some(Path::new("/tmp/z3_abc/build")));
        assert_eq!(spec.env, vec![("CC".to_string(), "clang".to_string())]);
        assert_eq!(spec.display(), "make -j8");
    }

    #[test]
    fn test_combined_is_stdout_then_stderr() {
        let output = CommandOutput::exited(0, "unsat\n", "warning\n");
        assert_eq!(output.combined(), "unsat\nwarning\n");
    }

    #[test]
    fn test_excerpt_prefers_stderr_and_keeps_tail() {
        let output = CommandOutput::exited(2, "stdout noise", "first line\nlast line");
        assert_eq!(output.excerpt(9), "last line");

        let quiet = CommandOutput::exited(2, "only stdout", "  ");
        assert_eq!(quiet.excerpt(100), "only stdout");
    }

    #[test]
    fn test_truncate_tail_char_boundary() {
        let text = "ééé";
        let tail = truncate_tail(text, 3);
        assert_eq!(tail, "é");
    }

    #[test]
    fn test_exit_status_display() {
        assert_eq!(ExitStatus::Exited(1).to_string(), "exit code 1");
        assert_eq!(ExitStatus::TimedOut.to_string(), "timed out");
        assert!(ExitStatus::Exited(0).success());
        assert!(!ExitStatus::Signaled(11).success());
    }
}
