//! Solver build recipes
//!
//! Knows how each supported solver is configured, built and invoked, and
//! where its binary lands inside the build tree.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Compiler flags for AddressSanitizer-instrumented z3 builds
const ASAN_CFLAGS: &str = "-fsanitize=address -fsanitize-recover=address -U_FORTIFY_SOURCE -fno-omit-frame-pointer -fno-common";
const ASAN_LDFLAGS: &str = "-fsanitize=address";

/// Name of the build output directory inside a checkout
pub const BUILD_DIR: &str = "build";

/// Supported solvers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    Z3,
    Cvc5,
    Cvc4,
}

impl std::fmt::Display for SolverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Z3 => write!(f, "z3"),
            Self::Cvc5 => write!(f, "cvc5"),
            Self::Cvc4 => write!(f, "cvc4"),
        }
    }
}

impl std::str::FromStr for SolverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "z3" => Ok(Self::Z3),
            "cvc5" => Ok(Self::Cvc5),
            "cvc4" => Ok(Self::Cvc4),
            other => Err(format!(
                "unknown solver '{other}' (expected one of: z3, cvc5, cvc4)"
            )),
        }
    }
}

/// Knobs that change how a revision is compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Parallel build jobs (`make -jN`)
    pub jobs: usize,
    /// Build with AddressSanitizer instrumentation
    pub sanitizer: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            sanitizer: false,
        }
    }
}

/// One external command of a build recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    /// Short step name used in logs and errors
    pub name: &'static str,
    pub program: String,
    pub args: Vec<String>,
    /// Directory relative to the checkout root, `None` for the root itself
    pub subdir: Option<&'static str>,
    pub env: Vec<(String, String)>,
}

impl SolverKind {
    /// Binary location relative to the checkout root
    pub fn binary_relative_path(&self) -> PathBuf {
        match self {
            Self::Z3 => Path::new(BUILD_DIR).join("z3"),
            Self::Cvc5 => Path::new(BUILD_DIR).join("bin").join("cvc5"),
            Self::Cvc4 => Path::new(BUILD_DIR).join("bin").join("cvc4"),
        }
    }

    /// Arguments for running the solver on a reproduction input
    pub fn run_args(&self, input: &Path) -> Vec<String> {
        vec![input.display().to_string()]
    }

    /// Configure + compile steps, in order
    pub fn build_steps(&self, options: &BuildOptions) -> Vec<BuildStep> {
        let make = BuildStep {
            name: "make",
            program: "make".to_string(),
            args: vec![format!("-j{}", options.jobs.max(1))],
            subdir: Some(BUILD_DIR),
            env: Vec::new(),
        };

        match self {
            Self::Z3 => {
                let env = if options.sanitizer {
                    vec![
                        ("CC".to_string(), "clang".to_string()),
                        ("CXX".to_string(), "clang++".to_string()),
                        ("CFLAGS".to_string(), ASAN_CFLAGS.to_string()),
                        ("CXXFLAGS".to_string(), ASAN_CFLAGS.to_string()),
                        ("LDFLAGS".to_string(), ASAN_LDFLAGS.to_string()),
                    ]
                } else {
                    Vec::new()
                };
                let configure = BuildStep {
                    name: "configure",
                    program: "python3".to_string(),
                    args: vec!["scripts/mk_make.py".to_string(), "-d".to_string()],
                    subdir: None,
                    env: env.clone(),
                };
                vec![configure, BuildStep { env, ..make }]
            }
            Self::Cvc5 | Self::Cvc4 => {
                let mut args = vec![
                    "debug".to_string(),
                    "--auto-download".to_string(),
                ];
                if options.sanitizer {
                    args.push("--asan".to_string());
                }
                args.push("--assertions".to_string());
                let configure = BuildStep {
                    name: "configure",
                    program: "./configure.sh".to_string(),
                    args,
                    subdir: None,
                    env: Vec::new(),
                };
                vec![configure, make]
            }
        }
    }
}
