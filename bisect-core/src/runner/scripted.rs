//! Scripted runner for tests: answers every command through a handler
//! closure and records the invocations.

use super::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::BisectResult;
use async_trait::async_trait;
use std::sync::Mutex;

type Handler = dyn Fn(&CommandSpec) -> BisectResult<CommandOutput> + Send + Sync;

/// Fake [`CommandRunner`] driven by a closure.
///
/// The handler may perform filesystem side effects (e.g. drop a solver
/// binary into `build/` when `make` runs) to stand in for a real toolchain.
pub struct ScriptedRunner {
    handler: Box<Handler>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&CommandSpec) -> BisectResult<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Runner that succeeds with empty output for every command
    pub fn succeeding() -> Self {
        Self::new(|_| Ok(CommandOutput::ok()))
    }

    /// Every command seen so far, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Number of invocations of `program`
    pub fn count(&self, program: &str) -> usize {
        self.calls().iter().filter(|c| c.program == program).count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> BisectResult<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        (self.handler)(spec)
    }
}
