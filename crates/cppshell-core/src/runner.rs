//! Execute a compiled artifact and stream its output.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

use crate::config::ShellConfig;
use crate::error::Result;
use crate::watcher::{CommandSpec, ExitStatus, OutputSink, ProcessWatcher};

/// Outcome of running an artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResult {
    /// Signed exit status; negative means killed by that signal.
    pub exit_status: ExitStatus,

    pub duration_ms: u64,
}

/// Runs artifacts with no input.
#[derive(Debug, Clone, Default)]
pub struct Runner {
    watcher: ProcessWatcher,
}

impl Runner {
    pub fn new(config: &ShellConfig) -> Self {
        Self {
            watcher: ProcessWatcher::new(config.chunk_size),
        }
    }

    /// Run `artifact` to completion. Every chunk reaches `sink` tagged with
    /// its stream before this returns.
    pub async fn run<S>(&self, artifact: &Path, sink: &mut S) -> Result<RunResult>
    where
        S: OutputSink + ?Sized,
    {
        let start = Instant::now();
        let spec = CommandSpec::new(artifact.to_string_lossy());
        let exit_status = self.watcher.watch(&spec, sink).await?;

        Ok(RunResult {
            exit_status,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
