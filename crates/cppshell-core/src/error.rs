//! Error taxonomy for the cppshell pipeline.
//!
//! Compiler diagnostics and non-zero exit codes are *results*, not errors.
//! Everything in [`ShellError`] is a hard failure that stops the scheduler.

use crate::task::{TaskId, TaskState};

/// Errors produced by the build-and-run pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command line is empty")]
    EmptyCommand,

    #[error("temporary workspace error: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("task {task} cannot leave state {from:?} via {step}")]
    InvalidTransition {
        task: TaskId,
        from: TaskState,
        step: &'static str,
    },

    #[error("scheduler has stopped")]
    SchedulerClosed,

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for cppshell operations.
pub type Result<T> = std::result::Result<T, ShellError>;
