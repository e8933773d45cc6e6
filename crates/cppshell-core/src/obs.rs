//! Structured observability hooks for the task lifecycle.
//!
//! - [`task_span`] scopes log lines to one task (attach with `.instrument`)
//! - `emit_*` functions log the key lifecycle events at `info!`

use tracing::info;

use crate::task::{TaskId, TaskState};

/// Span tagging every event of one task with its id and submission digest.
///
/// ```ignore
/// task.work().instrument(task_span(&id, "3f2a9c01beef")).await
/// ```
pub fn task_span(task_id: &TaskId, submission_digest: &str) -> tracing::Span {
    tracing::info_span!(
        "cppshell.task",
        task_id = %task_id,
        submission = %submission_digest,
    )
}

/// Emit event: task moved between states.
pub fn emit_state_changed(task_id: &TaskId, old: TaskState, new: TaskState) {
    info!(
        event = "task.state_changed",
        task_id = %task_id,
        old = ?old,
        new = ?new,
    );
}

/// Emit event: compiler finished.
pub fn emit_build_finished(
    task_id: &TaskId,
    success: bool,
    errors: usize,
    warnings: usize,
    duration_ms: u64,
) {
    info!(
        event = "build.finished",
        task_id = %task_id,
        success = success,
        errors = errors,
        warnings = warnings,
        duration_ms = duration_ms,
    );
}

/// Emit event: artifact exited. Negative status means killed by that signal.
pub fn emit_run_exited(task_id: &TaskId, exit_status: i32, duration_ms: u64) {
    info!(
        event = "run.exited",
        task_id = %task_id,
        exit_status = exit_status,
        duration_ms = duration_ms,
    );
}

/// Emit event: a pending task was replaced before it started.
pub fn emit_superseded(dropped: &TaskId, replacement: &TaskId) {
    info!(
        event = "task.superseded",
        task_id = %dropped,
        replacement = %replacement,
    );
}
