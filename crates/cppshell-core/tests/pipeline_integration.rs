//! End-to-end tests for a single build-then-run task.

mod common;

use common::{have_gxx, output, states, Fixture};
use cppshell_core::{
    event_channel, OutputStream, Pipeline, Severity, Task, TaskEvent, TaskState, ToolchainConfig,
    UNKNOWN_ERROR,
};

// -------------------------------------------------------------------------
// Successful builds
// -------------------------------------------------------------------------

/// Test: a good submission walks Initial → Compiling → Running → Finished.
#[tokio::test]
async fn test_success_state_sequence() {
    let fx = Fixture::new();
    let (task, events) = fx.run_task("echo hello").await;

    assert_eq!(
        states(&events, task.id()),
        vec![
            TaskState::Initial,
            TaskState::Compiling,
            TaskState::Running,
            TaskState::Finished,
        ]
    );
    assert_eq!(task.state(), TaskState::Finished);
    assert_eq!(task.exit_status().map(|s| s.code()), Some(0));
}

/// Test: output arrives tagged by stream and the exit status comes last.
#[tokio::test]
async fn test_output_then_exit_status() {
    let fx = Fixture::new();
    let (task, events) = fx
        .run_task("echo out\necho err >&2\necho more\nexit 7")
        .await;

    assert_eq!(output(&events, task.id(), OutputStream::Stdout), "out\nmore\n");
    assert_eq!(output(&events, task.id(), OutputStream::Stderr), "err\n");

    let last = events.last().expect("events");
    let TaskEvent::StateChanged(change) = last else {
        panic!("last event should be the exit, got {:?}", last);
    };
    assert_eq!(change.new, TaskState::Finished);
    assert_eq!(change.run_result().map(|r| r.exit_status.code()), Some(7));
}

/// Test: a signal death is reported as the negated signal number.
#[tokio::test]
async fn test_killed_artifact_reports_negative_status() {
    let fx = Fixture::new();
    let (task, _events) = fx.run_task("kill -9 $$").await;

    let status = task.exit_status().expect("ran");
    assert_eq!(status.code(), -9);
    assert_eq!(status.signal(), Some(9));
}

/// Test: warnings survive a successful build; scaffold warnings do not.
#[tokio::test]
async fn test_warnings_on_success_exclude_scaffold() {
    let fx = Fixture::new();
    let (task, events) = fx.run_task("#include <vector>\n#warn shadowed\necho ok").await;

    let build = task.build_result().expect("built");
    assert!(build.success);
    assert!(build.artifact_path.is_some());
    assert_eq!(build.error_count(), 0);

    let warnings: Vec<_> = build.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].message, "shadowed");
    assert_eq!(warnings[0].line, 2);

    assert_eq!(output(&events, task.id(), OutputStream::Stdout), "ok\n");
}

/// Test: the artifact is removed once the task finishes.
#[tokio::test]
async fn test_artifact_removed_after_run() {
    let fx = Fixture::new();
    let (task, _events) = fx.run_task("true").await;

    let artifact = task
        .build_result()
        .and_then(|b| b.artifact_path.clone())
        .expect("artifact path");
    assert!(!artifact.exists());
}

// -------------------------------------------------------------------------
// Failed builds
// -------------------------------------------------------------------------

/// Test: a failed build skips Running.
#[tokio::test]
async fn test_failure_state_sequence() {
    let fx = Fixture::new();
    let (task, events) = fx.run_task("#fail nope").await;

    assert_eq!(
        states(&events, task.id()),
        vec![TaskState::Initial, TaskState::Compiling, TaskState::Finished]
    );
    assert!(task.run_result().is_none());
    assert!(events.iter().all(|e| !matches!(e, TaskEvent::Output(_))));
}

/// Test: body lines are reported at their original line, past any hoisted includes.
#[tokio::test]
async fn test_error_line_accounts_for_includes() {
    let fx = Fixture::new();
    let source = "#include <vector>\n#include <map>\necho fine\n#fail boom";
    let (task, _events) = fx.run_task(source).await;

    let build = task.build_result().expect("built");
    assert!(!build.success);
    assert!(build.artifact_path.is_none());

    let errors: Vec<_> = build.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "boom");
    assert_eq!(errors[0].line, 4);
    assert_eq!(errors[0].column, Some(1));
}

/// Test: include lines are reported at their own line number.
#[tokio::test]
async fn test_include_error_line_unchanged() {
    let fx = Fixture::new();
    let source = "#include <vector>\n#include <missing>\necho fine";
    let (task, _events) = fx.run_task(source).await;

    let build = task.build_result().expect("built");
    assert!(!build.success);
    let errors: Vec<_> = build.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].line, 2);
    assert_eq!(errors[0].message, "missing: No such file or directory");
}

/// Test: includes interleaved with code keep exact line numbers.
#[tokio::test]
async fn test_interleaved_include_lines() {
    let fx = Fixture::new();
    let source = "echo a\n#include <map>\n#warn first\n#include <set>\n#fail second";
    let (task, _events) = fx.run_task(source).await;

    let build = task.build_result().expect("built");
    let lines: Vec<_> = build
        .diagnostics
        .iter()
        .map(|d| (d.severity, d.line))
        .collect();
    assert_eq!(lines, vec![(Severity::Warning, 3), (Severity::Error, 5)]);
}

/// Test: a failing compiler that prints nothing still yields one error.
#[tokio::test]
async fn test_silent_failure_gets_unknown_error() {
    let fx = Fixture::new();
    let (task, _events) = fx.run_task("echo never\n#die").await;

    let build = task.build_result().expect("built");
    assert!(!build.success);
    let errors: Vec<_> = build.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, UNKNOWN_ERROR);
    assert_eq!(errors[0].line, 1);
}

/// Test: the generated source of a failed build is kept at the dump path.
#[tokio::test]
async fn test_failed_source_is_preserved() {
    let fx = Fixture::new();
    fx.run_task("#fail first").await;
    fx.run_task("echo second\n#fail again").await;

    let dumped = std::fs::read_to_string(fx.dump_path()).expect("dump exists");
    assert!(dumped.contains("#line 1 \"_user_code_main_\""));
    assert!(dumped.contains("echo second"));
    assert!(!dumped.contains("#fail first"));
}

/// Test: a successful build leaves the dump path alone.
#[tokio::test]
async fn test_success_does_not_touch_dump() {
    let fx = Fixture::new();
    fx.run_task("echo ok").await;
    assert!(!fx.dump_path().exists());
}

/// Test: the state change leaving Compiling carries the build result.
#[tokio::test]
async fn test_build_result_on_state_change() {
    let fx = Fixture::new();
    let (_task, events) = fx.run_task("#fail nope").await;

    let finished = events
        .iter()
        .find_map(|e| match e {
            TaskEvent::StateChanged(c) if c.new == TaskState::Finished => Some(c),
            _ => None,
        })
        .expect("finished event");
    let build = finished.build_result().expect("build outcome");
    assert_eq!(build.error_count(), 1);

    let json = serde_json::to_value(finished).expect("serialize");
    assert_eq!(json["outcome"]["phase"], "built");
    assert_eq!(json["outcome"]["success"], false);
}

// -------------------------------------------------------------------------
// Real toolchain (skipped without g++)
// -------------------------------------------------------------------------

/// Test: a real C++ snippet compiles, prints, and returns its exit code.
#[tokio::test]
async fn test_gxx_compiles_and_runs() {
    if !have_gxx() {
        eprintln!("g++ not found, skipping");
        return;
    }
    let fx = Fixture::new();
    let config = fx.config.clone().with_toolchain(ToolchainConfig::default());
    let pipeline = Pipeline::new(&config);

    let (events, mut rx) = event_channel();
    let mut task = Task::new(
        "#include <string>\nstring s = \"hi\";\ncout << s << endl;\nreturn 3;",
    );
    task.start(&pipeline, &events).await.expect("start");

    let build = task.build_result().expect("built");
    assert!(build.success, "diagnostics: {:?}", build.diagnostics);
    // argc/argv are unused, but those warnings live in the scaffold
    assert_eq!(build.warning_count(), 0);
    assert_eq!(task.exit_status().map(|s| s.code()), Some(3));
    assert_eq!(output(&rx.drain(), task.id(), OutputStream::Stdout), "hi\n");
}

/// Test: a real compiler error lands on the submission's line.
#[tokio::test]
async fn test_gxx_error_line() {
    if !have_gxx() {
        eprintln!("g++ not found, skipping");
        return;
    }
    let fx = Fixture::new();
    let config = fx
        .config
        .clone()
        .with_toolchain(ToolchainConfig::default());
    let pipeline = Pipeline::new(&config);

    let (events, _rx) = event_channel();
    let mut task = Task::new("#include <vector>\nint bad = 0;\nbad += undeclared_name;");
    task.start(&pipeline, &events).await.expect("start");

    let build = task.build_result().expect("built");
    assert!(!build.success);
    assert!(build.errors().any(|d| d.line == 3), "diagnostics: {:?}", build.diagnostics);
    assert!(fx.dump_path().exists());
}

/// Test: an error g++ pins on the generated closing brace stays on a real line.
#[tokio::test]
async fn test_gxx_missing_semicolon_on_last_line() {
    if !have_gxx() {
        eprintln!("g++ not found, skipping");
        return;
    }
    let fx = Fixture::new();
    let config = fx
        .config
        .clone()
        .with_toolchain(ToolchainConfig::default());
    let pipeline = Pipeline::new(&config);

    let (events, _rx) = event_channel();
    let mut task = Task::new("int x = 1");
    task.start(&pipeline, &events).await.expect("start");

    let build = task.build_result().expect("built");
    assert!(!build.success);
    assert!(build.error_count() >= 1);
    assert!(
        build.diagnostics.iter().all(|d| d.line == 1),
        "diagnostics: {:?}",
        build.diagnostics
    );
}
