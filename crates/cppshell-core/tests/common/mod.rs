//! Shared fixtures for pipeline tests.
//!
//! The stand-in compiler treats the body of a submission as a shell script:
//! it copies the `main` region into an executable artifact, so a submission
//! such as `echo hi; exit 3` "compiles" into a program doing exactly that.
//! Directive lines steer the build:
//!
//! - `#fail <msg>` reports an error at that line and fails the build
//! - `#warn <msg>` reports a warning at that line
//! - `#die` fails the build without printing anything
//! - `#include <missing>` fails with a fatal error on that include line
//!
//! Every build also reports a warning inside the generated scaffold, which
//! must never reach the user.

#![allow(dead_code)]

use std::path::PathBuf;

use cppshell_core::{
    event_channel, Pipeline, ShellConfig, Task, TaskEvent, TaskId, TaskState, ToolchainConfig,
};
use tempfile::TempDir;

const FAKE_COMPILER: &str = r#"#!/bin/sh
# usage: fake-cxx <flag> <flag> <flag> <source> -o <output>
src="$4"
out="$6"

echo '_cppshell_scaffold_:3:14: warning: unused parameter '"'"'argc'"'"' [-Wunused-parameter]' >&2

awk '
  /^#line 1 "/ { region = $3; gsub(/"/, "", region); n = 0; next }
  { n++ }
  region == "_user_code_main_" && sub(/^#fail /, "") { print region ":" n ":1: error: " $0 }
  region == "_user_code_main_" && sub(/^#warn /, "") { print region ":" n ":1: warning: " $0 }
  region == "_user_code_include_" && /<missing>/ { print region ":" n ":10: fatal error: missing: No such file or directory" }
' "$src" >&2

if grep -Eq '^#(fail |die$|include <missing>)' "$src"; then
  exit 1
fi

{
  printf '#!/bin/sh\n'
  awk '/^#line 1 "_user_code_main_"/ { body = 1; next } body { print }' "$src" | sed '$d'
} > "$out"
chmod 755 "$out"
"#;

/// Temp directory holding the stand-in compiler and the dump path.
pub struct Fixture {
    pub dir: TempDir,
    pub config: ShellConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let compiler = dir.path().join("fake-cxx.sh");
        // Invoked through `sh`, so the script itself is never exec'd.
        std::fs::write(&compiler, FAKE_COMPILER).expect("write fake compiler");

        let toolchain = ToolchainConfig::default()
            .with_compiler(["sh".to_string(), compiler.to_string_lossy().into_owned()]);
        let config = ShellConfig::default()
            .with_toolchain(toolchain)
            .with_dump_path(dir.path().join("dump").join("last-failed.cpp"));

        Self { dir, config }
    }

    pub fn dump_path(&self) -> PathBuf {
        self.config.dump_path.clone()
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(&self.config)
    }

    /// Run one task to completion and collect everything it published.
    pub async fn run_task(&self, source: &str) -> (Task, Vec<TaskEvent>) {
        let (events, mut rx) = event_channel();
        let mut task = Task::new(source);
        task.start(&self.pipeline(), &events)
            .await
            .expect("task start");
        (task, rx.drain())
    }
}

/// State sequence of `task` as seen on the event stream, starting with the
/// state the first transition left.
pub fn states(events: &[TaskEvent], task: &TaskId) -> Vec<TaskState> {
    let mut states = Vec::new();
    for event in events {
        if let TaskEvent::StateChanged(change) = event {
            if &change.task != task {
                continue;
            }
            if states.is_empty() {
                states.push(change.old);
            }
            states.push(change.new);
        }
    }
    states
}

/// Concatenated output of `task` on one stream.
pub fn output(events: &[TaskEvent], task: &TaskId, stream: cppshell_core::OutputStream) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            TaskEvent::Output(chunk) if &chunk.task == task && chunk.stream == stream => {
                Some(chunk.text())
            }
            _ => None,
        })
        .collect()
}

/// Whether a C++ compiler is installed.
pub fn have_gxx() -> bool {
    std::process::Command::new("g++")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
