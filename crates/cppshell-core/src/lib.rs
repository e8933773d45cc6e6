//! cppshell core library
//!
//! Compiles C++ snippets with the system toolchain and runs them, one task at
//! a time, with newer submissions superseding queued ones.

pub mod builder;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod event;
pub mod line_map;
pub mod obs;
pub mod runner;
pub mod scheduler;
pub mod task;
pub mod telemetry;
pub mod translator;
pub mod watcher;

pub use builder::{Artifact, BuildOutput, BuildResult, Builder};
pub use config::{default_dump_path, ShellConfig, ToolchainConfig, DEFAULT_CHUNK_SIZE};
pub use diagnostic::{parse_diagnostics, Diagnostic, Severity, UNKNOWN_ERROR};
pub use error::{Result, ShellError};
pub use event::{
    event_channel, EventReceiver, EventSender, OutputChunk, PhaseOutcome, StateChange, TaskEvent,
};
pub use line_map::{LineMap, RegionKind};
pub use runner::{RunResult, Runner};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerStats};
pub use task::{Pipeline, Submission, Task, TaskId, TaskState};
pub use telemetry::init_tracing;
pub use translator::{translate, TranslationUnit};
pub use watcher::{
    CapturedOutput, CommandSpec, ExitStatus, OutputSink, OutputStream, ProcessWatcher,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
