//! Build-then-run task state machine.
//!
//! ```text
//!   Initial ──start──▶ Compiling ──build ok──▶ Running ──exited──▶ Finished
//!                          │                                          ▲
//!                          └──────────────build failed────────────────┘
//! ```
//!
//! Every state change goes through [`TaskState::apply`]; a step that is not an
//! edge of the diagram (for example starting a finished task) is a
//! [`ShellError::InvalidTransition`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::builder::{BuildOutput, BuildResult, Builder};
use crate::config::ShellConfig;
use crate::error::{Result, ShellError};
use crate::event::{EventSender, PhaseOutcome};
use crate::obs;
use crate::runner::{RunResult, Runner};
use crate::watcher::{ExitStatus, OutputStream};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Initial,
    Compiling,
    Running,
    Finished,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Start,
    BuildFailed,
    BuildSucceeded,
    RunFinished,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Start => "start",
            Step::BuildFailed => "build_failed",
            Step::BuildSucceeded => "build_succeeded",
            Step::RunFinished => "run_finished",
        }
    }
}

impl TaskState {
    /// Transition function. `None` means the step is not allowed here.
    pub fn apply(self, step: Step) -> Option<TaskState> {
        match (self, step) {
            (TaskState::Initial, Step::Start) => Some(TaskState::Compiling),
            (TaskState::Compiling, Step::BuildFailed) => Some(TaskState::Finished),
            (TaskState::Compiling, Step::BuildSucceeded) => Some(TaskState::Running),
            (TaskState::Running, Step::RunFinished) => Some(TaskState::Finished),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished)
    }
}

/// Immutable source text submitted by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    text: Arc<str>,
    digest: String,
}

impl Submission {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        let text = text.into();
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self { text, digest }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Hex SHA-256 of the text.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// First 12 hex digits, for log correlation.
    pub fn short_digest(&self) -> &str {
        &self.digest[..12]
    }
}

/// Builder and runner shared by every task.
#[derive(Debug, Clone)]
pub struct Pipeline {
    builder: Builder,
    runner: Runner,
}

impl Pipeline {
    pub fn new(config: &ShellConfig) -> Self {
        Self {
            builder: Builder::new(config),
            runner: Runner::new(config),
        }
    }

    pub fn builder(&self) -> &Builder {
        &self.builder
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }
}

/// One submission's journey through compile and run.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    submission: Submission,
    state: TaskState,
    build: Option<BuildResult>,
    run: Option<RunResult>,
}

impl Task {
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        Self {
            id: TaskId::new(),
            submission: Submission::new(source),
            state: TaskState::Initial,
            build: None,
            run: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn submission(&self) -> &Submission {
        &self.submission
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Available once the task has left `Compiling`.
    pub fn build_result(&self) -> Option<&BuildResult> {
        self.build.as_ref()
    }

    /// Available once the task has left `Running`.
    pub fn run_result(&self) -> Option<&RunResult> {
        self.run.as_ref()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.run.map(|run| run.exit_status)
    }

    /// Compile, then run if the build succeeded. Returns once the task is
    /// `Finished`. A task runs at most once.
    pub async fn start(&mut self, pipeline: &Pipeline, events: &EventSender) -> Result<()> {
        let span = obs::task_span(&self.id, self.submission.short_digest());
        self.work(pipeline, events).instrument(span).await
    }

    async fn work(&mut self, pipeline: &Pipeline, events: &EventSender) -> Result<()> {
        self.advance(Step::Start, None, events)?;

        let BuildOutput { result, artifact } =
            pipeline.builder().build(self.submission.text()).await?;
        obs::emit_build_finished(
            &self.id,
            result.success,
            result.error_count(),
            result.warning_count(),
            result.duration_ms,
        );
        self.build = Some(result.clone());

        let artifact = match artifact {
            Some(artifact) if result.success => artifact,
            _ => {
                return self.advance(Step::BuildFailed, Some(PhaseOutcome::Built(result)), events);
            }
        };
        self.advance(Step::BuildSucceeded, Some(PhaseOutcome::Built(result)), events)?;

        let id = self.id;
        let mut forward = |stream: OutputStream, chunk: &[u8]| events.output(id, stream, chunk);
        let run = pipeline.runner().run(artifact.path(), &mut forward).await?;
        drop(artifact);
        obs::emit_run_exited(&self.id, run.exit_status.code(), run.duration_ms);

        self.run = Some(run);
        self.advance(Step::RunFinished, Some(PhaseOutcome::Exited(run)), events)
    }

    fn advance(
        &mut self,
        step: Step,
        outcome: Option<PhaseOutcome>,
        events: &EventSender,
    ) -> Result<()> {
        let old = self.state;
        let new = old.apply(step).ok_or(ShellError::InvalidTransition {
            task: self.id,
            from: old,
            step: step.name(),
        })?;

        self.state = new;
        obs::emit_state_changed(&self.id, old, new);
        events.state_changed(self.id, new, old, outcome);
        Ok(())
    }
}
