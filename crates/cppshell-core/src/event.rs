//! Events emitted by running tasks.
//!
//! Tasks publish to an unbounded channel so the presentation layer can drain
//! at its own pace:
//!
//! ```text
//!   Task ──▶ EventSender (mpsc) ──▶ EventReceiver ──▶ terminal / JSON / UI
//! ```

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;

use crate::builder::BuildResult;
use crate::runner::RunResult;
use crate::task::{TaskId, TaskState};
use crate::watcher::OutputStream;

/// Result of the phase a task just left.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// Leaving `Compiling`.
    Built(BuildResult),
    /// Leaving `Running`.
    Exited(RunResult),
}

/// A state transition, with the result of the phase being left.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StateChange {
    pub task: TaskId,
    pub new: TaskState,
    pub old: TaskState,
    pub outcome: Option<PhaseOutcome>,
    pub at: DateTime<Utc>,
}

impl StateChange {
    pub fn build_result(&self) -> Option<&BuildResult> {
        match &self.outcome {
            Some(PhaseOutcome::Built(result)) => Some(result),
            _ => None,
        }
    }

    pub fn run_result(&self) -> Option<&RunResult> {
        match &self.outcome {
            Some(PhaseOutcome::Exited(result)) => Some(result),
            _ => None,
        }
    }
}

/// A chunk of artifact output.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutputChunk {
    pub task: TaskId,
    pub stream: OutputStream,
    #[serde(serialize_with = "serialize_lossy")]
    pub data: Vec<u8>,
    pub at: DateTime<Utc>,
}

impl OutputChunk {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

fn serialize_lossy<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&String::from_utf8_lossy(data))
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    StateChanged(StateChange),
    Output(OutputChunk),
}

impl TaskEvent {
    pub fn task(&self) -> &TaskId {
        match self {
            TaskEvent::StateChanged(change) => &change.task,
            TaskEvent::Output(chunk) => &chunk.task,
        }
    }
}

/// Cloneable publishing side of the event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::UnboundedSender<TaskEvent>,
}

/// Receiving side, owned by whoever presents results.
#[derive(Debug)]
pub struct EventReceiver {
    receiver: mpsc::UnboundedReceiver<TaskEvent>,
}

/// Create a new event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventSender { sender }, EventReceiver { receiver })
}

impl EventSender {
    /// Publish an event. Dropped silently if nobody is listening.
    pub fn send(&self, event: TaskEvent) {
        let _ = self.sender.send(event);
    }

    pub fn state_changed(
        &self,
        task: TaskId,
        new: TaskState,
        old: TaskState,
        outcome: Option<PhaseOutcome>,
    ) {
        self.send(TaskEvent::StateChanged(StateChange {
            task,
            new,
            old,
            outcome,
            at: Utc::now(),
        }));
    }

    pub fn output(&self, task: TaskId, stream: OutputStream, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.send(TaskEvent::Output(OutputChunk {
            task,
            stream,
            data: data.to_vec(),
            at: Utc::now(),
        }));
    }
}

impl EventReceiver {
    /// Next event; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        self.receiver.recv().await
    }

    /// All events currently queued, without waiting.
    pub fn drain(&mut self) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}
