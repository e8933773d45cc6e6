//! Coalescing scheduler.
//!
//! At most one task is active and at most one is pending. A submission that
//! arrives while a task is active takes the pending slot, silently replacing
//! whatever was there. Active tasks always run to completion.
//!
//! The scheduler is a single future ([`Scheduler::run`]) that owns both slots
//! and polls the active task itself, so no state is shared across threads.

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{Result, ShellError};
use crate::event::EventSender;
use crate::obs;
use crate::task::{Pipeline, Task, TaskId};

/// Counters reported when the scheduler stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub started: u64,
    pub superseded: u64,
    pub finished: u64,
}

/// Cloneable submission side of a [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    sender: mpsc::UnboundedSender<Task>,
}

impl SchedulerHandle {
    /// Queue `source` for building. Never blocks.
    pub fn submit(&self, source: impl Into<Arc<str>>) -> Result<TaskId> {
        self.submit_task(Task::new(source))
    }

    pub fn submit_task(&self, task: Task) -> Result<TaskId> {
        let id = *task.id();
        self.sender
            .send(task)
            .map_err(|_| ShellError::SchedulerClosed)?;
        Ok(id)
    }
}

pub struct Scheduler {
    pipeline: Pipeline,
    events: EventSender,
    submissions: mpsc::UnboundedReceiver<Task>,
}

type ActiveTask<'a> = LocalBoxFuture<'a, (Task, Result<()>)>;

impl Scheduler {
    pub fn new(pipeline: Pipeline, events: EventSender) -> (Self, SchedulerHandle) {
        let (sender, submissions) = mpsc::unbounded_channel();
        (
            Self {
                pipeline,
                events,
                submissions,
            },
            SchedulerHandle { sender },
        )
    }

    /// Drive submissions until every handle is dropped and no work is left.
    ///
    /// After the last handle goes away the active task finishes and the
    /// pending one, being the latest submission, still runs. A task error
    /// (spawn failure, temp files) stops the scheduler.
    pub async fn run(mut self) -> Result<SchedulerStats> {
        let pipeline = &self.pipeline;
        let events = &self.events;

        let mut stats = SchedulerStats::default();
        let mut active: Option<ActiveTask<'_>> = None;
        let mut pending: Option<Task> = None;
        let mut accepting = true;

        loop {
            tokio::select! {
                biased;

                submitted = self.submissions.recv(), if accepting => match submitted {
                    Some(task) => {
                        stats.submitted += 1;
                        if active.is_none() {
                            debug!(task_id = %task.id(), "idle, starting immediately");
                            active = Some(start(task, pipeline, events));
                            stats.started += 1;
                        } else {
                            let incoming = *task.id();
                            if let Some(dropped) = pending.replace(task) {
                                obs::emit_superseded(dropped.id(), &incoming);
                                stats.superseded += 1;
                            }
                        }
                    }
                    None => {
                        debug!("all handles dropped, draining");
                        accepting = false;
                    }
                },

                (task, outcome) = finish(&mut active), if active.is_some() => {
                    active = None;
                    outcome?;
                    stats.finished += 1;
                    debug!(task_id = %task.id(), state = ?task.state(), "task done");

                    if let Some(next) = pending.take() {
                        active = Some(start(next, pipeline, events));
                        stats.started += 1;
                    }
                }

                else => break,
            }
        }

        info!(
            submitted = stats.submitted,
            started = stats.started,
            superseded = stats.superseded,
            finished = stats.finished,
            "scheduler stopped"
        );
        Ok(stats)
    }
}

fn start<'a>(mut task: Task, pipeline: &'a Pipeline, events: &'a EventSender) -> ActiveTask<'a> {
    async move {
        let outcome = task.start(pipeline, events).await;
        (task, outcome)
    }
    .boxed_local()
}

async fn finish<T>(active: &mut Option<LocalBoxFuture<'_, T>>) -> T {
    match active {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}
