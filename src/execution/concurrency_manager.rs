//! # Concurrency Manager
//!
//! A bounded, short-lived executor for one fan-out. A manager is built per run
//! from explicit [`ExecutorSettings`], consumed by [`ConcurrencyManager::run_all`]
//! and torn down before it returns, so no executor state outlives a run.
//!
//! Sizing follows a classic core/queue/max pool: tasks beyond
//! `core_parallelism` wait in the queue, and only when the queue would overflow
//! does parallelism grow towards `max_parallelism`. Submissions beyond
//! `max_parallelism + queue_capacity` are rejected up front.
//!
//! Teardown after a timeout closes the admission semaphore (queued tasks never
//! start), waits up to the shutdown grace period for in-flight tasks, then
//! aborts whatever is left.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::ExecutorError;

/// Unit of work submitted to a [`ConcurrencyManager`]
pub type ShardTask<T> = BoxFuture<'static, T>;

/// Sizing of one executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutorSettings {
    /// Worker name prefix, e.g. `daily-income-worker`
    pub name: String,
    pub core_parallelism: usize,
    pub max_parallelism: usize,
    pub queue_capacity: usize,
    #[serde(with = "duration_secs")]
    pub shutdown_grace: Duration,
}

impl ExecutorSettings {
    /// Running plus queued tasks the executor accepts
    pub fn capacity(&self) -> usize {
        self.max_parallelism + self.queue_capacity
    }

    /// Tasks allowed to run at once for a submission of `task_count` tasks
    pub fn effective_parallelism(&self, task_count: usize) -> usize {
        let core = self.core_parallelism.clamp(1, self.max_parallelism.max(1));
        let parallelism = if task_count <= core + self.queue_capacity {
            core
        } else {
            (task_count - self.queue_capacity).min(self.max_parallelism)
        };
        parallelism.min(task_count).max(1)
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}

/// How one submitted task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// The task panicked; carries the panic message
    Panicked(String),
    /// Still running (or finished) after the deadline
    TimedOut,
    /// Never started because the executor shut down first
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    pub fn into_completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }
}

/// Outcomes of one `run_all`, in submission order
#[derive(Debug)]
pub struct ExecutionReport<T> {
    pub outcomes: Vec<TaskOutcome<T>>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl<T> ExecutionReport<T> {
    pub fn completed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_completed()).count()
    }
}

enum Slot<T> {
    Ran(Result<T, String>),
    Cancelled,
}

/// Bounded executor for a single fan-out
pub struct ConcurrencyManager {
    settings: ExecutorSettings,
    admission: Arc<Semaphore>,
}

impl ConcurrencyManager {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self {
            settings,
            admission: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Run every task and wait until all complete or `timeout` elapses
    pub async fn run_all<T>(
        self,
        tasks: Vec<ShardTask<T>>,
        timeout: Duration,
    ) -> Result<ExecutionReport<T>, ExecutorError>
    where
        T: Send + 'static,
    {
        let started = Instant::now();
        let submitted = tasks.len();
        let capacity = self.settings.capacity();

        if submitted > capacity {
            error!(
                executor = %self.settings.name,
                submitted = submitted,
                capacity = capacity,
                "🚫 EXECUTOR: Submission exceeds executor capacity"
            );
            return Err(ExecutorError::Rejected {
                executor: self.settings.name.clone(),
                submitted,
                capacity,
            });
        }

        let parallelism = self.settings.effective_parallelism(submitted);
        self.admission.add_permits(parallelism);

        info!(
            executor = %self.settings.name,
            tasks = submitted,
            parallelism = parallelism,
            core_parallelism = self.settings.core_parallelism,
            max_parallelism = self.settings.max_parallelism,
            queue_capacity = self.settings.queue_capacity,
            timeout_ms = timeout.as_millis() as u64,
            "🚀 EXECUTOR: Starting fan-out"
        );

        let mut join_set = JoinSet::new();
        for (index, task) in tasks.into_iter().enumerate() {
            let admission = Arc::clone(&self.admission);
            let worker = format!("{}-{}", self.settings.name, index + 1);
            join_set.spawn(async move {
                let Ok(_permit) = admission.acquire_owned().await else {
                    return (index, Slot::Cancelled);
                };
                let span = info_span!("worker", name = %worker);
                let result = AssertUnwindSafe(task)
                    .catch_unwind()
                    .instrument(span)
                    .await
                    .map_err(|payload| panic_message(payload.as_ref()));
                (index, Slot::Ran(result))
            });
        }

        let mut outcomes: Vec<Option<TaskOutcome<T>>> = (0..submitted).map(|_| None).collect();
        let deadline = started + timeout;
        let mut timed_out = false;

        while !join_set.is_empty() {
            match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok((index, slot)))) => {
                    outcomes[index] = Some(self.record(index, slot));
                }
                Ok(Some(Err(join_error))) => {
                    error!(
                        executor = %self.settings.name,
                        error = %join_error,
                        "❌ EXECUTOR: Task could not be joined"
                    );
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            warn!(
                executor = %self.settings.name,
                timeout_ms = timeout.as_millis() as u64,
                outstanding = join_set.len(),
                "⏰ EXECUTOR: Deadline elapsed with tasks outstanding"
            );
            self.shutdown(&mut join_set, &mut outcomes).await;
        }

        let outcomes = outcomes
            .into_iter()
            .map(|o| o.unwrap_or(TaskOutcome::TimedOut))
            .collect::<Vec<_>>();
        let elapsed = started.elapsed();

        info!(
            executor = %self.settings.name,
            tasks = submitted,
            completed = outcomes.iter().filter(|o| o.is_completed()).count(),
            timed_out = timed_out,
            elapsed_ms = elapsed.as_millis() as u64,
            "✅ EXECUTOR: Fan-out finished"
        );

        Ok(ExecutionReport {
            outcomes,
            timed_out,
            elapsed,
        })
    }

    fn record<T>(&self, index: usize, slot: Slot<T>) -> TaskOutcome<T> {
        match slot {
            Slot::Ran(Ok(value)) => TaskOutcome::Completed(value),
            Slot::Ran(Err(message)) => {
                error!(
                    executor = %self.settings.name,
                    task = index,
                    panic = %message,
                    "💥 EXECUTOR: Task panicked"
                );
                TaskOutcome::Panicked(message)
            }
            Slot::Cancelled => TaskOutcome::Cancelled,
        }
    }

    /// Graceful-then-forced teardown after the deadline
    async fn shutdown<T>(
        &self,
        join_set: &mut JoinSet<(usize, Slot<T>)>,
        outcomes: &mut [Option<TaskOutcome<T>>],
    ) where
        T: Send + 'static,
    {
        self.admission.close();
        let grace_deadline = Instant::now() + self.settings.shutdown_grace;

        while !join_set.is_empty() {
            match tokio::time::timeout_at(grace_deadline, join_set.join_next()).await {
                Ok(Some(Ok((index, Slot::Cancelled)))) => {
                    outcomes[index] = Some(TaskOutcome::Cancelled);
                }
                Ok(Some(Ok((index, Slot::Ran(_))))) => {
                    debug!(
                        executor = %self.settings.name,
                        task = index,
                        "Task finished after the deadline"
                    );
                    outcomes[index] = Some(TaskOutcome::TimedOut);
                }
                Ok(Some(Err(_))) => {}
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        executor = %self.settings.name,
                        remaining = join_set.len(),
                        grace_ms = self.settings.shutdown_grace.as_millis() as u64,
                        "🛑 EXECUTOR: Grace period elapsed, aborting remaining tasks"
                    );
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                    break;
                }
            }
        }
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
