//! Task: a unit of deferred work plus its execution state.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::errors::TaskError;
use super::ids::TaskId;
use super::outcome::{Outcome, RunAt};
use super::priority::Priority;
use super::retry::RetryPolicy;
use super::schedule::{CronSchedule, ScheduleError};
use super::state::TaskStatus;
use crate::ports::clock::add_duration;
use crate::ports::target::panic_message;
use crate::ports::{Clock, SystemClock, TaskTarget};

/// Arguments bound to a task and handed to its target on every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskArgs {
    #[serde(default)]
    pub args: Vec<Value>,

    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl TaskArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }
}

/// How a task behaves after it runs.
#[derive(Debug, Clone)]
pub enum TaskKind {
    /// Runs once.
    Plain,

    /// Re-arms `every` after each run.
    Interval { every: Duration, run_immediately: bool },

    /// Runs once, `delay` after its base time.
    Delayed { delay: Duration },

    /// Re-arms at the next cron match after each run.
    Scheduled(CronSchedule),
}

impl TaskKind {
    /// Name used in logs and performance spans.
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Plain => "task",
            TaskKind::Interval { .. } => "interval_task",
            TaskKind::Delayed { .. } => "delayed_task",
            TaskKind::Scheduled(_) => "scheduled_task",
        }
    }

    pub fn is_repeatable(&self) -> bool {
        matches!(self, TaskKind::Interval { .. } | TaskKind::Scheduled(_))
    }
}

#[derive(Debug)]
struct TaskState {
    status: TaskStatus,
    run_after: DateTime<Utc>,
    result: Option<Value>,
    last_error: Option<TaskError>,
    attempts: u32,
}

/// A unit of deferred, priority-ordered work.
///
/// Shared as `Arc<Task>`: the queue holds it while pending, exactly one worker
/// holds it while it runs, and callers keep their own handle to poll
/// `status()` / `result()` / `last_error()` or to `cancel()`.
///
/// Design:
/// - Identity, target, args and policy never change after construction.
/// - Mutable execution state sits behind one mutex per task; the lock is never
///   held while the target runs.
pub struct Task {
    id: TaskId,
    kind: TaskKind,
    priority: Priority,
    target: Arc<dyn TaskTarget>,
    args: TaskArgs,
    retry_policy: Option<RetryPolicy>,
    state: Mutex<TaskState>,
}

impl Task {
    pub fn builder(target: Arc<dyn TaskTarget>) -> TaskBuilder {
        TaskBuilder::new(target)
    }

    /// Plain one-shot task; `run_after` defaults to now.
    pub fn create(
        target: Arc<dyn TaskTarget>,
        args: TaskArgs,
        priority: Priority,
        run_after: Option<DateTime<Utc>>,
    ) -> Self {
        let clock = SystemClock;
        let run_after = run_after.unwrap_or_else(|| clock.now());
        Self::assemble(
            TaskId::generate(&clock),
            TaskKind::Plain,
            priority,
            target,
            args,
            None,
            run_after,
        )
    }

    fn assemble(
        id: TaskId,
        kind: TaskKind,
        priority: Priority,
        target: Arc<dyn TaskTarget>,
        args: TaskArgs,
        retry_policy: Option<RetryPolicy>,
        run_after: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            priority,
            target,
            args,
            retry_policy,
            state: Mutex::new(TaskState {
                status: TaskStatus::Created,
                run_after,
                result: None,
                last_error: None,
                attempts: 0,
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn target(&self) -> &Arc<dyn TaskTarget> {
        &self.target
    }

    pub fn args(&self) -> &TaskArgs {
        &self.args
    }

    /// Task-level override for the retry middleware's policy.
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    pub fn run_after(&self) -> DateTime<Utc> {
        self.state.lock().run_after
    }

    /// Value returned by the last successful run.
    pub fn result(&self) -> Option<Value> {
        self.state.lock().result.clone()
    }

    /// Error raised by the last failed run.
    pub fn last_error(&self) -> Option<TaskError> {
        self.state.lock().last_error.clone()
    }

    /// Number of times the target has been started.
    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    pub fn is_canceled(&self) -> bool {
        self.status() == TaskStatus::Canceled
    }

    /// Request cancellation.
    ///
    /// Returns `true` if the task had not started yet, so it will never run.
    /// Otherwise the task is still flagged canceled (a running target finishes
    /// and a repeatable task does not re-arm) and `false` is returned.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        let accepted = state.status.is_cancelable();
        state.status = TaskStatus::Canceled;
        debug!(task = %self.id, accepted, "cancel requested");
        accepted
    }

    /// Accept into a queue: `Pending`, optionally with a new eligibility time.
    ///
    /// Returns the eligibility time to index the task by. A canceled task, a
    /// task already queued, and (unless `rearm`) a task being executed are
    /// refused with their current status.
    pub(crate) fn mark_pending(
        &self,
        run_after: Option<DateTime<Utc>>,
        rearm: bool,
    ) -> Result<DateTime<Utc>, TaskStatus> {
        let mut state = self.state.lock();
        match state.status {
            TaskStatus::Canceled | TaskStatus::Pending => return Err(state.status),
            TaskStatus::Started if !rearm => return Err(state.status),
            _ => {}
        }
        if let Some(run_after) = run_after {
            state.run_after = run_after;
        }
        state.status = TaskStatus::Pending;
        Ok(state.run_after)
    }

    /// Record a failure decided outside of `run` (retry budget exhausted, etc.).
    pub(crate) fn mark_failed(&self, err: TaskError) {
        let mut state = self.state.lock();
        state.last_error = Some(err);
        if state.status != TaskStatus::Canceled {
            state.status = TaskStatus::Failed;
        }
    }

    /// Execute the target once.
    ///
    /// - Canceled before start: returns `Outcome::Canceled` without calling the target.
    /// - Success: `result` is stored and the task is `Finished`.
    /// - Failure (including a panic in the target): `last_error` is stored and
    ///   the task is `Failed`.
    /// - Repeatable tasks log their failure and return `Outcome::Repeat`
    ///   unless they were canceled while running.
    pub async fn run(&self, clock: &dyn Clock) -> Outcome {
        {
            let mut state = self.state.lock();
            if state.status == TaskStatus::Canceled {
                debug!(task = %self.id, "skipping canceled task");
                return Outcome::Canceled;
            }
            state.status = TaskStatus::Started;
            state.result = None;
            state.last_error = None;
            state.attempts += 1;
        }

        let result = AssertUnwindSafe(self.target.call(&self.args))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(&*panic))));

        let canceled = {
            let mut state = self.state.lock();
            let canceled = state.status == TaskStatus::Canceled;
            match &result {
                Ok(value) => {
                    state.result = Some(value.clone());
                    if !canceled {
                        state.status = TaskStatus::Finished;
                    }
                }
                Err(err) => {
                    state.last_error = Some(err.clone());
                    if !canceled {
                        state.status = TaskStatus::Failed;
                    }
                }
            }
            canceled
        };

        if canceled {
            debug!(task = %self.id, "canceled while running; not re-arming");
            return Outcome::Canceled;
        }

        match &self.kind {
            TaskKind::Interval { every, .. } => {
                self.log_repeatable_failure(&result);
                Outcome::Repeat(RunAt::After(*every))
            }
            TaskKind::Scheduled(schedule) => {
                self.log_repeatable_failure(&result);
                match schedule.next_after(clock.now()) {
                    Some(at) => Outcome::Repeat(RunAt::At(at)),
                    None => {
                        info!(task = %self.id, cron = schedule.expression(), "schedule exhausted");
                        Self::settle(result)
                    }
                }
            }
            TaskKind::Plain | TaskKind::Delayed { .. } => Self::settle(result),
        }
    }

    fn settle(result: Result<Value, TaskError>) -> Outcome {
        match result {
            Ok(value) => Outcome::Finished(value),
            Err(err) => Outcome::Failed(err),
        }
    }

    fn log_repeatable_failure(&self, result: &Result<Value, TaskError>) {
        if let Err(err) = result {
            warn!(
                task = %self.id,
                kind = self.kind.name(),
                callable = self.target.name(),
                error = %err,
                "repeatable task failed; re-arming anyway"
            );
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind.name())
            .field("target", &self.target.name())
            .field("priority", &self.priority)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {})", self.kind.name(), self.target.name(), self.id)
    }
}

#[derive(Debug, Clone)]
enum KindSpec {
    Plain,
    Interval { every: Duration, run_immediately: bool },
    Delayed { delay: Duration },
    Cron(String),
    Schedule(CronSchedule),
}

/// Builder for plain and repeatable tasks.
///
/// # 使用例
/// ```ignore
/// let task = Task::builder(from_fn("backup", backup))
///     .priority(Priority::LOW)
///     .cron("0 1 * * *")
///     .build(&SystemClock)?;
/// ```
pub struct TaskBuilder {
    target: Arc<dyn TaskTarget>,
    args: TaskArgs,
    priority: Priority,
    run_after: Option<DateTime<Utc>>,
    kind: KindSpec,
    retry_policy: Option<RetryPolicy>,
}

impl TaskBuilder {
    pub fn new(target: Arc<dyn TaskTarget>) -> Self {
        Self {
            target,
            args: TaskArgs::default(),
            priority: Priority::default(),
            run_after: None,
            kind: KindSpec::Plain,
            retry_policy: None,
        }
    }

    pub fn target(&self) -> &Arc<dyn TaskTarget> {
        &self.target
    }

    pub fn args(mut self, args: TaskArgs) -> Self {
        self.args = args;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Base eligibility time. Defaults to the clock's now at build time.
    pub fn run_after(mut self, at: DateTime<Utc>) -> Self {
        self.run_after = Some(at);
        self
    }

    pub fn maybe_run_after(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.run_after = at;
        self
    }

    /// Re-arm `every` after each run; first run at the base time if
    /// `run_immediately`, otherwise one interval later.
    pub fn interval(mut self, every: Duration, run_immediately: bool) -> Self {
        self.kind = KindSpec::Interval {
            every,
            run_immediately,
        };
        self
    }

    /// One-shot, `delay` after the base time.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.kind = KindSpec::Delayed { delay };
        self
    }

    /// Re-arm on a cron expression; parsed at `build`.
    pub fn cron(mut self, expression: impl Into<String>) -> Self {
        self.kind = KindSpec::Cron(expression.into());
        self
    }

    pub fn schedule(mut self, schedule: CronSchedule) -> Self {
        self.kind = KindSpec::Schedule(schedule);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn build(self, clock: &dyn Clock) -> Result<Task, ScheduleError> {
        let base = self.run_after.unwrap_or_else(|| clock.now());

        let (kind, run_after) = match self.kind {
            KindSpec::Plain => (TaskKind::Plain, base),
            KindSpec::Interval {
                every,
                run_immediately,
            } => {
                let first = if run_immediately {
                    base
                } else {
                    add_duration(base, every)
                };
                (
                    TaskKind::Interval {
                        every,
                        run_immediately,
                    },
                    first,
                )
            }
            KindSpec::Delayed { delay } => {
                (TaskKind::Delayed { delay }, add_duration(base, delay))
            }
            KindSpec::Cron(expression) => {
                let schedule = CronSchedule::parse(&expression)?;
                let first = schedule
                    .next_after(base)
                    .ok_or(ScheduleError::NoUpcoming(expression))?;
                (TaskKind::Scheduled(schedule), first)
            }
            KindSpec::Schedule(schedule) => {
                let first = schedule
                    .next_after(base)
                    .ok_or_else(|| ScheduleError::NoUpcoming(schedule.expression().to_string()))?;
                (TaskKind::Scheduled(schedule), first)
            }
        };

        Ok(Task::assemble(
            TaskId::generate(clock),
            kind,
            self.priority,
            self.target,
            self.args,
            self.retry_policy,
            run_after,
        ))
    }
}
