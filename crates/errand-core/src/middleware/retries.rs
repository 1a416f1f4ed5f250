use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use super::{Middleware, Next};
use crate::domain::{Outcome, RetryPolicy, RetryRequest, Task, TaskError, TaskId, TaskStatus};
use crate::queue::{QueueError, TaskQueue};

#[derive(Debug)]
struct RetryState {
    retries: u32,
    task: Weak<Task>,
}

impl RetryState {
    /// Still waiting for its next attempt (not canceled, not dropped).
    fn is_live(&self) -> bool {
        self.task
            .upgrade()
            .is_some_and(|task| task.status() != TaskStatus::Canceled)
    }
}

/// Turns retryable failures into `Outcome::Retry` while budget remains.
///
/// Once the budget is spent the task is marked `Failed` with the final error
/// and the failure is swallowed.
///
/// Retry counters live here keyed by task id. They are dropped when the task
/// finishes or exhausts its budget. Counters of tasks canceled (or dropped)
/// while waiting for a retry are pruned lazily. A policy set on the task
/// itself takes precedence over the one given here.
///
/// Sits inside `SupportOfRetries`, which turns the `Retry` into a re-enqueue.
#[derive(Debug, Default)]
pub struct ConcreteRetries {
    policy: RetryPolicy,
    states: Mutex<HashMap<TaskId, RetryState>>,
}

impl ConcreteRetries {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retries scheduled so far for a task still being retried.
    pub fn retries(&self, id: &TaskId) -> Option<u32> {
        self.states.lock().get(id).map(|state| state.retries)
    }

    /// Number of tasks with a retry in flight.
    pub fn tracked(&self) -> usize {
        let mut states = self.states.lock();
        Self::prune(&mut states);
        states.len()
    }

    fn prune(states: &mut HashMap<TaskId, RetryState>) {
        states.retain(|id, state| {
            let live = state.is_live();
            if !live {
                debug!(task = %id, "dropping retry state of canceled task");
            }
            live
        });
    }

    fn forget(&self, id: &TaskId) {
        self.states.lock().remove(id);
    }

    fn on_failure(&self, task: &Arc<Task>, err: TaskError) -> Outcome {
        let policy = task.retry_policy().unwrap_or(&self.policy);
        let id = task.id();

        if !policy.is_retryable(&err) {
            self.forget(&id);
            return Outcome::Failed(err);
        }

        let mut states = self.states.lock();
        Self::prune(&mut states);
        let retries = states.get(&id).map_or(0, |state| state.retries) + 1;

        if !policy.allows(retries) {
            states.remove(&id);
            drop(states);
            error!(
                task = %id,
                callable = task.target().name(),
                max_retries = policy.max_retries,
                attempts = task.attempts(),
                error = %err,
                "retries exhausted"
            );
            task.mark_failed(err);
            return Outcome::Handled;
        }

        states.insert(
            id,
            RetryState {
                retries,
                task: Arc::downgrade(task),
            },
        );
        drop(states);

        let delay = policy.next_delay(retries);
        info!(
            task = %id,
            retry = retries,
            max_retries = policy.max_retries,
            delay_secs = delay.as_secs(),
            error = %err,
            "scheduling retry"
        );
        Outcome::Retry(RetryRequest {
            delay,
            source: Some(err),
        })
    }
}

#[async_trait]
impl Middleware for ConcreteRetries {
    async fn process(&self, task: &Arc<Task>, queue: &TaskQueue, next: Next<'_>) -> Outcome {
        match next.run(task, queue).await {
            Outcome::Failed(err) => self.on_failure(task, err),
            outcome @ (Outcome::Finished(_) | Outcome::Canceled) => {
                self.forget(&task.id());
                outcome
            }
            other => other,
        }
    }

    fn name(&self) -> &'static str {
        "concrete_retries"
    }
}

/// Re-enqueues tasks whose outcome asks for another run (`Repeat` / `Retry`).
///
/// Stages see the outcome of the stages inside them, so this one must wrap
/// `ConcreteRetries`: declare it first.
///
/// ```ignore
/// Pipeline::new(vec![
///     Arc::new(ExceptionLogging),
///     Arc::new(SupportOfRetries),
///     Arc::new(ConcreteRetries::new(policy)),
/// ]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SupportOfRetries;

#[async_trait]
impl Middleware for SupportOfRetries {
    async fn process(&self, task: &Arc<Task>, queue: &TaskQueue, next: Next<'_>) -> Outcome {
        let outcome = next.run(task, queue).await;
        let Some(run_at) = outcome.run_at() else {
            return outcome;
        };

        match queue.reschedule(Arc::clone(task), run_at) {
            Ok(at) => {
                debug!(task = %task.id(), run_after = %at, "re-enqueued");
                Outcome::Handled
            }
            Err(QueueError::Canceled(_)) => Outcome::Canceled,
            Err(err @ QueueError::AlreadyQueued { .. }) => {
                warn!(task = %task.id(), error = %err, "not re-enqueued");
                Outcome::Handled
            }
            Err(err) => Outcome::Failed(TaskError::other(err.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "support_of_retries"
    }
}
