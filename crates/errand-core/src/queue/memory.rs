//! In-memory task queue.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use super::QueueError;
use super::lanes::PriorityLanes;
use crate::domain::{Priority, RunAt, Task, TaskArgs, TaskBuilder, TaskStatus};
use crate::observability::QueueStats;
use crate::ports::{Clock, SystemClock, TaskTarget};

/// Public enqueue / dequeue surface over the priority lanes.
///
/// Design:
/// - The lanes are the only structure shared between producers and workers;
///   one mutex guards them and is never held across an await or a task run.
/// - `get` never blocks. Polling and backoff belong to the worker.
/// - Every eligibility decision uses the queue's clock.
pub struct TaskQueue {
    lanes: Mutex<PriorityLanes>,
    clock: Arc<dyn Clock>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            lanes: Mutex::new(PriorityLanes::new()),
            clock,
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Build a plain task and enqueue it. `run_after` defaults to now.
    pub fn put(
        &self,
        target: Arc<dyn TaskTarget>,
        args: TaskArgs,
        priority: Priority,
        run_after: Option<DateTime<Utc>>,
    ) -> Result<Arc<Task>, QueueError> {
        self.submit(
            Task::builder(target)
                .args(args)
                .priority(priority)
                .maybe_run_after(run_after),
        )
    }

    /// Build any kind of task (interval, delayed, cron, ...) and enqueue it.
    pub fn submit(&self, builder: TaskBuilder) -> Result<Arc<Task>, QueueError> {
        let task = Arc::new(builder.build(self.clock())?);
        self.put_task(Arc::clone(&task))?;
        Ok(task)
    }

    /// Accept a task: it becomes `Pending` and waits for its `run_after`.
    ///
    /// A canceled task is refused, and so is one already queued or running
    /// (one queue entry, one executing worker per task).
    pub fn put_task(&self, task: Arc<Task>) -> Result<(), QueueError> {
        self.enqueue(task, None, false).map(|_| ())
    }

    /// Re-arm a task that just ran, with eligibility resolved against now.
    pub fn reschedule(&self, task: Arc<Task>, run_at: RunAt) -> Result<DateTime<Utc>, QueueError> {
        let at = run_at.resolve(self.now());
        self.enqueue(task, Some(at), true)
    }

    fn enqueue(
        &self,
        task: Arc<Task>,
        run_after: Option<DateTime<Utc>>,
        rearm: bool,
    ) -> Result<DateTime<Utc>, QueueError> {
        let run_after = match task.mark_pending(run_after, rearm) {
            Ok(run_after) => run_after,
            Err(TaskStatus::Canceled) => return Err(QueueError::Canceled(task.id())),
            Err(status) => return Err(QueueError::AlreadyQueued { id: task.id(), status }),
        };

        debug!(task = %task.id(), priority = %task.priority(), %run_after, "enqueue");
        self.lanes.lock().push(task, run_after);
        Ok(run_after)
    }

    /// Pop the most urgent task that is already due, if any. Never blocks.
    pub fn get(&self) -> Option<Arc<Task>> {
        let now = self.now();
        let task = self.lanes.lock().pop_eligible(now);
        if let Some(task) = &task {
            debug!(task = %task.id(), "dequeue");
        }
        task
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.lanes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.lock().is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let now = self.now();
        let lanes = self.lanes.lock();
        QueueStats {
            pending: lanes.len(),
            eligible: lanes.eligible_count(now),
            by_priority: lanes.count_by_priority(),
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ScheduleError;
    use crate::ports::{FixedClock, from_fn};
    use chrono::TimeZone;
    use serde_json::Value;
    use std::time::Duration;

    fn fixture() -> (Arc<FixedClock>, TaskQueue) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let queue = TaskQueue::with_clock(clock.clone());
        (clock, queue)
    }

    fn noop() -> Arc<dyn TaskTarget> {
        from_fn("noop", |_| Ok(Value::Null))
    }

    #[test]
    fn put_marks_pending_and_counts() {
        let (_clock, queue) = fixture();
        let task = queue
            .put(noop(), TaskArgs::new(), Priority::MEDIUM, None)
            .unwrap();

        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_empty());
    }

    #[test]
    fn get_on_empty_queue_returns_none() {
        let (_clock, queue) = fixture();
        assert!(queue.get().is_none());
    }

    #[test]
    fn get_respects_run_after() {
        let (clock, queue) = fixture();
        let run_after = clock.now() + chrono::TimeDelta::seconds(2);
        let task = queue
            .put(noop(), TaskArgs::new(), Priority::HIGH, Some(run_after))
            .unwrap();

        assert!(queue.get().is_none());
        clock.advance(Duration::from_millis(1999));
        assert!(queue.get().is_none());
        clock.advance(Duration::from_millis(1));
        assert_eq!(queue.get().map(|t| t.id()), Some(task.id()));
    }

    #[test]
    fn canceled_task_is_refused() {
        let (_clock, queue) = fixture();
        let task = Arc::new(Task::create(noop(), TaskArgs::new(), Priority::LOW, None));
        task.cancel();

        let err = queue.put_task(Arc::clone(&task)).unwrap_err();
        assert!(matches!(err, QueueError::Canceled(id) if id == task.id()));
        assert!(queue.is_empty());
    }

    #[test]
    fn queued_task_is_not_queued_twice() {
        let (_clock, queue) = fixture();
        let task = queue.put(noop(), TaskArgs::new(), Priority::HIGH, None).unwrap();

        let err = queue.put_task(Arc::clone(&task)).unwrap_err();
        assert!(matches!(
            err,
            QueueError::AlreadyQueued { id, status: TaskStatus::Pending } if id == task.id()
        ));
        assert_eq!(queue.len(), 1);

        assert!(queue.get().is_some());
        assert!(queue.get().is_none());
    }

    #[test]
    fn popped_task_cannot_be_queued_again_before_it_runs() {
        let (_clock, queue) = fixture();
        queue.put(noop(), TaskArgs::new(), Priority::HIGH, None).unwrap();
        let popped = queue.get().unwrap();

        assert!(queue.put_task(Arc::clone(&popped)).is_err());
        assert!(queue.reschedule(popped, RunAt::After(Duration::ZERO)).is_err());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn finished_task_can_be_put_again() {
        let (_clock, queue) = fixture();
        let task = queue.put(noop(), TaskArgs::new(), Priority::HIGH, None).unwrap();
        queue.get().unwrap().run(queue.clock()).await;
        assert_eq!(task.status(), TaskStatus::Finished);

        queue.put_task(Arc::clone(&task)).unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn reschedule_sets_new_eligibility() {
        let (clock, queue) = fixture();
        let task = queue.put(noop(), TaskArgs::new(), Priority::LOW, None).unwrap();
        let popped = queue.get().unwrap();
        popped.run(queue.clock()).await;

        let at = queue
            .reschedule(popped, RunAt::After(Duration::from_secs(11)))
            .unwrap();

        assert_eq!(at, clock.now() + chrono::TimeDelta::seconds(11));
        assert_eq!(task.run_after(), at);
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(queue.get().is_none());
    }

    #[test]
    fn submit_surfaces_schedule_errors() {
        let (_clock, queue) = fixture();
        let err = queue.submit(Task::builder(noop()).cron("61 * * * *")).unwrap_err();
        assert!(matches!(err, QueueError::Schedule(ScheduleError::InvalidCron { .. })));
    }

    #[test]
    fn stats_split_pending_and_eligible() {
        let (clock, queue) = fixture();
        queue.put(noop(), TaskArgs::new(), Priority::HIGH, None).unwrap();
        queue
            .put(
                noop(),
                TaskArgs::new(),
                Priority::LOW,
                Some(clock.now() + chrono::TimeDelta::minutes(5)),
            )
            .unwrap();

        let stats = queue.stats();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.eligible, 1);
        assert_eq!(stats.by_priority.len(), 2);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["pending"], 2);
    }

    #[test]
    fn concurrent_producers_do_not_lose_tasks() {
        let queue = Arc::new(TaskQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        queue.put(noop(), TaskArgs::new(), Priority::MEDIUM, None).unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        assert_eq!(queue.len(), 1000);
    }
}
