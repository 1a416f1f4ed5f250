use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{QueueError, TaskQueue};
use crate::domain::{Task, TaskBuilder};

/// At most one live task per key.
///
/// A push is refused while the task last accepted under the same key has not
/// reached a terminal status (`Finished`, `Failed`, `Canceled`).
pub struct UniqueTaskQueue {
    queue: Arc<TaskQueue>,
    tracked: Mutex<HashMap<String, Arc<Task>>>,
}

impl UniqueTaskQueue {
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self {
            queue,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Enqueue unless a task for `key` is still live.
    ///
    /// Returns `Ok(None)` when the push was skipped.
    pub fn push(
        &self,
        key: impl Into<String>,
        builder: TaskBuilder,
    ) -> Result<Option<Arc<Task>>, QueueError> {
        let key = key.into();
        // tracked のロックは submit の間も保持する（同一 key の同時 push を防ぐ）
        let mut tracked = self.tracked.lock();

        if let Some(existing) = tracked.get(&key) {
            let status = existing.status();
            if !status.is_terminal() {
                debug!(key = %key, task = %existing.id(), %status, "already queued; skipping");
                return Ok(None);
            }
        }

        let task = self.queue.submit(builder)?;
        tracked.insert(key, Arc::clone(&task));
        Ok(Some(task))
    }

    /// Push keyed by the target's name.
    pub fn push_by_target(&self, builder: TaskBuilder) -> Result<Option<Arc<Task>>, QueueError> {
        let key = builder.target().name().to_string();
        self.push(key, builder)
    }

    /// The task currently tracked for `key`, if any.
    pub fn tracked(&self, key: &str) -> Option<Arc<Task>> {
        self.tracked.lock().get(key).cloned()
    }
}
