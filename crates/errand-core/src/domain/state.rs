//! Task status lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a task is in its life.
///
/// State transitions:
/// - Created -> Pending -> Started -> Finished
/// - Created -> Pending -> Started -> Failed
/// - Created | Pending -> Canceled
/// - Started -> Canceled (requested while running; execution is not interrupted)
/// - Finished | Failed -> Pending (re-armed by a repeat or retry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Constructed, not yet accepted by a queue.
    Created,

    /// Waiting in a queue.
    Pending,

    /// Being executed by a worker.
    Started,

    /// Last execution succeeded.
    Finished,

    /// Last execution failed.
    Failed,

    /// Canceled; never executes (again).
    Canceled,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions without a re-arm)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    /// Can a cancellation still prevent execution?
    pub fn is_cancelable(self) -> bool {
        matches!(self, TaskStatus::Created | TaskStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Pending => "pending",
            TaskStatus::Started => "started",
            TaskStatus::Finished => "finished",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
