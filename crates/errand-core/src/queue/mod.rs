//! Queue module: priority lanes, the in-memory facade, and de-duplication.

mod lanes;
mod memory;
mod unique;

pub use memory::TaskQueue;
pub use unique::UniqueTaskQueue;

use thiserror::Error;

use crate::domain::{ScheduleError, TaskId, TaskStatus};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{0} is canceled and cannot be queued")]
    Canceled(TaskId),

    #[error("{id} is already {status}")]
    AlreadyQueued { id: TaskId, status: TaskStatus },

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}
