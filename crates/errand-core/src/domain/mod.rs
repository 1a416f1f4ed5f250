//! Domain model (ids, priorities, tasks, outcomes, retry policy, ...).

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod priority;
pub mod retry;
pub mod schedule;
pub mod state;
pub mod task;

pub use self::errors::{ErrorKind, TaskError};
pub use self::ids::TaskId;
pub use self::outcome::{Outcome, RetryRequest, RunAt};
pub use self::priority::Priority;
pub use self::retry::{Backoff, MAX_RETRY_DELAY, RetryOn, RetryPolicy};
pub use self::schedule::{CronSchedule, ScheduleError};
pub use self::state::TaskStatus;
pub use self::task::{Task, TaskArgs, TaskBuilder, TaskKind};
