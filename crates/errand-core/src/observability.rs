use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::Priority;

/// Point-in-time view of the queue, for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Tasks waiting in the queue (including not-yet-eligible ones).
    pub pending: usize,

    /// Pending tasks whose `run_after` has passed.
    pub eligible: usize,

    pub by_priority: BTreeMap<Priority, usize>,
}
