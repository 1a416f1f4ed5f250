//! Priority lanes: the ordered container behind `TaskQueue`.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;
use tracing::debug;

use crate::domain::{Priority, Task};

/// Heap entry. The eligibility time is snapshotted at push time.
///
/// We use reverse ordering so BinaryHeap acts as a min-heap (earliest first).
/// `seq` only makes the order total; it is not a FIFO promise.
struct Entry {
    run_after: DateTime<Utc>,
    seq: u64,
    task: Arc<Task>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.run_after == other.run_after && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .run_after
            .cmp(&self.run_after)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// One min-heap (by eligibility time) per priority.
///
/// `pop_eligible` walks lanes from the most urgent priority down and takes the
/// first lane head that is already due. A lane whose head is not due has no
/// due entries at all, so each call touches at most one head per lane.
#[derive(Default)]
pub(crate) struct PriorityLanes {
    lanes: BTreeMap<Priority, BinaryHeap<Entry>>,
    next_seq: u64,
    len: usize,
}

impl PriorityLanes {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, task: Arc<Task>, run_after: DateTime<Utc>) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.lanes
            .entry(task.priority())
            .or_default()
            .push(Entry {
                run_after,
                seq,
                task,
            });
        self.len += 1;
    }

    /// Remove and return the most urgent task due at `now`.
    ///
    /// Canceled tasks found at a lane head are dropped on the way.
    pub(crate) fn pop_eligible(&mut self, now: DateTime<Utc>) -> Option<Arc<Task>> {
        let mut found = None;
        for lane in self.lanes.values_mut() {
            while let Some(head) = lane.peek() {
                if head.task.is_canceled() {
                    if let Some(dropped) = lane.pop() {
                        self.len -= 1;
                        debug!(task = %dropped.task.id(), "discarding canceled task");
                    }
                    continue;
                }
                if head.run_after > now {
                    break;
                }
                found = lane.pop().map(|entry| entry.task);
                break;
            }
            if found.is_some() {
                self.len -= 1;
                break;
            }
        }
        // Lanes only exist while they hold entries.
        self.lanes.retain(|_, lane| !lane.is_empty());
        found
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries already due at `now`.
    pub(crate) fn eligible_count(&self, now: DateTime<Utc>) -> usize {
        self.lanes
            .values()
            .flat_map(|lane| lane.iter())
            .filter(|entry| entry.run_after <= now)
            .count()
    }

    pub(crate) fn count_by_priority(&self) -> BTreeMap<Priority, usize> {
        self.lanes
            .iter()
            .map(|(priority, lane)| (*priority, lane.len()))
            .collect()
    }
}
