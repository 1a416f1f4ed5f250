//! Task identifiers.
//!
//! ULID ベースの ID を使う。
//! - 時刻でソート可能（生成順に並ぶ）
//! - 調整なしで複数スレッドから生成できる
//!
//! The timestamp half is taken from a [`Clock`], so ids minted under a
//! `FixedClock` are deterministic in their ordering.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use crate::ports::Clock;

/// Identity of a task for its whole life, including every re-arm.
///
/// Middleware that needs per-task bookkeeping (retry counters, etc.) keys its
/// own side table by this id instead of stashing data on the task.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Ulid);

impl TaskId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Mint a new id whose timestamp part comes from `clock`.
    pub fn generate(clock: &dyn Clock) -> Self {
        let timestamp_ms = u64::try_from(clock.now().timestamp_millis()).unwrap_or(0);
        Self(Ulid::from_parts(timestamp_ms, rand::random()))
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    #[test]
    fn display_has_task_prefix() {
        let id = TaskId::from_ulid(Ulid::new());
        assert!(id.to_string().starts_with("task-"));
    }

    #[test]
    fn ids_follow_clock_order() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        let id1 = TaskId::generate(&clock);
        clock.advance(Duration::from_millis(5));
        let id2 = TaskId::generate(&clock);
        clock.advance(Duration::from_millis(5));
        let id3 = TaskId::generate(&clock);

        assert!(id1 < id2);
        assert!(id2 < id3);
        assert_eq!(id1.as_ulid().timestamp_ms(), 1_704_067_200_000);
    }

    #[test]
    fn ids_generated_at_same_instant_differ() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_ne!(TaskId::generate(&clock), TaskId::generate(&clock));
    }

    #[test]
    fn serializes_as_plain_ulid_string() {
        let ulid = Ulid::new();
        let id = TaskId::from_ulid(ulid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{ulid}\""));
    }
}
