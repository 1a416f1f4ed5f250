//! Ports - 抽象化レイヤー
//!
//! 時刻と実行対象（target）を trait として切り出す。
//! テストでは FixedClock や closure target に差し替える。

pub mod clock;
pub mod target;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::target::{BlockingFnTarget, FnTarget, TaskTarget, from_blocking_fn, from_fn};
