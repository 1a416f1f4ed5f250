//! errand-core
//!
//! In-memory, priority-ordered task queue with deferred execution, retries,
//! repeatable (interval / delayed / cron) tasks and a middleware pipeline.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, priority, state, task, outcome, retry, schedule, errors）
//! - **ports**: 抽象化レイヤー（Clock, TaskTarget）
//! - **queue**: priority lanes + TaskQueue facade + UniqueTaskQueue
//! - **middleware**: Middleware trait, Pipeline, 標準ステージ
//! - **worker**: tokio 上の実行ループ
//! - **config**: WorkerConfig / RetryConfig（JSON）
//! - **observability**: QueueStats
//! - **error**: WorkerError / ConfigError

pub mod config;
pub mod domain;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod worker;

pub use config::{ErrandConfig, RetryConfig, WorkerConfig};
pub use domain::{
    Backoff, CronSchedule, ErrorKind, Outcome, Priority, RetryPolicy, RunAt, ScheduleError, Task,
    TaskArgs, TaskBuilder, TaskError, TaskId, TaskKind, TaskStatus,
};
pub use error::{ConfigError, WorkerError};
pub use middleware::{
    ConcreteRetries, ExceptionLogging, Middleware, Next, PerformanceLogging, Pipeline,
    SupportOfRetries,
};
pub use observability::QueueStats;
pub use ports::{Clock, FixedClock, SystemClock, TaskTarget, from_blocking_fn, from_fn};
pub use queue::{QueueError, TaskQueue, UniqueTaskQueue};
pub use worker::{Worker, WorkerBuilder};
