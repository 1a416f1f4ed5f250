//! Middleware chain wrapped around every task execution.
//!
//! A stage receives the task, the queue it came from, and `next`. It may run
//! code before and after `next.run(..)`, inspect or replace the `Outcome`,
//! or skip `next` entirely. The innermost step is `Task::run`.
//!
//! A stage only sees outcomes produced further in. A stage that reacts to
//! another stage's outcome must therefore be declared before it
//! (`SupportOfRetries` before `ConcreteRetries`).
//!
//! # 使用例
//!
//! ```ignore
//! let pipeline = Pipeline::new(vec![
//!     Arc::new(ExceptionLogging),
//!     Arc::new(PerformanceLogging::new()),
//!     Arc::new(SupportOfRetries),
//!     Arc::new(ConcreteRetries::new(RetryPolicy::for_connection_errors())),
//! ]);
//! let outcome = pipeline.execute(&task, &queue).await;
//! ```

mod exception_logging;
mod performance;
mod retries;

pub use exception_logging::ExceptionLogging;
pub use performance::PerformanceLogging;
pub use retries::{ConcreteRetries, SupportOfRetries};

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::{Outcome, RetryPolicy, Task};
use crate::queue::TaskQueue;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn process(&self, task: &Arc<Task>, queue: &TaskQueue, next: Next<'_>) -> Outcome;

    fn name(&self) -> &'static str;
}

/// The rest of the chain after the current stage.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(rest: &'a [Arc<dyn Middleware>]) -> Self {
        Self { rest }
    }

    pub async fn run(self, task: &Arc<Task>, queue: &TaskQueue) -> Outcome {
        match self.rest.split_first() {
            Some((stage, rest)) => stage.process(task, queue, Next::new(rest)).await,
            None => task.run(queue.clock()).await,
        }
    }
}

/// Ordered middleware stages, outermost first.
///
/// Design:
/// - Built once per worker and shared by all of its loops (stages are `Sync`).
/// - The chain is a slice walk; no closures are allocated per task.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Middleware>>) -> Self {
        Self { stages }
    }

    /// Logging, timing, re-enqueueing and retry decisions, outermost first.
    pub fn standard(policy: RetryPolicy) -> Self {
        Self::new(vec![
            Arc::new(ExceptionLogging),
            Arc::new(PerformanceLogging::new()),
            Arc::new(SupportOfRetries),
            Arc::new(ConcreteRetries::new(policy)),
        ])
    }

    pub async fn execute(&self, task: &Arc<Task>, queue: &TaskQueue) -> Outcome {
        Next::new(&self.stages).run(task, queue).await
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub(crate) fn into_stages(self) -> Vec<Arc<dyn Middleware>> {
        self.stages
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
