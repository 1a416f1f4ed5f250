use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, info_span, warn};

use super::{Middleware, Next};
use crate::domain::{Outcome, Task};
use crate::queue::TaskQueue;

/// Runs the rest of the chain inside a `task` span and logs how long it took.
#[derive(Debug, Clone, Default)]
pub struct PerformanceLogging {
    warn_slower_than: Option<Duration>,
}

impl PerformanceLogging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a warning instead of a debug line for runs slower than `threshold`.
    pub fn warn_slower_than(mut self, threshold: Duration) -> Self {
        self.warn_slower_than = Some(threshold);
        self
    }
}

#[async_trait]
impl Middleware for PerformanceLogging {
    async fn process(&self, task: &Arc<Task>, queue: &TaskQueue, next: Next<'_>) -> Outcome {
        let span = info_span!(
            "task",
            id = %task.id(),
            kind = task.kind().name(),
            callable = task.target().name(),
        );

        async {
            let started = Instant::now();
            let outcome = next.run(task, queue).await;
            let elapsed = started.elapsed();
            let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

            match self.warn_slower_than {
                Some(threshold) if elapsed > threshold => warn!(elapsed_ms, "slow task"),
                _ => debug!(elapsed_ms, "task done"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    fn name(&self) -> &'static str {
        "performance_logging"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, TaskArgs};
    use crate::middleware::Pipeline;
    use crate::ports::from_fn;
    use serde_json::Value;

    #[tokio::test]
    async fn outcome_is_returned_unchanged() {
        let queue = TaskQueue::new();
        let target = from_fn("timed", |_| Ok(Value::from("ok")));
        queue.put(target, TaskArgs::new(), Priority::LOW, None).unwrap();
        let task = queue.get().unwrap();

        let pipeline = Pipeline::new(vec![Arc::new(
            PerformanceLogging::new().warn_slower_than(Duration::ZERO),
        )]);

        assert_eq!(pipeline.execute(&task, &queue).await, Outcome::Finished(Value::from("ok")));
    }
}
