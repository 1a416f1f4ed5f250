use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

use super::{Middleware, Next};
use crate::domain::{Outcome, Task};
use crate::queue::TaskQueue;

/// Outermost stage: any failure still unhandled here is logged and recorded
/// on the task, and never reaches the worker loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionLogging;

#[async_trait]
impl Middleware for ExceptionLogging {
    async fn process(&self, task: &Arc<Task>, queue: &TaskQueue, next: Next<'_>) -> Outcome {
        match next.run(task, queue).await {
            Outcome::Failed(err) => {
                error!(
                    task = %task.id(),
                    kind = task.kind().name(),
                    callable = task.target().name(),
                    error_kind = ?err.kind(),
                    error = %err,
                    "task failed"
                );
                task.mark_failed(err);
                Outcome::Handled
            }
            other => other,
        }
    }

    fn name(&self) -> &'static str {
        "exception_logging"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, TaskArgs, TaskError, TaskStatus};
    use crate::middleware::Pipeline;
    use crate::ports::from_fn;
    use serde_json::Value;

    #[tokio::test]
    async fn failure_is_swallowed_and_recorded() {
        let queue = TaskQueue::new();
        let target = from_fn("broken", |_| Err(TaskError::other("boom")));
        queue.put(target, TaskArgs::new(), Priority::HIGH, None).unwrap();
        let task = queue.get().unwrap();

        let pipeline = Pipeline::new(vec![Arc::new(ExceptionLogging)]);
        let outcome = pipeline.execute(&task, &queue).await;

        assert_eq!(outcome, Outcome::Handled);
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.last_error(), Some(TaskError::other("boom")));
    }

    #[tokio::test]
    async fn success_passes_through() {
        let queue = TaskQueue::new();
        let target = from_fn("fine", |_| Ok(Value::from(7)));
        queue.put(target, TaskArgs::new(), Priority::HIGH, None).unwrap();
        let task = queue.get().unwrap();

        let pipeline = Pipeline::new(vec![Arc::new(ExceptionLogging)]);
        assert_eq!(pipeline.execute(&task, &queue).await, Outcome::Finished(Value::from(7)));
    }
}
