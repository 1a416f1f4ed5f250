//! Task targets: the unit of work a task calls.

use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

use crate::domain::{TaskArgs, TaskError};

/// The callable behind a task.
///
/// # 使用例
/// ```ignore
/// struct PollRouter { client: RouterClient }
///
/// #[async_trait]
/// impl TaskTarget for PollRouter {
///     async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError> {
///         let hosts = self.client.connected_hosts().await?;
///         Ok(serde_json::to_value(hosts)?)
///     }
///
///     fn name(&self) -> &str {
///         "router.poll"
///     }
/// }
/// ```
///
/// Blocking I/O inside `call` stalls a runtime thread; wrap blocking work
/// with [`from_blocking_fn`] instead.
#[async_trait]
pub trait TaskTarget: Send + Sync {
    async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError>;

    /// Identity used in logs, spans and de-duplication.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Closure target executed inline on the worker loop.
pub struct FnTarget<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> TaskTarget for FnTarget<F>
where
    F: Fn(&TaskArgs) -> Result<Value, TaskError> + Send + Sync,
{
    async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError> {
        (self.f)(args)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Closure target executed on tokio's blocking pool.
pub struct BlockingFnTarget<F> {
    name: String,
    f: Arc<F>,
}

#[async_trait]
impl<F> TaskTarget for BlockingFnTarget<F>
where
    F: Fn(&TaskArgs) -> Result<Value, TaskError> + Send + Sync + 'static,
{
    async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError> {
        let f = Arc::clone(&self.f);
        let args = args.clone();
        match tokio::task::spawn_blocking(move || f(&args)).await {
            Ok(result) => result,
            Err(join) if join.is_panic() => {
                Err(TaskError::Panicked(panic_message(&*join.into_panic())))
            }
            Err(join) => Err(TaskError::other(format!("blocking call aborted: {join}"))),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap a cheap, non-blocking closure.
pub fn from_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn TaskTarget>
where
    F: Fn(&TaskArgs) -> Result<Value, TaskError> + Send + Sync + 'static,
{
    Arc::new(FnTarget {
        name: name.into(),
        f,
    })
}

/// Wrap a closure that blocks (network calls, disk writes, camera capture).
pub fn from_blocking_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn TaskTarget>
where
    F: Fn(&TaskArgs) -> Result<Value, TaskError> + Send + Sync + 'static,
{
    Arc::new(BlockingFnTarget {
        name: name.into(),
        f: Arc::new(f),
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fn_target_receives_args() {
        let target = from_fn("sum", |args| {
            let total: i64 = args.args.iter().filter_map(Value::as_i64).sum();
            Ok(json!(total))
        });

        let args = TaskArgs::new().arg(2).arg(40);
        assert_eq!(target.call(&args).await.unwrap(), json!(42));
        assert_eq!(target.name(), "sum");
    }

    #[tokio::test]
    async fn blocking_target_runs_off_the_loop() {
        let target = from_blocking_fn("sleepy", |args| {
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok(args.kwarg("camera").cloned().unwrap_or(Value::Null))
        });

        let args = TaskArgs::new().with_kwarg("camera", "porch");
        assert_eq!(target.call(&args).await.unwrap(), json!("porch"));
    }

    #[tokio::test]
    async fn blocking_target_panic_becomes_error() {
        let target = from_blocking_fn("explodes", |_| panic!("lens cap on"));
        let err = target.call(&TaskArgs::new()).await.unwrap_err();
        assert_eq!(err, TaskError::Panicked("lens cap on".to_string()));
    }
}
