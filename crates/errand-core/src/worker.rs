use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::domain::{Outcome, Task, TaskError};
use crate::error::WorkerError;
use crate::middleware::{Middleware, Pipeline};
use crate::ports::target::panic_message;
use crate::queue::{QueueError, TaskQueue};

type OnClose = Box<dyn FnOnce() + Send>;

struct Shared {
    queue: Arc<TaskQueue>,
    pipeline: Pipeline,
    poll_interval: Duration,
}

/// Running loops handle.
/// - `shutdown_tx` に true を送るとループ全体が止まる
/// - `joins` で全ループの終了を待てる
struct RunningLoops {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

/// Worker lifecycle. Transitions happen under one lock, so `run` and `stop`
/// never interleave.
enum Lifecycle {
    Idle,
    Running(RunningLoops),
    /// Loops signaled; the first `stop` is joining them.
    Stopping,
    /// Loops joined and `on_close` called. Final.
    Closed,
}

/// Pulls eligible tasks from a queue and runs them through the middleware
/// pipeline on one or more tokio tasks.
///
/// Lifecycle: `IDLE -> run() -> RUNNING -> stop().await -> CLOSED`.
/// Both transitions are idempotent. A closed worker (its `on_close` hook has
/// released whatever it guarded) cannot be started again.
///
/// # 使用例
///
/// ```ignore
/// let worker = Worker::builder(queue.clone())
///     .middleware(Arc::new(ExceptionLogging))
///     .middleware(Arc::new(SupportOfRetries))
///     .concurrency(2)
///     .on_close(|| pool.close())
///     .build();
///
/// worker.run()?;
/// // ...
/// worker.stop().await;
/// ```
pub struct Worker {
    shared: Arc<Shared>,
    concurrency: usize,
    lifecycle: Mutex<Lifecycle>,
    closed_tx: watch::Sender<bool>,
    on_close: Mutex<Option<OnClose>>,
}

impl Worker {
    pub fn builder(queue: Arc<TaskQueue>) -> WorkerBuilder {
        WorkerBuilder::new(queue)
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.shared.queue
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.shared.pipeline
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Closed)
    }

    /// Start the loops and return immediately.
    ///
    /// No-op when already running. Must be called from inside a tokio runtime.
    /// Refused with `WorkerError::Closed` once `stop` has begun.
    pub fn run(&self) -> Result<(), WorkerError> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Running(_) => {
                debug!("worker already running");
                return Ok(());
            }
            Lifecycle::Stopping | Lifecycle::Closed => return Err(WorkerError::Closed),
        }

        let handle = Handle::try_current().map_err(|_| WorkerError::NoRuntime)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..self.concurrency)
            .map(|loop_id| {
                let shared = Arc::clone(&self.shared);
                let rx = shutdown_rx.clone();
                handle.spawn(worker_loop(loop_id, shared, rx))
            })
            .collect();

        *lifecycle = Lifecycle::Running(RunningLoops { shutdown_tx, joins });
        info!(
            loops = self.concurrency,
            stages = ?self.shared.pipeline.stage_names(),
            "worker started"
        );
        Ok(())
    }

    /// Signal the loops to exit and wait until they have.
    ///
    /// In-flight tasks run to completion; pending ones stay in the queue.
    /// The `on_close` hook runs once, after the loops are joined. A call made
    /// while another `stop` is joining waits for it to finish; a call on an
    /// idle or closed worker returns at once.
    pub async fn stop(&self) {
        let running = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopping) {
                Lifecycle::Running(running) => Some(running),
                Lifecycle::Stopping => None,
                other => {
                    *lifecycle = other;
                    debug!("worker not running");
                    return;
                }
            }
        };

        let Some(running) = running else {
            // 別の stop が join 中: 完了まで待つ
            let mut closed_rx = self.closed_tx.subscribe();
            let _ = closed_rx.wait_for(|closed| *closed).await;
            return;
        };

        // ignore send error: loops may already be gone
        let _ = running.shutdown_tx.send(true);

        let pending = self.shared.queue.len();
        if pending > 0 {
            warn!(pending, "stopping worker with tasks still queued");
        }

        for join in running.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker loop ended abnormally");
            }
        }

        if let Some(on_close) = self.on_close.lock().take() {
            on_close();
        }
        *self.lifecycle.lock() = Lifecycle::Closed;
        self.closed_tx.send_replace(true);
        info!("worker stopped");
    }

    /// Process at most one eligible task. Returns `false` when none was due.
    pub async fn run_once(&self) -> bool {
        process_next(&self.shared).await
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Lifecycle::Running(running) = self.lifecycle.get_mut() {
            let _ = running.shutdown_tx.send(true);
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("pipeline", &self.shared.pipeline)
            .field("concurrency", &self.concurrency)
            .field("poll_interval", &self.shared.poll_interval)
            .field("running", &self.is_running())
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub struct WorkerBuilder {
    queue: Arc<TaskQueue>,
    stages: Vec<Arc<dyn Middleware>>,
    config: WorkerConfig,
    on_close: Option<OnClose>,
}

impl WorkerBuilder {
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self {
            queue,
            stages: Vec::new(),
            config: WorkerConfig::default(),
            on_close: None,
        }
    }

    /// Append a stage; the first one added is the outermost.
    pub fn middleware(mut self, stage: Arc<dyn Middleware>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Replace all stages with an existing pipeline.
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.stages = pipeline.into_stages();
        self
    }

    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn concurrency(mut self, loops: usize) -> Self {
        self.config.concurrency = loops;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Called once after the worker has fully stopped.
    pub fn on_close(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Worker {
        Worker {
            shared: Arc::new(Shared {
                queue: self.queue,
                pipeline: Pipeline::new(self.stages),
                poll_interval: self.config.poll_interval().max(Duration::from_millis(1)),
            }),
            concurrency: self.config.concurrency.max(1),
            lifecycle: Mutex::new(Lifecycle::Idle),
            closed_tx: watch::channel(false).0,
            on_close: Mutex::new(self.on_close),
        }
    }
}

async fn worker_loop(loop_id: usize, shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    debug!(loop_id, "worker loop started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        if process_next(&shared).await {
            continue;
        }

        // 空 or まだ実行時刻前: shutdown と競合させつつ少し待つ
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(shared.poll_interval) => {}
        }
    }
    debug!(loop_id, "worker loop exited");
}

async fn process_next(shared: &Shared) -> bool {
    let Some(task) = shared.queue.get() else {
        return false;
    };

    // ロックは get() の中で完結している（ロック跨ぎ await しない）
    let outcome = AssertUnwindSafe(shared.pipeline.execute(&task, &shared.queue))
        .catch_unwind()
        .await;

    match outcome {
        Ok(outcome) => settle(&shared.queue, &task, outcome),
        Err(panic) => {
            let message = panic_message(&*panic);
            error!(task = %task.id(), panic = %message, "middleware panicked");
            task.mark_failed(TaskError::Panicked(message));
        }
    }
    true
}

/// Whatever the pipeline did not consume is handled here.
fn settle(queue: &TaskQueue, task: &Arc<Task>, outcome: Outcome) {
    if let Some(run_at) = outcome.run_at() {
        match queue.reschedule(Arc::clone(task), run_at) {
            Ok(at) => debug!(task = %task.id(), run_after = %at, "re-enqueued by worker"),
            Err(QueueError::Canceled(_)) => debug!(task = %task.id(), "canceled; not re-enqueued"),
            Err(err @ QueueError::AlreadyQueued { .. }) => {
                warn!(task = %task.id(), error = %err, "not re-enqueued")
            }
            Err(err) => error!(task = %task.id(), error = %err, "re-enqueue failed"),
        }
        return;
    }

    match outcome {
        Outcome::Failed(err) => {
            error!(
                task = %task.id(),
                callable = task.target().name(),
                error = %err,
                "unhandled task failure"
            );
            task.mark_failed(err);
        }
        Outcome::Finished(_) => debug!(task = %task.id(), "finished"),
        _ => {}
    }
}
