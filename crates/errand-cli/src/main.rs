use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use errand_core::{
    Backoff, ConcreteRetries, ErrandConfig, ErrorKind, ExceptionLogging, PerformanceLogging,
    Priority, RetryPolicy, SupportOfRetries, Task, TaskArgs, TaskError, TaskQueue, TaskTarget,
    UniqueTaskQueue, Worker, from_blocking_fn, from_fn,
};

#[derive(Debug, Parser)]
#[command(name = "errand")]
#[command(about = "Run an in-memory errand queue with a few demo tasks")]
#[command(version)]
struct Cli {
    /// JSON config file (worker + retries)
    #[arg(short, long, env = "ERRAND_CONFIG")]
    config: Option<PathBuf>,

    /// How long to let the worker run, in seconds
    #[arg(long, default_value_t = 10)]
    run_for: u64,

    /// Number of worker loops (overrides the config file)
    #[arg(short, long)]
    workers: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PingPayload {
    host: String,
}

/// Fails with a connection error until its countdown runs out.
struct FlakyPing {
    remaining_failures: AtomicU32,
}

impl FlakyPing {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl TaskTarget for FlakyPing {
    async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError> {
        let raw = args
            .kwarg("payload")
            .cloned()
            .ok_or_else(|| TaskError::InvalidInput("missing payload".into()))?;
        let p: PingPayload = serde_json::from_value(raw)?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(TaskError::connection(format!(
                "{} unreachable (left={left})",
                p.host
            )));
        }

        info!(host = %p.host, "pong");
        Ok(json!({ "host": p.host, "alive": true }))
    }

    fn name(&self) -> &str {
        "ping"
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // (A) 設定: ファイル → CLI フラグで上書き
    let mut config = match &cli.config {
        Some(path) => ErrandConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ErrandConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.worker.concurrency = workers;
    }

    // (B) Queue と Worker を用意
    let queue = Arc::new(TaskQueue::new());
    let worker = Worker::builder(queue.clone())
        .middleware(Arc::new(ExceptionLogging))
        .middleware(Arc::new(
            PerformanceLogging::new().warn_slower_than(Duration::from_secs(1)),
        ))
        .middleware(Arc::new(SupportOfRetries))
        .middleware(Arc::new(ConcreteRetries::new(config.retry_policy())))
        .config(config.worker.clone())
        .on_close(|| info!("released worker resources"))
        .build();

    // (C) タスク投入
    let heartbeat = queue.submit(
        Task::builder(from_fn("heartbeat", |_| Ok(json!("beat"))))
            .priority(Priority::LOW)
            .interval(Duration::from_secs(2), true),
    )?;

    let every_other_second = queue.submit(
        Task::builder(from_fn("tick", |_| Ok(Value::Null)))
            .priority(Priority::MEDIUM)
            .cron("*/2 * * * * *"),
    )?;

    let ping = queue.submit(
        Task::builder(Arc::new(FlakyPing::new(2)))
            .args(TaskArgs::new().with_kwarg("payload", json!({ "host": "router.lan" })))
            .priority(Priority::HIGH)
            .retry_policy(
                RetryPolicy::new(3)
                    .retry_on([ErrorKind::Connection])
                    .with_backoff(Backoff::Fixed(Duration::from_secs(1))),
            ),
    )?;

    let greeting = queue.submit(
        Task::builder(from_fn("greet", |args| {
            let name = args.get(0).and_then(Value::as_str).unwrap_or("world");
            Ok(json!(format!("Hello, {name}!")))
        }))
        .args(TaskArgs::new().arg("errand"))
        .delayed(Duration::from_secs(1)),
    )?;

    // 同じ key のスナップショットは同時に 1 件まで
    let snapshots = UniqueTaskQueue::new(queue.clone());
    let snapshot = || {
        Task::builder(from_blocking_fn("snapshot", |_| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(json!({ "bytes": 4096 }))
        }))
    };
    let first_snapshot = snapshots.push("camera", snapshot())?;
    let skipped = snapshots.push("camera", snapshot())?;
    info!(skipped = skipped.is_none(), "second snapshot request");

    // (D) worker 起動 → 指定秒数だけ回す（Ctrl-C で早期終了）
    worker.run()?;
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(cli.run_for)) => {}
        res = tokio::signal::ctrl_c() => res.context("waiting for ctrl-c")?,
    }

    println!("{}", serde_json::to_string_pretty(&queue.stats())?);

    heartbeat.cancel();
    every_other_second.cancel();
    worker.stop().await;

    // (E) 最終状態
    let mut report = vec![
        ("heartbeat", heartbeat),
        ("tick", every_other_second),
        ("ping", ping),
        ("greet", greeting),
    ];
    if let Some(task) = first_snapshot {
        report.push(("snapshot", task));
    }
    for (label, task) in report {
        println!(
            "{label:<10} status={} attempts={} result={:?} last_error={:?}",
            task.status(),
            task.attempts(),
            task.result(),
            task.last_error().map(|e| e.to_string()),
        );
    }

    Ok(())
}
