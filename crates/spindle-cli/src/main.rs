use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spindle_core::impls::MemoryStore;
use spindle_core::{
    HandlerError, Payload, Queue, QueueConfig, QueueError, TaskContext, TaskHandler, TaskOptions,
    TracingMiddleware, handler_fn,
};

#[derive(Debug, Deserialize)]
struct EmailPayload {
    to: String,
    #[serde(default)]
    subject: String,
}

/// 最初の `n` 回は失敗する handler（リトライの様子を見る用）
struct HelloHandler {
    remaining_failures: AtomicU32,
}

impl HelloHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl TaskHandler for HelloHandler {
    async fn handle(&self, ctx: &TaskContext, payload: &Payload) -> Result<(), HandlerError> {
        let name = payload
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerError::new("missing 'name'"))?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(HandlerError::new(format!(
                "intentional failure (attempt={}, left={left})",
                ctx.attempt()
            )));
        }

        println!("Hello, {name}!");
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<(), QueueError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // (A) 設定は環境変数で上書き
    let config = QueueConfig::default()
        .with_workers(env_or("SPINDLE_WORKERS", 4))
        .with_max_retries(env_or("SPINDLE_MAX_RETRIES", 3));
    let run_for = Duration::from_secs(env_or("SPINDLE_RUN_SECS", 5));

    // (B) Queue と handler を用意
    let queue = Queue::builder(Arc::new(MemoryStore::new()))
        .config(config)
        .middleware(TracingMiddleware)
        .register("hello", Arc::new(HelloHandler::new(2)))
        .register(
            "send_email",
            handler_fn(|_ctx, payload| async move {
                let email: EmailPayload = serde_json::from_value(payload.into())?;
                println!("sending '{}' to {}", email.subject, email.to);
                Ok::<(), HandlerError>(())
            }),
        )
        .expect_tasks(&["hello", "send_email"])
        .build()?;

    // (C) 状態遷移を標準出力へ
    let mut events = queue.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(task) = events.recv().await {
            println!(
                "[{}] {} {} retries={}",
                task.status, task.name, task.id, task.retries
            );
        }
    });

    queue.start();

    // (D) タスク投入（即時 + 予約）
    queue
        .enqueue("hello", payload(serde_json::json!({ "name": "spindle" })))
        .await?;
    queue
        .enqueue(
            "send_email",
            payload(serde_json::json!({ "to": "ops@example.com", "subject": "nightly report" })),
        )
        .await?;
    let at = queue.now() + chrono::Duration::seconds(2);
    queue
        .enqueue_at(
            "send_email",
            payload(serde_json::json!({ "to": "later@example.com", "subject": "scheduled" })),
            TaskOptions::new().at(at),
        )
        .await?;
    info!(scheduled_at = %at, "scheduled one email");

    // (E) Ctrl-C か実行時間の経過で graceful shutdown
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        _ = tokio::time::sleep(run_for) => info!(secs = run_for.as_secs(), "run time elapsed"),
    }
    queue.stop().await;

    let history = queue.history();
    let failed = history
        .iter()
        .filter(|t| t.status == spindle_core::TaskStatus::Failed)
        .count();
    println!("finished: {} terminal tasks ({failed} failed)", history.len());

    drop(queue);
    printer.abort();
    Ok(())
}
