//! Handler - タスクを実行する関数の定義
//!
//! # 二層構造
//! - `TaskHandler` trait: object-safe（`Arc<dyn TaskHandler>` で登録・共有）
//! - `handler_fn`: async クロージャを `Handler` に変換するヘルパー

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::{HandlerError, Payload, Task, TaskId};

/// Execution context handed to a handler for one attempt.
///
/// Cancellation is cooperative: the worker never interrupts a running
/// handler, so long-running handlers should watch `cancelled()` themselves.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task: Task,
    attempt: u32,
    shutdown: Option<watch::Receiver<bool>>,
}

impl TaskContext {
    pub fn new(task: Task, attempt: u32, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            task,
            attempt,
            shutdown: Some(shutdown),
        }
    }

    /// A context that is never cancelled. Handy for calling handlers directly.
    pub fn detached(task: Task) -> Self {
        Self {
            task,
            attempt: 1,
            shutdown: None,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    pub fn task_name(&self) -> &str {
        &self.task.name
    }

    /// 1-indexed attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the queue is stopping. Never resolves for a detached context.
    pub async fn cancelled(&self) {
        if let Some(rx) = &self.shutdown {
            let mut rx = rx.clone();
            if rx.wait_for(|stopping| *stopping).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

/// A registered task handler.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &TaskContext, payload: &Payload) -> Result<(), HandlerError>;
}

/// Shared, type-erased handler as stored in the registry.
pub type Handler = Arc<dyn TaskHandler>;

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: &TaskContext, payload: &Payload) -> Result<(), HandlerError> {
        (self.f)(ctx.clone(), payload.clone()).await
    }
}

/// Turn an async closure into a `Handler`.
///
/// ```ignore
/// queue.register("send_email", handler_fn(|_ctx, payload| async move {
///     println!("to: {:?}", payload.get("to"));
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(TaskContext, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}
