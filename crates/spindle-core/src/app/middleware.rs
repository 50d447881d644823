//! Middleware - Handler -> Handler の変換
//!
//! 登録順の逆から適用するので、最初に `use_middleware` したものが一番外側になります。
//! (M1, M2) を登録した場合の実行順: M1 前処理 → M2 前処理 → handler → M2 後処理 → M1 後処理

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use super::handler::{Handler, TaskContext, TaskHandler};
use crate::domain::{HandlerError, Payload};

pub trait Middleware: Send + Sync {
    fn wrap(&self, next: Handler) -> Handler;
}

impl<F> Middleware for F
where
    F: Fn(Handler) -> Handler + Send + Sync,
{
    fn wrap(&self, next: Handler) -> Handler {
        self(next)
    }
}

/// Apply `middlewares` around `handler`, first one outermost.
pub fn compose(middlewares: &[Arc<dyn Middleware>], handler: Handler) -> Handler {
    middlewares
        .iter()
        .rev()
        .fold(handler, |next, mw| mw.wrap(next))
}

/// Structured start/finish logging around every attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn wrap(&self, next: Handler) -> Handler {
        Arc::new(Traced { next })
    }
}

struct Traced {
    next: Handler,
}

#[async_trait]
impl TaskHandler for Traced {
    async fn handle(&self, ctx: &TaskContext, payload: &Payload) -> Result<(), HandlerError> {
        let started = Instant::now();
        info!(
            task_id = %ctx.task_id(),
            task_name = ctx.task_name(),
            attempt = ctx.attempt(),
            payload_keys = payload.len(),
            "task started"
        );

        let result = self.next.handle(ctx, payload).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(
                task_id = %ctx.task_id(),
                task_name = ctx.task_name(),
                elapsed_ms,
                "task finished"
            ),
            Err(err) => warn!(
                task_id = %ctx.task_id(),
                task_name = ctx.task_name(),
                elapsed_ms,
                error = %err,
                "task failed"
            ),
        }
        result
    }
}
