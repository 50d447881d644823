//! Worker - タスク実行ループ
//!
//! # フロー
//! 1. shutdown が来ていたら抜ける
//! 2. `TaskStore::pop()`（空なら poll_interval だけ待つ）
//! 3. まだ due でなければ push し直して古い配送を ack、少し待つ
//! 4. handler を最大 `max_retries + 1` 回実行（失敗ごとに backoff）
//! 5. 成功なら ack、使い切ったら failed（ack しない = pending に残る）
//!
//! 実行中の handler は中断しない。shutdown は試行の間とループの先頭でだけ効く。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use super::handler::TaskContext;
use super::queue::QueueInner;
use crate::domain::{HandlerError, Task, TaskStatus};

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed { attempts: u32 },
    /// Every attempt failed; the delivery was not acknowledged.
    Failed { attempts: u32, last_error: HandlerError },
    /// No handler under the task's name; dropped without ack.
    MissingHandler,
    /// Shutdown arrived between attempts.
    ///
    /// Nothing is broadcast for this outcome: the last snapshot subscribers
    /// saw is `running`, and the delivery stays un-acknowledged in the store.
    Abandoned { attempts: u32 },
}

pub(crate) fn spawn(worker_id: usize, inner: Arc<QueueInner>) -> JoinHandle<()> {
    let shutdown = inner.shutdown_tx.subscribe();
    tokio::spawn(run(worker_id, inner, shutdown))
}

#[instrument(name = "worker", skip(inner, shutdown))]
async fn run(worker_id: usize, inner: Arc<QueueInner>, mut shutdown: watch::Receiver<bool>) {
    debug!("worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        // pop は long-poll で待つ backend もあるので shutdown と競合させる
        let popped = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            popped = inner.store.pop() => popped,
        };

        let task = match popped {
            Ok(task) => task,
            Err(err) if err.is_idle() => {
                trace!("nothing to do");
                if sleep_or_shutdown(&mut shutdown, inner.config.poll_interval).await {
                    break;
                }
                continue;
            }
            Err(err) => {
                error!(error = %err, "pop failed");
                if sleep_or_shutdown(&mut shutdown, inner.config.poll_interval).await {
                    break;
                }
                continue;
            }
        };

        let now = inner.clock.now();
        if !task.is_due(now) {
            let wait = task
                .time_until_due(now)
                .min(inner.config.max_defer_sleep);
            defer(&inner, task).await;
            if sleep_or_shutdown(&mut shutdown, wait).await {
                break;
            }
            continue;
        }

        process(&inner, task, &mut shutdown).await;
    }
    debug!("worker stopped");
}

/// Put a not-yet-due delivery back and release the stale one.
async fn defer(inner: &QueueInner, task: Task) {
    debug!(task_id = %task.id, task_name = %task.name, "task not due, deferring");

    let mut requeued = task.clone();
    requeued.receipt_handle = None;
    if let Err(err) = inner.store.push(requeued).await {
        // leave the delivery pending rather than lose the task
        error!(task_id = %task.id, error = %err, "requeue of deferred task failed");
        return;
    }
    if let Err(err) = inner.store.ack(&task).await {
        warn!(task_id = %task.id, error = %err, "ack of deferred delivery failed");
    }
}

/// Run one due task through its handler with retries.
pub(crate) async fn process(
    inner: &QueueInner,
    mut task: Task,
    shutdown: &mut watch::Receiver<bool>,
) -> ProcessOutcome {
    let Some(handler) = inner.handler(&task.name) else {
        warn!(task_id = %task.id, task_name = %task.name, "no handler registered, dropping task");
        return ProcessOutcome::MissingHandler;
    };

    task.status = TaskStatus::Running;
    inner.events.publish(&task);

    let max_attempts = inner.config.max_retries.saturating_add(1);
    let mut attempt = 0;
    let last_error = loop {
        attempt += 1;
        task.retries = attempt - 1;

        let ctx = TaskContext::new(task.clone(), attempt, shutdown.clone());
        match handler.handle(&ctx, &task.payload).await {
            Ok(()) => return complete(inner, task, attempt).await,
            Err(err) => {
                warn!(
                    task_id = %task.id,
                    task_name = %task.name,
                    attempt,
                    max_attempts,
                    error = %err,
                    "handler attempt failed"
                );
                if attempt >= max_attempts {
                    break err;
                }
            }
        }

        let delay = inner.config.backoff.next_delay(attempt);
        if sleep_or_shutdown(shutdown, delay).await {
            info!(task_id = %task.id, attempt, "shutdown during backoff, abandoning task");
            return ProcessOutcome::Abandoned { attempts: attempt };
        }
    };

    error!(
        task_id = %task.id,
        task_name = %task.name,
        attempts = attempt,
        error = %last_error,
        "task failed after all attempts"
    );
    task.status = TaskStatus::Failed;
    inner.events.publish(&task);
    inner.history.record(task);
    ProcessOutcome::Failed {
        attempts: attempt,
        last_error,
    }
}

async fn complete(inner: &QueueInner, mut task: Task, attempts: u32) -> ProcessOutcome {
    if let Err(err) = inner.store.ack(&task).await {
        error!(task_id = %task.id, error = %err, "ack failed");
    }
    task.status = TaskStatus::Completed;
    debug!(task_id = %task.id, task_name = %task.name, attempts, "task completed");
    inner.events.publish(&task);
    inner.history.record(task);
    ProcessOutcome::Completed { attempts }
}

/// Sleep for `duration`, waking early on shutdown. Returns `true` on shutdown.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
