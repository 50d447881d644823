//! QueueBuilder - Queue の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - `expect_tasks()` で期待されるタスク名を登録
//! - `build()` 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - 不足があれば `QueueError::MissingHandlers` を返す
//! - config の検証もここで行う（workers = 0 など）

use std::sync::Arc;

use super::config::QueueConfig;
use super::handler::Handler;
use super::middleware::Middleware;
use super::queue::Queue;
use crate::domain::QueueError;
use crate::ports::{Clock, IdGenerator, SystemClock, TaskStore, UlidGenerator};

/// Builds a [`Queue`].
///
/// # 使用例
/// ```ignore
/// let queue = QueueBuilder::new(Arc::new(MemoryStore::new()))
///     .config(QueueConfig::new(4))
///     .middleware(TracingMiddleware)
///     .register("send_email", send_email)
///     .expect_tasks(&["send_email"])
///     .build()?;
/// ```
///
/// Middlewares given here wrap every handler given here, whatever the call
/// order.
pub struct QueueBuilder {
    store: Arc<dyn TaskStore>,
    config: QueueConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Box<dyn IdGenerator>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    handlers: Vec<(String, Handler)>,
    expected_tasks: Option<Vec<String>>,
}

impl QueueBuilder {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            config: QueueConfig::default(),
            clock: None,
            ids: None,
            middlewares: Vec::new(),
            handlers: Vec::new(),
            expected_tasks: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock used for `created_at` and the worker's due check.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Box<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn register(mut self, name: impl Into<String>, handler: Handler) -> Self {
        self.handlers.push((name.into(), handler));
        self
    }

    pub fn expect_tasks(mut self, names: &[&str]) -> Self {
        self.expected_tasks = Some(names.iter().map(|name| name.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Queue, QueueError> {
        self.config.validate()?;

        if let Some(expected_tasks) = &self.expected_tasks {
            let missing: Vec<String> = expected_tasks
                .iter()
                .filter(|name| !self.handlers.iter().any(|(registered, _)| registered == *name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(QueueError::MissingHandlers(missing));
            }
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Box::new(UlidGenerator::new(Arc::clone(&clock))));

        let queue = Queue::from_parts(self.store, self.config, clock, ids);
        for middleware in self.middlewares {
            queue.push_middleware(middleware);
        }
        for (name, handler) in self.handlers {
            queue.register(name, handler);
        }
        Ok(queue)
    }
}
