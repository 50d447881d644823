//! Queue - オーケストレータ
//!
//! - handler レジストリ（name → middleware 適用済み handler）
//! - middleware リスト（append-only、次の `register` から有効）
//! - ワーカープールのライフサイクル（`start` / `stop`）
//! - enqueue 時の検証（handler 未登録なら何も保存しない）
//!
//! # ロック
//! レジストリは `RwLock`: worker の lookup は並行に読み、`register` /
//! `use_middleware` だけが排他で書く。どのロックも `.await` を跨がない。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::broadcast::{Broadcaster, SubscriberId, Subscription};
use super::builder::QueueBuilder;
use super::config::QueueConfig;
use super::handler::Handler;
use super::history::History;
use super::middleware::{Middleware, compose};
use super::worker;
use crate::domain::{Payload, QueueError, Task, TaskId, TaskOptions};
use crate::ports::{Clock, IdGenerator, TaskStore};

#[derive(Default)]
pub(crate) struct Registry {
    handlers: HashMap<String, Handler>,
    middlewares: Vec<Arc<dyn Middleware>>,
}

/// State shared between the `Queue` handle and its workers.
pub(crate) struct QueueInner {
    pub(crate) config: QueueConfig,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) registry: RwLock<Registry>,
    pub(crate) events: Broadcaster,
    pub(crate) history: History,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Box<dyn IdGenerator>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
}

impl QueueInner {
    /// Middleware-wrapped handler registered under `name`.
    pub(crate) fn handler(&self, name: &str) -> Option<Handler> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .get(name)
            .cloned()
    }
}

/// Embeddable background task queue.
///
/// # 使用例
/// ```ignore
/// let queue = Queue::new(Arc::new(MemoryStore::new()), QueueConfig::new(2))?;
/// queue.use_middleware(TracingMiddleware);
/// queue.register("send_email", handler_fn(|_ctx, payload| async move {
///     println!("to: {:?}", payload.get("to"));
///     Ok(())
/// }));
/// queue.start();
/// queue.enqueue("send_email", payload).await?;
/// queue.stop().await;
/// ```
pub struct Queue {
    pub(super) inner: Arc<QueueInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Queue {
    pub fn new(store: Arc<dyn TaskStore>, config: QueueConfig) -> Result<Self, QueueError> {
        QueueBuilder::new(store).config(config).build()
    }

    pub fn builder(store: Arc<dyn TaskStore>) -> QueueBuilder {
        QueueBuilder::new(store)
    }

    pub(crate) fn from_parts(
        store: Arc<dyn TaskStore>,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
        ids: Box<dyn IdGenerator>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let inner = QueueInner {
            events: Broadcaster::new(config.subscriber_capacity),
            history: History::new(config.history_limit),
            config,
            store,
            registry: RwLock::new(Registry::default()),
            clock,
            ids,
            shutdown_tx,
        };
        Self {
            inner: Arc::new(inner),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Append a middleware. It wraps handlers registered after this call only.
    pub fn use_middleware<M: Middleware + 'static>(&self, middleware: M) {
        self.push_middleware(Arc::new(middleware));
    }

    pub(crate) fn push_middleware(&self, middleware: Arc<dyn Middleware>) {
        let mut registry = self.write_registry();
        registry.middlewares.push(middleware);
        debug!(middlewares = registry.middlewares.len(), "middleware added");
    }

    /// Register `handler` under `name`, wrapped in the current middleware
    /// stack. Replaces any handler already registered under that name.
    pub fn register(&self, name: impl Into<String>, handler: Handler) {
        let name = name.into();
        let mut registry = self.write_registry();
        let wrapped = compose(&registry.middlewares, handler);
        if registry.handlers.insert(name.clone(), wrapped).is_some() {
            debug!(task_name = %name, "handler replaced");
        } else {
            debug!(task_name = %name, "handler registered");
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.read_registry().handlers.contains_key(name)
    }

    /// Submit a task for immediate execution.
    pub async fn enqueue(&self, name: &str, payload: Payload) -> Result<TaskId, QueueError> {
        self.ensure_registered(name)?;
        let task = Task::new(
            self.inner.ids.generate_task_id(),
            name,
            payload,
            self.inner.clock.now(),
        );
        self.submit(task).await
    }

    /// Submit a task carrying priority / `scheduled_at` metadata.
    pub async fn enqueue_at(
        &self,
        name: &str,
        payload: Payload,
        options: TaskOptions,
    ) -> Result<TaskId, QueueError> {
        self.ensure_registered(name)?;
        let task = Task::scheduled(
            self.inner.ids.generate_task_id(),
            name,
            payload,
            options,
            self.inner.clock.now(),
        );
        self.submit(task).await
    }

    /// Spawn `config.workers` workers.
    ///
    /// Calling this twice without `stop` spawns a second pool.
    pub fn start(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if !workers.is_empty() {
            warn!(
                running = workers.len(),
                "start called while workers are running, spawning another pool"
            );
        }
        let first_id = workers.len();
        for worker_id in first_id..first_id + self.inner.config.workers {
            workers.push(worker::spawn(worker_id, Arc::clone(&self.inner)));
        }
        info!(workers = self.inner.config.workers, "queue started");
    }

    /// Signal shutdown and wait for every spawned worker to exit.
    ///
    /// A worker inside a handler finishes that attempt first. Safe to call
    /// before `start`.
    pub async fn stop(&self) {
        self.inner.shutdown_tx.send_replace(true);

        let joins = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if joins.is_empty() {
            debug!("stop called with no workers running");
            return;
        }

        info!(workers = joins.len(), "stopping workers");
        for join in joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker exited abnormally");
            }
        }
        info!("queue stopped");
    }

    pub fn is_running(&self) -> bool {
        !*self.inner.shutdown_tx.borrow()
            && !self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
    }

    /// Receive a snapshot of every task state transition.
    pub fn subscribe(&self) -> Subscription {
        self.inner.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.events.len()
    }

    /// Terminal tasks (completed or failed), oldest first.
    pub fn history(&self) -> Vec<Task> {
        self.inner.history.snapshot()
    }

    pub fn workers(&self) -> usize {
        self.inner.config.workers
    }

    pub fn max_retries(&self) -> u32 {
        self.inner.config.max_retries
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Current time on the queue's clock. Feed it to `TaskOptions::after_from`.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    fn ensure_registered(&self, name: &str) -> Result<(), QueueError> {
        if self.is_registered(name) {
            Ok(())
        } else {
            warn!(task_name = name, "enqueue rejected, handler not registered");
            Err(QueueError::HandlerNotRegistered(name.to_string()))
        }
    }

    async fn submit(&self, task: Task) -> Result<TaskId, QueueError> {
        let id = task.id;
        if let Err(err) = self.inner.store.push(task.clone()).await {
            error!(task_id = %id, task_name = %task.name, error = %err, "push failed");
            return Err(err.into());
        }
        debug!(task_id = %id, task_name = %task.name, status = %task.status, "task enqueued");
        self.inner.events.publish(&task);
        Ok(id)
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        // detached workers still hold QueueInner; make them exit
        self.inner.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{BackoffPolicy, TaskContext, TaskHandler, handler_fn};
    use crate::domain::{HandlerError, StoreError, TaskStatus};
    use crate::impls::{InMemoryListBackend, ListStore, MemoryStore};
    use crate::test_support::{CountingStore, payload, wait_for_status};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fast_config(workers: usize) -> QueueConfig {
        QueueConfig::new(workers)
            .with_poll_interval(Duration::from_millis(5))
            .with_max_defer_sleep(Duration::from_millis(20))
            .with_backoff(BackoffPolicy::fixed(Duration::from_millis(1)))
    }

    fn ok_handler() -> Handler {
        handler_fn(|_, _| async { Ok(()) })
    }

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TaskHandler for Counting {
        async fn handle(&self, _ctx: &TaskContext, _payload: &Payload) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl TaskStore for BrokenStore {
        async fn push(&self, _task: Task) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn pop(&self) -> Result<Task, StoreError> {
            Err(StoreError::NoTasksAvailable)
        }
        async fn ack(&self, task: &Task) -> Result<(), StoreError> {
            Err(StoreError::NotFoundInPending(task.id))
        }
    }

    #[tokio::test]
    async fn enqueue_without_handler_stores_nothing() {
        let store = Arc::new(CountingStore::new());
        let queue = Queue::new(store.clone(), fast_config(1)).unwrap();
        let mut events = queue.subscribe();

        let err = queue.enqueue("missing", Payload::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::HandlerNotRegistered(name) if name == "missing"));

        let err = queue
            .enqueue_at("missing", Payload::new(), TaskOptions::new().priority(5))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "handler for task 'missing' not registered");

        assert_eq!(store.pushes(), 0);
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn enqueue_pushes_and_broadcasts_queued() {
        let store = Arc::new(CountingStore::new());
        let queue = Queue::new(store.clone(), fast_config(1)).unwrap();
        queue.register("send_email", ok_handler());
        let mut events = queue.subscribe();

        let id = queue
            .enqueue("send_email", payload(json!({"to": "a@example.com"})))
            .await
            .unwrap();

        assert_eq!(store.pushes(), 1);
        let event = events.try_recv().unwrap();
        assert_eq!(event.id, id);
        assert_eq!(event.status, TaskStatus::Queued);
        assert_eq!(event.retries, 0);
        assert_eq!(event.payload.get("to"), Some(&json!("a@example.com")));
    }

    #[tokio::test]
    async fn enqueue_at_carries_scheduling_metadata() {
        let store = Arc::new(CountingStore::new());
        let queue = Queue::new(store.clone(), fast_config(1)).unwrap();
        queue.register("report", ok_handler());
        let mut events = queue.subscribe();

        let options = TaskOptions::new()
            .priority(7)
            .after(Duration::from_secs(60));
        queue
            .enqueue_at("report", Payload::new(), options.clone())
            .await
            .unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(event.status, TaskStatus::Scheduled);
        assert_eq!(event.priority, 7);
        assert_eq!(event.scheduled_at, options.scheduled_at);
    }

    #[tokio::test]
    async fn failed_push_is_surfaced_and_not_broadcast() {
        let queue = Queue::new(Arc::new(BrokenStore), fast_config(1)).unwrap();
        queue.register("echo", ok_handler());
        let mut events = queue.subscribe();

        let err = queue.enqueue("echo", Payload::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::Store(StoreError::Unavailable(_))));
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = Queue::new(Arc::new(MemoryStore::new()), QueueConfig::new(0)).err();
        assert!(matches!(err, Some(QueueError::InvalidConfig(_))));
    }

    #[test]
    fn accessors_reflect_config() {
        let queue = Queue::new(
            Arc::new(MemoryStore::new()),
            QueueConfig::new(3).with_max_retries(5),
        )
        .unwrap();
        assert_eq!(queue.workers(), 3);
        assert_eq!(queue.max_retries(), 5);
        assert!(!queue.is_registered("echo"));
        queue.register("echo", ok_handler());
        assert!(queue.is_registered("echo"));
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn stop_without_start_returns() {
        let queue = Queue::new(Arc::new(MemoryStore::new()), fast_config(2)).unwrap();
        tokio::time::timeout(Duration::from_millis(200), queue.stop())
            .await
            .unwrap();
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn reregistering_replaces_handler() {
        let store = Arc::new(MemoryStore::new());
        let queue = Queue::new(store.clone(), fast_config(1)).unwrap();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        queue.register("echo", Arc::new(Counting { calls: first.clone() }));
        queue.register("echo", Arc::new(Counting { calls: second.clone() }));

        let mut events = queue.subscribe();
        queue.start();
        queue.enqueue("echo", Payload::new()).await.unwrap();
        wait_for_status(&mut events, TaskStatus::Completed).await;
        queue.stop().await;

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn middleware_applies_only_to_later_registrations() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let queue = Queue::new(Arc::new(MemoryStore::new()), fast_config(1)).unwrap();

        queue.register("early", ok_handler());
        let mw_log = Arc::clone(&log);
        queue.use_middleware(move |next: Handler| -> Handler {
            let log = Arc::clone(&mw_log);
            handler_fn(move |ctx, payload| {
                let log = Arc::clone(&log);
                let next = Arc::clone(&next);
                async move {
                    log.lock().unwrap().push(ctx.task_name().to_string());
                    next.handle(&ctx, &payload).await
                }
            })
        });
        queue.register("late", ok_handler());

        let mut events = queue.subscribe();
        queue.start();
        queue.enqueue("early", Payload::new()).await.unwrap();
        wait_for_status(&mut events, TaskStatus::Completed).await;
        queue.enqueue("late", Payload::new()).await.unwrap();
        wait_for_status(&mut events, TaskStatus::Completed).await;
        queue.stop().await;

        assert_eq!(*log.lock().unwrap(), vec!["late".to_string()]);
    }

    #[tokio::test]
    async fn middleware_order_through_the_queue() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let queue = Queue::new(Arc::new(MemoryStore::new()), fast_config(1)).unwrap();

        for label in ["m1", "m2"] {
            let mw_log = Arc::clone(&log);
            queue.use_middleware(move |next: Handler| -> Handler {
                let log = Arc::clone(&mw_log);
                handler_fn(move |ctx, payload| {
                    let log = Arc::clone(&log);
                    let next = Arc::clone(&next);
                    async move {
                        log.lock().unwrap().push(format!("{label}:before"));
                        let result = next.handle(&ctx, &payload).await;
                        log.lock().unwrap().push(format!("{label}:after"));
                        result
                    }
                })
            });
        }
        let handler_log = Arc::clone(&log);
        queue.register(
            "echo",
            handler_fn(move |_, _| {
                let log = Arc::clone(&handler_log);
                async move {
                    log.lock().unwrap().push("handler".to_string());
                    Ok(())
                }
            }),
        );

        let mut events = queue.subscribe();
        queue.start();
        queue.enqueue("echo", Payload::new()).await.unwrap();
        wait_for_status(&mut events, TaskStatus::Completed).await;
        queue.stop().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["m1:before", "m2:before", "handler", "m2:after", "m1:after"]
        );
    }

    #[tokio::test]
    async fn workers_drain_the_queue() {
        let store = Arc::new(MemoryStore::new());
        let queue = Queue::new(store.clone(), fast_config(2)).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        queue.register("echo", Arc::new(Counting { calls: calls.clone() }));
        let mut events = queue.subscribe();

        queue.start();
        assert!(queue.is_running());
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(queue.enqueue("echo", payload(json!({"n": i}))).await.unwrap());
        }

        let mut completed = Vec::new();
        while completed.len() < 5 {
            let task = wait_for_status(&mut events, TaskStatus::Completed).await;
            completed.push(task.id);
        }
        queue.stop().await;
        assert!(!queue.is_running());

        completed.sort();
        ids.sort();
        assert_eq!(completed, ids);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(store.len_queue().await, 0);
        assert_eq!(store.len_pending().await, 0);
        assert_eq!(queue.history().len(), 5);
    }

    #[tokio::test]
    async fn list_store_defers_until_due() {
        let store = Arc::new(ListStore::new(InMemoryListBackend::new(), "spindle-test"));
        let queue = Queue::new(store.clone(), fast_config(1)).unwrap();
        let ran_at = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&ran_at);
        queue.register(
            "later",
            handler_fn(move |_, _| {
                let slot = Arc::clone(&slot);
                async move {
                    *slot.lock().unwrap() = Some(chrono::Utc::now());
                    Ok(())
                }
            }),
        );

        let mut events = queue.subscribe();
        queue.start();
        let options = TaskOptions::new().after(Duration::from_millis(150));
        let due = options.scheduled_at.unwrap();
        queue.enqueue_at("later", Payload::new(), options).await.unwrap();

        wait_for_status(&mut events, TaskStatus::Completed).await;
        queue.stop().await;

        let ran = ran_at.lock().unwrap().unwrap();
        assert!(ran >= due);
        assert_eq!(store.len_queue().await.unwrap(), 0);
        assert_eq!(store.len_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_block_workers() {
        let queue = Queue::new(Arc::new(MemoryStore::new()), fast_config(1)).unwrap();
        queue.register("echo", ok_handler());
        let dropped = queue.subscribe();
        let mut live = queue.subscribe();
        assert_eq!(queue.subscriber_count(), 2);
        drop(dropped);

        queue.start();
        queue.enqueue("echo", Payload::new()).await.unwrap();
        wait_for_status(&mut live, TaskStatus::Completed).await;
        queue.stop().await;

        assert_eq!(queue.subscriber_count(), 1);
        assert!(queue.unsubscribe(live.id()));
        assert_eq!(queue.subscriber_count(), 0);
    }
}
