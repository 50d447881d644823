//! spindle-core
//!
//! Core building blocks for an embeddable background task queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, IdGenerator, ListBackend, MessageQueueClient）
//! - **impls**: 実装（MemoryStore, ListStore, ReceiptStore と開発用 backend）
//! - **app**: アプリケーションロジック（queue, builder, worker, middleware, broadcast, config）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{
    Handler, Middleware, ProcessOutcome, Queue, QueueBuilder, QueueConfig, Subscription,
    TaskContext, TaskHandler, TracingMiddleware, handler_fn,
};
pub use domain::{HandlerError, Payload, QueueError, StoreError, Task, TaskId, TaskOptions, TaskStatus};
pub use ports::TaskStore;
