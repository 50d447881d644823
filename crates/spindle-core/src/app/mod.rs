//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてキューの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **Queue**: handler レジストリ、enqueue、ワーカープールの start / stop
//! - **QueueBuilder**: 構築とワイヤリング（起動時検証）
//! - **Worker**: pop → defer / handle → retry → ack のループ
//! - **Middleware**: Handler -> Handler の変換（onion 合成）
//! - **Broadcaster / History**: 状態遷移の配信と終了タスクの記録

pub mod broadcast;
pub mod builder;
pub mod config;
pub mod handler;
pub mod history;
pub mod middleware;
pub mod queue;
pub mod retry;
pub mod worker;

// 主要な型を再エクスポート
pub use self::broadcast::{Broadcaster, SubscriberId, Subscription};
pub use self::builder::QueueBuilder;
pub use self::config::QueueConfig;
pub use self::handler::{Handler, TaskContext, TaskHandler, handler_fn};
pub use self::history::History;
pub use self::middleware::{Middleware, TracingMiddleware, compose};
pub use self::queue::Queue;
pub use self::retry::BackoffPolicy;
pub use self::worker::ProcessOutcome;
