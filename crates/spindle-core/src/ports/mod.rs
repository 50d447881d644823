//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（リスト型ストア、クラウドキューなど）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod id_generator;
pub mod list_backend;
pub mod message_queue;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::list_backend::ListBackend;
pub use self::message_queue::{MessageQueueClient, ReceivedMessage};
pub use self::task_store::TaskStore;
