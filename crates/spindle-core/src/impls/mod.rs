//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **MemoryStore**: リファレンスのインメモリ TaskStore
//! - **ListStore**: リスト型リモートストア上の TaskStore（`ListBackend` 経由）
//! - **ReceiptStore**: receipt handle 型キュー上の TaskStore（`MessageQueueClient` 経由）
//! - **InMemoryListBackend / InMemoryMessageQueue**: 開発・テスト用のバックエンド

pub mod inmem_list;
pub mod inmem_messages;
pub mod list_store;
pub mod memory_store;
pub mod receipt_store;

pub use self::inmem_list::InMemoryListBackend;
pub use self::inmem_messages::InMemoryMessageQueue;
pub use self::list_store::ListStore;
pub use self::memory_store::{AckMatching, MemoryStore};
pub use self::receipt_store::ReceiptStore;
