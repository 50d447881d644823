//! TaskStore port - 全バックエンドが満たす Push/Pop/Ack 契約
//!
//! # 実装
//! - `MemoryStore`: リファレンス実装（scheduled_at の判定と pending 管理）
//! - `ListStore<B>`: リスト型リモートストア（pending はシリアライズ済みバイトで管理）
//! - `ReceiptStore<C>`: receipt handle 型クラウドキュー

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{StoreError, Task};

/// Storage contract consumed by the queue and its workers.
///
/// Every implementation must guarantee that two concurrent `pop` calls never
/// hand out the same delivery. In-process stores do it with their own lock;
/// remote backends rely on the service's atomic primitives.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Make `task` visible to `pop`.
    async fn push(&self, task: Task) -> Result<(), StoreError>;

    /// Remove and return one eligible task, moving it to the pending set.
    ///
    /// Returns an idle error (`StoreError::is_idle`) when nothing can be
    /// handed out right now.
    async fn pop(&self) -> Result<Task, StoreError>;

    /// Confirm a delivery returned by `pop`, removing it from the pending set.
    async fn ack(&self, task: &Task) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: TaskStore + ?Sized> TaskStore for Arc<S> {
    async fn push(&self, task: Task) -> Result<(), StoreError> {
        (**self).push(task).await
    }

    async fn pop(&self) -> Result<Task, StoreError> {
        (**self).pop().await
    }

    async fn ack(&self, task: &Task) -> Result<(), StoreError> {
        (**self).ack(task).await
    }
}
