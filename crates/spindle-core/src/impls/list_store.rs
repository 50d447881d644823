//! ListStore - リスト型リモートストア上の TaskStore
//!
//! - `<namespace>:queue`: 未配送タスク（JSON バイト列）
//! - `<namespace>:pending`: 配送済み・未 ack のタスク
//!
//! Ack は「Pop 時と同じバイト列」を pending から LREM する方式なので、
//! ワーカーが書き換える status / retries / receipt_handle はシリアライズしません。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{Payload, StoreError, Task, TaskId, TaskStatus};
use crate::ports::{ListBackend, TaskStore};

/// Persisted shape of a task. Only fields that never change after enqueue.
#[derive(Debug, Serialize, Deserialize)]
struct StoredTask {
    id: TaskId,
    name: String,
    #[serde(default)]
    payload: Payload,
    #[serde(default)]
    priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scheduled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl StoredTask {
    fn encode(task: &Task) -> Result<Vec<u8>, StoreError> {
        let stored = StoredTask {
            id: task.id,
            name: task.name.clone(),
            payload: task.payload.clone(),
            priority: task.priority,
            scheduled_at: task.scheduled_at,
            created_at: task.created_at,
        };
        Ok(serde_json::to_vec(&stored)?)
    }

    fn decode(bytes: &[u8]) -> Result<Task, StoreError> {
        let stored: StoredTask = serde_json::from_slice(bytes)?;
        let status = if stored.scheduled_at.is_some() {
            TaskStatus::Scheduled
        } else {
            TaskStatus::Queued
        };
        Ok(Task {
            id: stored.id,
            name: stored.name,
            payload: stored.payload,
            status,
            priority: stored.priority,
            scheduled_at: stored.scheduled_at,
            created_at: stored.created_at,
            retries: 0,
            receipt_handle: None,
        })
    }
}

pub struct ListStore<B> {
    backend: B,
    queue_key: String,
    pending_key: String,
}

impl<B: ListBackend> ListStore<B> {
    pub fn new(backend: B, namespace: &str) -> Self {
        Self {
            backend,
            queue_key: format!("{namespace}:queue"),
            pending_key: format!("{namespace}:pending"),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn len_queue(&self) -> Result<usize, StoreError> {
        self.backend.llen(&self.queue_key).await
    }

    pub async fn len_pending(&self) -> Result<usize, StoreError> {
        self.backend.llen(&self.pending_key).await
    }
}

#[async_trait]
impl<B: ListBackend> TaskStore for ListStore<B> {
    async fn push(&self, task: Task) -> Result<(), StoreError> {
        let bytes = StoredTask::encode(&task)?;
        self.backend.lpush(&self.queue_key, bytes).await
    }

    async fn pop(&self) -> Result<Task, StoreError> {
        let Some(bytes) = self
            .backend
            .rpoplpush(&self.queue_key, &self.pending_key)
            .await?
        else {
            return Err(StoreError::NoTasksAvailable);
        };

        match StoredTask::decode(&bytes) {
            Ok(task) => Ok(task),
            Err(err) => {
                // 壊れたエントリは ack できないので pending から外す
                warn!(key = %self.pending_key, error = %err, "dropping undecodable task");
                self.backend.lrem(&self.pending_key, 1, &bytes).await?;
                Err(err)
            }
        }
    }

    async fn ack(&self, task: &Task) -> Result<(), StoreError> {
        let bytes = StoredTask::encode(task)?;
        let removed = self.backend.lrem(&self.pending_key, 1, &bytes).await?;
        if removed == 0 {
            return Err(StoreError::NotFoundInPending(task.id));
        }
        Ok(())
    }
}
