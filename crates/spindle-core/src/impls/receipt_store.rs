//! ReceiptStore - receipt handle 型クラウドキュー上の TaskStore
//!
//! Pop で受け取った receipt handle を Task に載せ、Ack ではその handle で削除します。
//! handle を失うと二度と ack できないため、ワーカーはリトライ中も Task を作り直しません。

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::{StoreError, Task};
use crate::ports::{MessageQueueClient, TaskStore};

pub struct ReceiptStore<C> {
    client: C,
    wait: Duration,
}

impl<C: MessageQueueClient> ReceiptStore<C> {
    /// Long-poll wait used by `pop` (default 10s).
    pub const DEFAULT_WAIT: Duration = Duration::from_secs(10);

    pub fn new(client: C) -> Self {
        Self {
            client,
            wait: Self::DEFAULT_WAIT,
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C: MessageQueueClient> TaskStore for ReceiptStore<C> {
    async fn push(&self, task: Task) -> Result<(), StoreError> {
        let body = serde_json::to_string(&task)?;
        self.client.send(body).await
    }

    async fn pop(&self) -> Result<Task, StoreError> {
        let Some(message) = self.client.receive(self.wait).await? else {
            return Err(StoreError::NoTasksAvailable);
        };

        let mut task: Task = match serde_json::from_str(&message.body) {
            Ok(task) => task,
            Err(err) => {
                warn!(error = %err, "deleting undecodable message");
                self.client.delete(&message.receipt_handle).await?;
                return Err(err.into());
            }
        };
        task.receipt_handle = Some(message.receipt_handle);
        Ok(task)
    }

    async fn ack(&self, task: &Task) -> Result<(), StoreError> {
        let Some(handle) = task.receipt_handle.as_deref() else {
            return Err(StoreError::MissingReceiptHandle(task.id));
        };
        if !self.client.delete(handle).await? {
            return Err(StoreError::NotFoundInPending(task.id));
        }
        Ok(())
    }
}
