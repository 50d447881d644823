//! MemoryStore - リファレンス実装のインメモリストア
//!
//! # 学習ポイント
//! - `queue`（未配送の FIFO）と `pending`（配送済み・未 ack）の 2 本の列
//! - Pop は queue を先頭から走査し、scheduled_at を過ぎた最初のタスクを返す
//! - 1 つの Mutex で Push/Pop/Ack を直列化する（二重 Pop を防ぐ唯一の仕組み）

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::{StoreError, Task, TaskId};
use crate::ports::{Clock, SystemClock, TaskStore};

/// How `ack` finds the pending entry to remove.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMatching {
    /// Match on the unique task id.
    #[default]
    ById,

    /// Match the first pending entry with equal `name` and `payload`.
    ///
    /// Two in-flight tasks with identical content are indistinguishable in
    /// this mode; the first one popped is removed.
    ByValue,
}

#[derive(Default)]
struct MemoryState {
    queue: VecDeque<Task>,
    pending: Vec<Task>,
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
    matching: AckMatching,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock,
            matching: AckMatching::default(),
        }
    }

    pub fn with_ack_matching(mut self, matching: AckMatching) -> Self {
        self.matching = matching;
        self
    }

    pub fn ack_matching(&self) -> AckMatching {
        self.matching
    }

    pub async fn len_queue(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn len_pending(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Ids of popped-but-unacknowledged tasks, in pop order.
    pub async fn pending_ids(&self) -> Vec<TaskId> {
        self.state.lock().await.pending.iter().map(|t| t.id).collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn push(&self, task: Task) -> Result<(), StoreError> {
        self.state.lock().await.queue.push_back(task);
        Ok(())
    }

    async fn pop(&self) -> Result<Task, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if state.queue.is_empty() {
            return Err(StoreError::NoTasksAvailable);
        }

        let Some(index) = state.queue.iter().position(|t| t.is_due(now)) else {
            return Err(StoreError::NoTaskReady);
        };

        let task = state
            .queue
            .remove(index)
            .ok_or(StoreError::NoTaskReady)?;
        state.pending.push(task.clone());
        Ok(task)
    }

    async fn ack(&self, task: &Task) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        let index = match self.matching {
            AckMatching::ById => state.pending.iter().position(|t| t.id == task.id),
            AckMatching::ByValue => state.pending.iter().position(|t| t.same_content(task)),
        };

        match index {
            Some(i) => {
                state.pending.remove(i);
                Ok(())
            }
            None => Err(StoreError::NotFoundInPending(task.id)),
        }
    }
}
