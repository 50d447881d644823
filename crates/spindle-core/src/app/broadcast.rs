//! Broadcaster - タスク状態遷移の購読者へのファンアウト
//!
//! - publish は購読者ごとに `try_send` するだけで、決してブロックしない
//! - 詰まっている購読者へのイベントは捨てる（best-effort / lossy）
//! - 受信側が drop された購読者は publish 時に取り除く

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::domain::Task;

pub type SubscriberId = u64;

/// Receiving end of a subscription: a stream of task snapshots.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Task>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Task> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Task> {
        self.rx.try_recv().ok()
    }

    pub fn into_inner(self) -> mpsc::Receiver<Task> {
        self.rx
    }
}

pub struct Broadcaster {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<Task>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        debug!(subscriber_id = id, "subscriber registered");
        Subscription { id, rx }
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            debug!(subscriber_id = id, "subscriber removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a snapshot of `task` to every subscriber that has room.
    pub fn publish(&self, task: &Task) {
        let mut closed = Vec::new();
        {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for (id, tx) in subscribers.iter() {
                match tx.try_send(task.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        trace!(subscriber_id = id, task_id = %task.id, "subscriber full, event dropped");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for id in closed {
                subscribers.remove(&id);
                debug!(subscriber_id = id, "pruned closed subscriber");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Payload, TaskId, TaskStatus};
    use chrono::Utc;
    use ulid::Ulid;

    fn task() -> Task {
        Task::new(TaskId::from(Ulid::new()), "echo", Payload::new(), Utc::now())
    }

    #[tokio::test]
    async fn every_subscriber_gets_the_event() {
        let b = Broadcaster::new(8);
        let mut s1 = b.subscribe();
        let mut s2 = b.subscribe();
        assert_ne!(s1.id(), s2.id());

        let t = task();
        b.publish(&t);

        assert_eq!(s1.recv().await.unwrap().id, t.id);
        assert_eq!(s2.recv().await.unwrap().id, t.id);
    }

    #[test]
    fn full_subscriber_is_skipped_not_awaited() {
        let b = Broadcaster::new(1);
        let mut slow = b.subscribe();
        let mut fast = b.subscribe();

        let first = task();
        let mut second = task();
        second.status = TaskStatus::Running;

        b.publish(&first);
        assert_eq!(fast.try_recv().unwrap().id, first.id);
        b.publish(&second);
        assert_eq!(fast.try_recv().unwrap().id, second.id);

        // slow never drained: it kept only the first event
        assert_eq!(slow.try_recv().unwrap().id, first.id);
        assert!(slow.try_recv().is_none());
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn dropped_subscriber_is_pruned_on_publish() {
        let b = Broadcaster::new(4);
        let gone = b.subscribe();
        let _kept = b.subscribe();
        drop(gone);

        b.publish(&task());
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn unsubscribe_removes_once() {
        let b = Broadcaster::new(4);
        let s = b.subscribe();
        assert!(b.unsubscribe(s.id()));
        assert!(!b.unsubscribe(s.id()));
        assert!(b.is_empty());
    }
}
