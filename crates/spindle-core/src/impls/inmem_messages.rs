//! InMemoryMessageQueue - 開発用の receipt handle 型キュー
//!
//! # 実装詳細
//! - ready: 未受信メッセージ
//! - in_flight: receipt handle → 本文（delete されるまで保持）
//! - Notify で send 時に受信待ちを起こす（long poll の再現）

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use ulid::Ulid;

use crate::domain::StoreError;
use crate::ports::{MessageQueueClient, ReceivedMessage};

#[derive(Default)]
struct Messages {
    ready: VecDeque<String>,
    in_flight: HashMap<String, String>,
}

#[derive(Default)]
pub struct InMemoryMessageQueue {
    messages: Mutex<Messages>,
    notify: Notify,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready_len(&self) -> usize {
        self.messages().ready.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.messages().in_flight.len()
    }

    fn messages(&self) -> MutexGuard<'_, Messages> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_receive(&self) -> Option<ReceivedMessage> {
        let mut messages = self.messages();
        let body = messages.ready.pop_front()?;
        let receipt_handle = format!("rh-{}", Ulid::new());
        messages
            .in_flight
            .insert(receipt_handle.clone(), body.clone());
        Some(ReceivedMessage {
            body,
            receipt_handle,
        })
    }
}

#[async_trait]
impl MessageQueueClient for InMemoryMessageQueue {
    async fn send(&self, body: String) -> Result<(), StoreError> {
        self.messages().ready.push_back(body);
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<ReceivedMessage>, StoreError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(message) = self.try_receive() {
                return Ok(Some(message));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<bool, StoreError> {
        Ok(self.messages().in_flight.remove(receipt_handle).is_some())
    }
}
