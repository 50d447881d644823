//! MessageQueueClient port - receipt handle 型クラウドキューの境界
//!
//! 受信ごとに発行される receipt handle で削除（= ack）する SQS 型のサービスを想定します。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::StoreError;

/// One delivery of a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub body: String,
    /// Delivery-specific token; the only way to delete this delivery.
    pub receipt_handle: String,
}

#[async_trait]
pub trait MessageQueueClient: Send + Sync {
    async fn send(&self, body: String) -> Result<(), StoreError>;

    /// Receive at most one message, waiting up to `wait` (long poll).
    async fn receive(&self, wait: Duration) -> Result<Option<ReceivedMessage>, StoreError>;

    /// Delete the delivery identified by `receipt_handle`.
    ///
    /// Returns `false` when the handle is unknown.
    async fn delete(&self, receipt_handle: &str) -> Result<bool, StoreError>;
}
