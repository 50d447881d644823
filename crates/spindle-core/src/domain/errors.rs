//! Errors - エラー型と分類
//!
//! - `StoreError`: backend の Push/Pop/Ack 失敗
//! - `QueueError`: 同期 API（enqueue など）が呼び出し元に返すエラー
//! - `HandlerError`: handler が返す失敗（worker がリトライを判断する）

use thiserror::Error;

use super::TaskId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no tasks available")]
    NoTasksAvailable,

    #[error("no task ready")]
    NoTaskReady,

    #[error("task {0} not found in pending")]
    NotFoundInPending(TaskId),

    #[error("task {0} has no receipt handle")]
    MissingReceiptHandle(TaskId),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("task codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StoreError {
    /// "Nothing to hand out right now", as opposed to a backend failure.
    pub fn is_idle(&self) -> bool {
        matches!(self, StoreError::NoTasksAvailable | StoreError::NoTaskReady)
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("handler for task '{0}' not registered")]
    HandlerNotRegistered(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid queue config: {0}")]
    InvalidConfig(String),

    #[error("missing handlers: {0:?}. These tasks were expected but not registered.")]
    MissingHandlers(Vec<String>),
}

/// Failure returned by a task handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("json decode: {err}"))
    }
}
