//! InMemoryListBackend - 開発用のリスト型バックエンド
//!
//! # 学習ポイント
//! - HashMap<String, VecDeque<Vec<u8>>> でキーごとにリストを管理
//! - 1 つの Mutex で rpoplpush の原子性を再現する
//! - await を跨いでロックを持たないので std の Mutex で十分

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::domain::StoreError;
use crate::ports::ListBackend;

/// In-process stand-in for a remote list store.
///
/// Head of each list is the front of the `VecDeque`, so `lpush` + `rpoplpush`
/// gives FIFO delivery.
#[derive(Default)]
pub struct InMemoryListBackend {
    lists: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
}

impl InMemoryListBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lists(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Vec<u8>>>> {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ListBackend for InMemoryListBackend {
    async fn lpush(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.lists()
            .entry(key.to_string())
            .or_default()
            .push_front(value);
        Ok(())
    }

    async fn rpoplpush(&self, src: &str, dst: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut lists = self.lists();
        let Some(value) = lists.get_mut(src).and_then(VecDeque::pop_back) else {
            return Ok(None);
        };
        lists
            .entry(dst.to_string())
            .or_default()
            .push_front(value.clone());
        Ok(Some(value))
    }

    async fn lrem(&self, key: &str, count: usize, value: &[u8]) -> Result<usize, StoreError> {
        let mut lists = self.lists();
        let Some(list) = lists.get_mut(key) else {
            return Ok(0);
        };

        let mut removed = 0;
        list.retain(|entry| {
            if removed < count && entry.as_slice() == value {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.lists().get(key).map_or(0, VecDeque::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lpush_then_rpoplpush_is_fifo() {
        let backend = InMemoryListBackend::new();
        backend.lpush("q", b"a".to_vec()).await.unwrap();
        backend.lpush("q", b"b".to_vec()).await.unwrap();

        let first = backend.rpoplpush("q", "p").await.unwrap();
        assert_eq!(first.as_deref(), Some(&b"a"[..]));
        assert_eq!(backend.llen("q").await.unwrap(), 1);
        assert_eq!(backend.llen("p").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rpoplpush_on_empty_list_is_none() {
        let backend = InMemoryListBackend::new();
        assert_eq!(backend.rpoplpush("q", "p").await.unwrap(), None);
        assert_eq!(backend.llen("p").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lrem_respects_count() {
        let backend = InMemoryListBackend::new();
        for _ in 0..3 {
            backend.lpush("p", b"x".to_vec()).await.unwrap();
        }
        backend.lpush("p", b"y".to_vec()).await.unwrap();

        assert_eq!(backend.lrem("p", 2, b"x").await.unwrap(), 2);
        assert_eq!(backend.llen("p").await.unwrap(), 2);
        assert_eq!(backend.lrem("p", 5, b"z").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let backend = InMemoryListBackend::new();
        backend.lpush("ns1:queue", b"a".to_vec()).await.unwrap();
        backend.lpush("ns2:queue", b"b".to_vec()).await.unwrap();

        assert_eq!(backend.llen("ns1:queue").await.unwrap(), 1);
        assert_eq!(backend.llen("ns2:queue").await.unwrap(), 1);
        assert_eq!(backend.llen("ns3:queue").await.unwrap(), 0);
    }
}
