//! ListBackend port - リスト型リモートストアの境界
//!
//! Redis のような「キー → バイト列のリスト」を提供するサービスを想定します。
//! 接続パラメータは実装側のコンストラクタが持ちます。

use async_trait::async_trait;

use crate::domain::StoreError;

/// Byte-list primitives a remote list store offers.
///
/// `rpoplpush` must be atomic on the service side; it is what keeps two
/// workers from popping the same entry.
#[async_trait]
pub trait ListBackend: Send + Sync {
    /// Prepend `value` to the list at `key`.
    async fn lpush(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Atomically pop the tail of `src` and prepend it to `dst`.
    async fn rpoplpush(&self, src: &str, dst: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Remove up to `count` entries equal to `value`; returns how many went.
    async fn lrem(&self, key: &str, count: usize, value: &[u8]) -> Result<usize, StoreError>;

    async fn llen(&self, key: &str) -> Result<usize, StoreError>;
}
