//! StorageAdapter port - 永続化の境界
//!
//! # キー空間
//! - `legacy/swaps`: 旧形式（全スワップを 1 つの JSON 配列で保存）
//! - `tasks/{id}`: 現行形式（1 タスク 1 レコード）
//! - `meta/migration`: MigrationRecord
//!
//! # 設計原則
//! - 純粋な永続化境界（キャッシュはしない、キャッシュは TaskStore の責務）
//! - 失敗は必ず呼び出し側へ返す（握りつぶさない）

use async_trait::async_trait;

use crate::domain::{StorageError, TaskId};

pub const LEGACY_SWAPS_KEY: &str = "legacy/swaps";
pub const TASKS_PREFIX: &str = "tasks/";
pub const MIGRATION_KEY: &str = "meta/migration";

pub fn task_key(id: &TaskId) -> String {
    format!("{TASKS_PREFIX}{id}")
}

/// Durable key-value storage.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Is the backend reachable at all? Used once by the startup barrier.
    async fn probe(&self) -> Result<(), StorageError> {
        self.keys(MIGRATION_KEY).await.map(|_| ())
    }
}
