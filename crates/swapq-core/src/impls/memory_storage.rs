//! InMemoryStorage - 開発・テスト用のストレージ
//!
//! # 実装詳細
//! - BTreeMap<String, Vec<u8>> で保持（keys() がソート済みになる）
//! - quota（合計バイト数）を超える書き込みは QuotaExceeded
//! - `set_unavailable(true)` でバックエンド障害を再現できる

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::StorageError;
use crate::ports::StorageAdapter;

#[derive(Default)]
struct MemoryState {
    entries: BTreeMap<String, Vec<u8>>,
    quota: Option<usize>,
    unavailable: bool,
    /// Successful writes per key.
    writes: HashMap<String, usize>,
}

impl MemoryState {
    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable {
            return Err(StorageError::Unavailable("in-memory backend switched off".into()));
        }
        Ok(())
    }

    fn used_bytes_without(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

#[derive(Default)]
pub struct InMemoryStorage {
    state: Mutex<MemoryState>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the total stored bytes (keys + values).
    pub fn with_quota(quota: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                quota: Some(quota),
                ..MemoryState::default()
            }),
        }
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// How many times `key` was successfully written.
    pub async fn write_count(&self, key: &str) -> usize {
        self.state.lock().await.writes.get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        if let Some(quota) = state.quota {
            let used = state.used_bytes_without(key);
            let needed = key.len() + value.len();
            if used + needed > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    available: quota.saturating_sub(used),
                });
            }
        }

        state.entries.insert(key.to_string(), value);
        *state.writes.entry(key.to_string()).or_default() += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.entries.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
