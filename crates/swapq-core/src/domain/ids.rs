//! Domain identifiers.
//!
//! # TaskId
//! 新規タスクは ULID ベースの `task-<ULID>` を使います（生成順でソート可能）。
//! レガシー移行で作られるタスクは、旧データの `requestId` をそのまま ID として引き継ぎます。
//! どちらもストレージキー `tasks/{id}` にそのまま使われるので、空文字は許可しません。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

const TASK_PREFIX: &str = "task-";

/// Identifier of a queued task, stable across reloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// ULID から新しい TaskId を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(format!("{TASK_PREFIX}{ulid}"))
    }

    /// Reuse an externally assigned id (legacy `requestId`).
    ///
    /// Returns `None` for blank input.
    pub fn from_external(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}
