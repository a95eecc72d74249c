//! Errors - エラー型と分類
//!
//! # 分類
//! - StorageError: I/O・quota・シリアライズ失敗（呼び出し側でリトライ可能）
//! - MigrationEntryError: レガシーレコード 1 件の不正（スキップ、致命的ではない）
//! - StepExecutionError: タスク固有の失敗（そのタスクだけ FAILED）
//! - QueueError::TaskNotResumable: retry_task の誤用
//! - ConnectError: ウォレット側から報告されるエラー（UI に表示、他タスクに影響しない）

use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskStatus;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded writing key={key} (needed {needed} bytes, {available} available)")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    #[error("storage io error on key={key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// One historical record could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("legacy entry #{index} ({}): {reason}", request_id.as_deref().unwrap_or("no requestId"))]
pub struct MigrationEntryError {
    pub index: usize,
    pub request_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task {task_id} step {step} failed: {detail}")]
pub struct StepExecutionError {
    pub task_id: TaskId,
    pub step: usize,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("wallet {0} is not installed")]
    NotInstalled(String),

    #[error("wallet {wallet_type} rejected the connection: {reason}")]
    Rejected { wallet_type: String, reason: String },

    #[error("wallet {wallet_type} failed to connect: {reason}")]
    Failed { wallet_type: String, reason: String },
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task {id} is not resumable (status={status})")]
    TaskNotResumable { id: TaskId, status: TaskStatus },

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("task {0} is terminal and cannot be modified")]
    TaskTerminal(TaskId),

    #[error("task {0} is being executed")]
    TaskInFlight(TaskId),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Startup failures. Only an unreachable backend is fatal.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("no storage backend reachable: {0}")]
    StorageUnreachable(#[source] StorageError),

    #[error("failed to load queue: {0}")]
    Load(#[source] StorageError),
}
