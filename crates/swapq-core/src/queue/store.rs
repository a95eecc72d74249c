//! TaskStore - セッション中のキューの正本（source of truth）
//!
//! # 設計原則
//! - メモリ上の Queue が正本、StorageAdapter へは write-through
//! - ストレージ書き込みに失敗してもメモリ側は更新済み（失敗は呼び出し側へ返す）
//! - ロックはストレージ I/O を跨いで保持しない
//! - 終端状態（COMPLETED / FAILED）のレコードは上書きさせない

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::{QueueCounts, QueueError, StorageError, Task, TaskId, TaskStatus};
use crate::ports::{DiagnosticsSink, StorageAdapter, TASKS_PREFIX, task_key};

/// In-memory queue state.
#[derive(Default)]
struct QueueState {
    /// All tasks (single source of truth).
    tasks: HashMap<TaskId, Task>,

    /// Insertion order, display only.
    order: Vec<TaskId>,
}

impl QueueState {
    fn put(&mut self, task: Task) {
        if !self.tasks.contains_key(&task.id) {
            self.order.push(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
    }
}

/// Result of `TaskStore::load`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub corrupt: Vec<String>,
}

pub struct TaskStore {
    state: RwLock<QueueState>,
    storage: Arc<dyn StorageAdapter>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl TaskStore {
    pub fn new(storage: Arc<dyn StorageAdapter>, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            state: RwLock::new(QueueState::default()),
            storage,
            diagnostics,
        }
    }

    /// Read every `tasks/*` record into memory.
    ///
    /// A corrupt record is skipped and reported. Failing to list or read the
    /// namespace at all is returned to the caller.
    pub async fn load(&self) -> Result<LoadReport, StorageError> {
        let keys = self.storage.keys(TASKS_PREFIX).await?;

        let mut report = LoadReport::default();
        let mut loaded = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(bytes) = self.storage.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<Task>(&bytes) {
                Ok(task) => loaded.push(task),
                Err(e) => {
                    self.diagnostics.report(
                        "skipping corrupt task record",
                        serde_json::json!({ "key": key, "error": e.to_string() }),
                    );
                    report.corrupt.push(key);
                }
            }
        }

        loaded.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        report.loaded = loaded.len();

        let mut state = self.state.write().await;
        for task in loaded {
            if !state.tasks.contains_key(&task.id) {
                state.put(task);
            }
        }
        drop(state);

        tracing::info!(loaded = report.loaded, corrupt = report.corrupt.len(), "task store loaded");
        Ok(report)
    }

    /// Write a task to memory and to storage.
    ///
    /// Returns `TaskTerminal` (and changes nothing) when the stored copy is
    /// already terminal. A storage failure is returned after the in-memory copy
    /// has been updated.
    pub async fn upsert(&self, task: Task) -> Result<(), QueueError> {
        let bytes = serde_json::to_vec(&task).map_err(StorageError::from)?;
        let key = task_key(&task.id);
        {
            let mut state = self.state.write().await;
            if let Some(existing) = state.tasks.get(&task.id)
                && existing.status.is_terminal()
            {
                return Err(QueueError::TaskTerminal(task.id));
            }
            state.put(task);
        }

        self.storage.set(&key, bytes).await?;
        Ok(())
    }

    /// Insert a task only if its id is unknown. Returns `false` when it
    /// already existed.
    pub async fn insert_new(&self, task: Task) -> Result<bool, QueueError> {
        let bytes = serde_json::to_vec(&task).map_err(StorageError::from)?;
        let key = task_key(&task.id);
        {
            let mut state = self.state.write().await;
            if state.tasks.contains_key(&task.id) {
                return Ok(false);
            }
            state.put(task);
        }

        self.storage.set(&key, bytes).await?;
        Ok(true)
    }

    pub async fn get(&self, id: &TaskId) -> Option<Task> {
        self.state.read().await.tasks.get(id).cloned()
    }

    /// All tasks in insertion order.
    pub async fn list(&self) -> Vec<Task> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect()
    }

    pub async fn list_by_status(&self, status: TaskStatus) -> Vec<Task> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    pub async fn counts(&self) -> QueueCounts {
        let state = self.state.read().await;
        let mut counts = QueueCounts::default();
        for task in state.tasks.values() {
            counts.add(task.status);
        }
        counts
    }

    /// Delete a task from memory and storage (user-initiated history clearing).
    pub async fn remove(&self, id: &TaskId) -> Result<Option<Task>, QueueError> {
        let removed = {
            let mut state = self.state.write().await;
            let removed = state.tasks.remove(id);
            if removed.is_some() {
                state.order.retain(|x| x != id);
            }
            removed
        };

        if removed.is_some() {
            self.storage.delete(&task_key(id)).await?;
        }
        Ok(removed)
    }

    /// Drop a task from memory only (rollback of a write that never reached storage).
    pub(crate) async fn forget(&self, id: &TaskId) {
        let mut state = self.state.write().await;
        if state.tasks.remove(id).is_some() {
            state.order.retain(|x| x != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskSpec;
    use crate::impls::{InMemoryStorage, RecordingDiagnostics};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, sec).unwrap()
    }

    fn task(id: &str, sec: u32) -> Task {
        Task::new(
            TaskId::from_external(id).unwrap(),
            TaskSpec::new("swap", &["one"]),
            at(sec),
        )
    }

    fn store_with(storage: Arc<InMemoryStorage>) -> (TaskStore, Arc<RecordingDiagnostics>) {
        let diagnostics = Arc::new(RecordingDiagnostics::new());
        (TaskStore::new(storage, diagnostics.clone()), diagnostics)
    }

    #[tokio::test]
    async fn upsert_writes_through_to_storage() {
        let storage = Arc::new(InMemoryStorage::new());
        let (store, _) = store_with(storage.clone());

        store.upsert(task("a", 0)).await.unwrap();

        let bytes = storage.get("tasks/a").await.unwrap().unwrap();
        let persisted: Task = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(persisted.id.as_str(), "a");
        assert!(store.get(&persisted.id).await.is_some());
    }

    #[tokio::test]
    async fn storage_failure_is_surfaced_but_memory_is_updated() {
        let storage = Arc::new(InMemoryStorage::new());
        let (store, _) = store_with(storage.clone());
        storage.set_unavailable(true).await;

        let err = store.upsert(task("a", 0)).await.unwrap_err();
        assert!(matches!(err, QueueError::Storage(StorageError::Unavailable(_))));
        assert!(store.get(&TaskId::from_external("a").unwrap()).await.is_some());
    }

    #[tokio::test]
    async fn terminal_task_is_not_overwritten() {
        let storage = Arc::new(InMemoryStorage::new());
        let (store, _) = store_with(storage);

        let mut t = task("a", 0);
        t.mark_completed(at(1));
        store.upsert(t.clone()).await.unwrap();

        let mut again = t.clone();
        again.mark_failed("late".into(), at(2));
        let err = store.upsert(again).await.unwrap_err();
        assert!(matches!(err, QueueError::TaskTerminal(_)));
        assert_eq!(store.get(&t.id).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn load_skips_corrupt_records_and_orders_by_creation() {
        let storage = Arc::new(InMemoryStorage::new());
        for t in [task("z", 1), task("y", 2), task("x", 0)] {
            storage
                .set(&task_key(&t.id), serde_json::to_vec(&t).unwrap())
                .await
                .unwrap();
        }
        storage.set("tasks/broken", b"{not json".to_vec()).await.unwrap();

        let (store, diagnostics) = store_with(storage);
        let report = store.load().await.unwrap();

        assert_eq!(report.loaded, 3);
        assert_eq!(report.corrupt, vec!["tasks/broken".to_string()]);
        assert_eq!(diagnostics.reports().len(), 1);

        let ids: Vec<String> = store.list().await.iter().map(|t| t.id.to_string()).collect();
        assert_eq!(ids, vec!["x", "z", "y"]);
    }

    #[tokio::test]
    async fn insert_new_skips_existing_ids() {
        let storage = Arc::new(InMemoryStorage::new());
        let (store, _) = store_with(storage.clone());

        assert!(store.insert_new(task("a", 0)).await.unwrap());
        assert!(!store.insert_new(task("a", 5)).await.unwrap());
        assert_eq!(storage.write_count("tasks/a").await, 1);
        assert_eq!(store.get(&TaskId::from_external("a").unwrap()).await.unwrap().created_at, at(0));
    }

    #[tokio::test]
    async fn list_by_status_and_remove() {
        let storage = Arc::new(InMemoryStorage::new());
        let (store, _) = store_with(storage.clone());

        let mut done = task("done", 0);
        done.mark_completed(at(1));
        store.upsert(done).await.unwrap();
        store.upsert(task("pending", 1)).await.unwrap();

        assert_eq!(store.list_by_status(TaskStatus::Pending).await.len(), 1);
        assert_eq!(store.counts().await.completed, 1);

        let removed = store.remove(&TaskId::from_external("done").unwrap()).await.unwrap();
        assert!(removed.is_some());
        assert_eq!(storage.get("tasks/done").await.unwrap(), None);
        assert_eq!(store.list().await.len(), 1);
    }
}
