//! MigrationRunner - レガシー blob から per-task レコードへの一度きりの移行
//!
//! # フロー
//! 1. MigrationRecord を読む。`done` なら即 return（安い no-op）
//! 2. プロセス内ラッチを取る（同時に呼ばれた 2 回目以降はここで待つ）
//! 3. ラッチ取得後にもう一度 MigrationRecord を読む（先行した実行の結果を観測する）
//! 4. legacy blob の各エントリを Task に変換し、TaskStore 経由で書く
//!    - 不正なエントリは報告してスキップ（partial success）
//!    - 既に存在する ID はスキップ（途中で落ちた後の再実行でも重複しない）
//! 5. 全エントリを試した後に一度だけ `done = true` を書く
//! 6. `migrationFinished` を一度だけ発行
//!
//! legacy blob は削除しません（監査・ロールバック用）。

use std::sync::Arc;

use tokio::sync::Mutex;

use super::legacy::convert_entry;
use crate::domain::{
    MigrationEntryError, MigrationRecord, MigrationReport, QueueError, QueueEvent, StorageError,
};
use crate::events::EventBus;
use crate::ports::{Clock, DiagnosticsSink, LEGACY_SWAPS_KEY, MIGRATION_KEY, StorageAdapter};
use crate::queue::TaskStore;

/// Process-scoped latch that serializes migration runs.
///
/// Lives in an explicit `InitContext`, not in a global, so every component
/// that may trigger initialization shares the same instance.
#[derive(Debug, Default)]
pub struct MigrationLatch {
    lock: Mutex<()>,
}

impl MigrationLatch {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Things shared by every initialization attempt in one process.
#[derive(Debug, Default)]
pub struct InitContext {
    pub migration_latch: MigrationLatch,
}

impl InitContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

pub struct MigrationRunner {
    storage: Arc<dyn StorageAdapter>,
    store: Arc<TaskStore>,
    events: Arc<EventBus>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    clock: Arc<dyn Clock>,
    legacy_key: String,
}

impl MigrationRunner {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        store: Arc<TaskStore>,
        events: Arc<EventBus>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            store,
            events,
            diagnostics,
            clock,
            legacy_key: LEGACY_SWAPS_KEY.to_string(),
        }
    }

    pub fn with_legacy_key(mut self, key: impl Into<String>) -> Self {
        self.legacy_key = key.into();
        self
    }

    async fn read_record(&self) -> Result<Option<MigrationRecord>, StorageError> {
        let Some(bytes) = self.storage.get(MIGRATION_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<MigrationRecord>(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // unreadable flag: migrate again, inserts are idempotent
                self.diagnostics.report(
                    "unreadable migration record, migrating again",
                    serde_json::json!({ "error": e.to_string() }),
                );
                Ok(None)
            }
        }
    }

    async fn write_record(&self, record: &MigrationRecord) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(record)?;
        self.storage.set(MIGRATION_KEY, bytes).await
    }

    /// Run the migration once. Safe to call any number of times, concurrently.
    pub async fn run(&self, latch: &MigrationLatch) -> Result<MigrationReport, StorageError> {
        if self.read_record().await?.is_some_and(|r| r.done) {
            return Ok(already_done());
        }

        let _guard = latch.lock.lock().await;
        if self.read_record().await?.is_some_and(|r| r.done) {
            tracing::debug!("migration finished by a concurrent caller");
            return Ok(already_done());
        }

        self.migrate().await
    }

    async fn migrate(&self) -> Result<MigrationReport, StorageError> {
        if self.read_record().await?.is_none() {
            self.write_record(&MigrationRecord {
                done: false,
                completed_at: None,
                migrated: 0,
                skipped: 0,
            })
            .await?;
        }

        let entries = match self.storage.get(&self.legacy_key).await? {
            None => Vec::new(),
            Some(bytes) => match serde_json::from_slice::<Vec<serde_json::Value>>(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    self.diagnostics.report(
                        "legacy swap blob is not a JSON array, nothing to migrate",
                        serde_json::json!({ "key": self.legacy_key, "error": e.to_string() }),
                    );
                    Vec::new()
                }
            },
        };

        tracing::info!(entries = entries.len(), "migrating legacy swaps");

        let mut report = MigrationReport::default();
        let mut storage_failure: Option<StorageError> = None;
        let now = self.clock.now();

        for (index, entry) in entries.into_iter().enumerate() {
            let task = match convert_entry(index, entry, now) {
                Ok(task) => task,
                Err(e) => {
                    self.report_entry(&e);
                    report.errors.push(e);
                    continue;
                }
            };
            let id = task.id.clone();
            match self.store.insert_new(task).await {
                Ok(true) => report.migrated += 1,
                Ok(false) => report.already_present += 1,
                Err(QueueError::Storage(e)) => {
                    tracing::warn!(task_id = %id, error = %e, "failed to persist migrated task");
                    storage_failure = Some(e);
                }
                Err(e) => {
                    let entry_error = MigrationEntryError {
                        index,
                        request_id: Some(id.to_string()),
                        reason: e.to_string(),
                    };
                    self.report_entry(&entry_error);
                    report.errors.push(entry_error);
                }
            }
        }

        // a failed write would be lost on reload, so keep the flag open for the next start
        if let Some(e) = storage_failure {
            return Err(e);
        }

        self.write_record(&MigrationRecord::completed(
            self.clock.now(),
            report.migrated,
            report.errors.len(),
        ))
        .await?;

        tracing::info!(
            migrated = report.migrated,
            already_present = report.already_present,
            skipped = report.errors.len(),
            "migration finished"
        );
        self.events.emit(&QueueEvent::MigrationFinished(report.clone()));
        Ok(report)
    }

    fn report_entry(&self, e: &MigrationEntryError) {
        self.diagnostics.report(
            "skipping malformed legacy swap",
            serde_json::json!({
                "index": e.index,
                "request_id": e.request_id,
                "reason": e.reason,
            }),
        );
    }
}

fn already_done() -> MigrationReport {
    MigrationReport {
        was_already_done: true,
        ..MigrationReport::default()
    }
}
