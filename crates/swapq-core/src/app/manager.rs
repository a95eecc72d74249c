//! QueueManager - キューの公開インターフェース
//!
//! # 起動バリア
//! `init` は次の順で完了してから manager を返します:
//! 1. ストレージの到達確認（失敗は致命的: `InitError::StorageUnreachable`）
//! 2. レガシー移行（失敗は報告のみ、次回起動で再試行）
//! 3. TaskStore のロード
//! 4. リロードで中断されたタスクの再開（バックグラウンド）
//!
//! manager が手に入った時点で、タスクの処理は必ずロード後に始まります。

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::builder::QueueSetup;
use crate::domain::{
    InitError, MigrationReport, QueueCounts, QueueError, QueueEvent, Task, TaskId, TaskSpec,
    TaskStatus,
};
use crate::events::{EventBus, EventSubscriptions};
use crate::migration::MigrationRunner;
use crate::ports::{Clock, IdGenerator};
use crate::queue::{LoadReport, TaskStore};
use crate::scheduler::{DisconnectReport, Scheduler};

pub struct QueueManager {
    store: Arc<TaskStore>,
    scheduler: Scheduler,
    events: Arc<EventBus>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    migration: Option<MigrationReport>,
    load: LoadReport,
    resume: Option<JoinHandle<Vec<TaskId>>>,
}

impl QueueManager {
    pub async fn init(setup: QueueSetup) -> Result<Self, InitError> {
        setup
            .storage
            .probe()
            .await
            .map_err(InitError::StorageUnreachable)?;

        let store = Arc::new(TaskStore::new(
            setup.storage.clone(),
            setup.diagnostics.clone(),
        ));

        let migration = if setup.migration_enabled {
            let runner = MigrationRunner::new(
                setup.storage.clone(),
                store.clone(),
                setup.events.clone(),
                setup.diagnostics.clone(),
                setup.clock.clone(),
            )
            .with_legacy_key(setup.legacy_key.clone());
            match runner.run(&setup.init_context.migration_latch).await {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::warn!(error = %e, "migration did not finish, retrying on next start");
                    setup.diagnostics.report(
                        "migration did not finish",
                        serde_json::json!({ "error": e.to_string() }),
                    );
                    None
                }
            }
        } else {
            None
        };

        let load = store.load().await.map_err(InitError::Load)?;

        let scheduler = Scheduler::new(
            store.clone(),
            setup.executors,
            setup.events.clone(),
            setup.diagnostics.clone(),
            setup.clock.clone(),
            setup.wallets,
        );

        let resume = setup.resume_on_init.then(|| {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.resume_interrupted().await })
        });

        tracing::info!(
            tasks = load.loaded,
            corrupt = load.corrupt.len(),
            migrated = migration.as_ref().map_or(0, |m| m.migrated),
            "queue manager ready"
        );

        Ok(Self {
            store,
            scheduler,
            events: setup.events,
            ids: setup.ids,
            clock: setup.clock,
            migration,
            load,
            resume,
        })
    }

    /// Persist a new task, emit `taskCreated` and start it in the background.
    ///
    /// Nothing is queued when the write fails.
    pub async fn enqueue(&self, spec: TaskSpec) -> Result<TaskId, QueueError> {
        let id = self.ids.generate_task_id();
        let task = Task::new(id.clone(), spec, self.clock.now());

        if let Err(e) = self.store.upsert(task.clone()).await {
            self.store.forget(&id).await;
            tracing::warn!(task_id = %id, error = %e, "enqueue failed");
            return Err(e);
        }

        tracing::info!(task_id = %id, task_type = %task.task_type, steps = task.steps.len(), "task enqueued");
        self.events.emit(&QueueEvent::TaskCreated(task));

        let scheduler = self.scheduler.clone();
        let started = id.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.start(&started).await {
                tracing::warn!(task_id = %started, error = %e, "task did not start");
            }
        });
        Ok(id)
    }

    pub async fn list(&self) -> Vec<Task> {
        self.store.list().await
    }

    pub async fn list_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.store.list_by_status(status).await
    }

    pub async fn get(&self, id: &TaskId) -> Option<Task> {
        self.store.get(id).await
    }

    pub async fn counts(&self) -> QueueCounts {
        self.store.counts().await
    }

    pub async fn retry_task(&self, id: &TaskId) -> Result<(), QueueError> {
        self.scheduler.retry_task(id).await
    }

    /// Delete a task (history clearing). Refused while it is being executed.
    pub async fn remove(&self, id: &TaskId) -> Result<Option<Task>, QueueError> {
        self.scheduler.remove(id).await
    }

    pub async fn on_wallet_connected(&self, wallet_type: &str, chain: &str) -> Vec<TaskId> {
        self.scheduler.on_wallet_connected(wallet_type, chain).await
    }

    pub async fn on_wallet_disconnected(&self) -> DisconnectReport {
        self.scheduler.on_wallet_disconnected().await
    }

    pub fn events(&self) -> EventSubscriptions {
        EventSubscriptions::new(self.events.clone())
    }

    /// What the startup migration did (`None` when disabled or unfinished).
    pub fn migration_report(&self) -> Option<&MigrationReport> {
        self.migration.as_ref()
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load
    }

    /// Wait for the startup resume of interrupted tasks to finish.
    pub async fn wait_resumed(&mut self) -> Vec<TaskId> {
        match self.resume.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn store_for_tests(&self) -> &TaskStore {
        &self.store
    }

    /// Teardown: drops every event handler. Returns how many were removed.
    pub fn shutdown(&self) -> usize {
        let removed = self.events.clear_all();
        tracing::info!(handlers = removed, "queue manager shut down");
        removed
    }
}
