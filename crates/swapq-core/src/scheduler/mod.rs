//! Scheduler - タスクの状態機械とウォレット信号による再開
//!
//! # 設計原則
//! - executor の中身は知らない。Done / Blocked / Error だけを解釈する
//! - 状態の変更は必ず TaskStore::upsert 経由、変更のたびにイベント発行
//! - タスク毎の in-flight マーカーで同一タスクの同時実行を防ぐ
//! - 実行中のタスクに届いた信号は記録し、ステップ終了後に再生する（lost wakeup 防止）
//! - 再開はポーリングしない。信号（connect / disconnect / retry）駆動
//!
//! # 実装詳細
//! in-flight マーカーは `TaskId -> Vec<WalletSignal>` の std Mutex。
//! マーカーを取った側だけが `drive` を呼べる。解放時に溜まった信号があれば、
//! マーカーを保持したまま再生してから解放する。
//! ストア側の RwLock は executor 呼び出しを跨いで保持しない。

mod registry;

pub use registry::{ExecutorRegistry, RegistryError};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::domain::{
    QueueError, QueueEvent, SignalKind, StepExecutionError, StepOutcome, Task, TaskId, TaskStatus,
    WalletSignal,
};
use crate::events::EventBus;
use crate::ports::{Clock, DiagnosticsSink, WalletCollaborator};
use crate::queue::TaskStore;

/// What the holder of an in-flight marker does first.
enum Action {
    Drive,
    Signals(Vec<WalletSignal>),
}

/// Result of `on_wallet_disconnected`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectReport {
    /// Waiting tasks evaluated by this call, oldest first.
    pub reevaluated: Vec<TaskId>,
    /// Tasks whose waiting state changed.
    pub changed: Vec<TaskId>,
    /// In-flight tasks that got the signal recorded for replay.
    pub deferred: Vec<TaskId>,
}

struct Inner {
    store: Arc<TaskStore>,
    executors: ExecutorRegistry,
    events: Arc<EventBus>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    clock: Arc<dyn Clock>,
    wallets: Option<Arc<dyn WalletCollaborator>>,
    in_flight: Mutex<HashMap<TaskId, Vec<WalletSignal>>>,
}

/// Drives tasks through their steps. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        store: Arc<TaskStore>,
        executors: ExecutorRegistry,
        events: Arc<EventBus>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        clock: Arc<dyn Clock>,
        wallets: Option<Arc<dyn WalletCollaborator>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                executors,
                events,
                diagnostics,
                clock,
                wallets,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_in_flight(&self, id: &TaskId) -> bool {
        self.in_flight().contains_key(id)
    }

    /// Drive a `PENDING` task. A task already in flight is left alone.
    pub async fn start(&self, id: &TaskId) -> Result<(), QueueError> {
        let task = self.get(id).await?;
        if task.status != TaskStatus::Pending {
            return Err(QueueError::TaskNotResumable {
                id: id.clone(),
                status: task.status,
            });
        }
        if !self.try_claim(id) {
            tracing::debug!(task_id = %id, "start skipped, task already in flight");
            return Ok(());
        }
        self.run_claimed(id, Action::Drive).await.map(|_| ())
    }

    /// Manual re-attempt of a `PENDING` or waiting task, on the same path as
    /// an automatic resume.
    pub async fn retry_task(&self, id: &TaskId) -> Result<(), QueueError> {
        let task = self.get(id).await?;
        if !task.status.is_resumable() {
            return Err(QueueError::TaskNotResumable {
                id: id.clone(),
                status: task.status,
            });
        }
        if !self.try_claim(id) {
            return Err(QueueError::TaskNotResumable {
                id: id.clone(),
                status: TaskStatus::Running,
            });
        }

        // the task may have moved between the read and the claim
        let current = self.inner.store.get(id).await;
        if let Some(current) = current.filter(|t| !t.status.is_resumable()) {
            self.run_claimed(id, Action::Signals(Vec::new())).await?;
            return Err(QueueError::TaskNotResumable {
                id: id.clone(),
                status: current.status,
            });
        }

        tracing::info!(task_id = %id, "manual retry");
        self.run_claimed(id, Action::Drive).await.map(|_| ())
    }

    /// Resume every waiting task this connection satisfies, oldest first.
    ///
    /// Returns the ids of the tasks that were resumed by this call. Tasks in
    /// flight get the signal recorded instead.
    pub async fn on_wallet_connected(&self, wallet_type: &str, chain: &str) -> Vec<TaskId> {
        let signal = WalletSignal::connected(wallet_type, chain);
        let deferred = self.defer_to_in_flight(&signal);
        tracing::info!(wallet_type, chain, deferred = deferred.len(), "wallet connected");

        let mut resumed = Vec::new();
        for task in self.waiting_tasks().await {
            if !self.is_eligible(&task, &signal)
                || !self.claim_or_defer(&task.id, &signal, &deferred)
            {
                continue;
            }
            match self
                .run_claimed(&task.id, Action::Signals(vec![signal.clone()]))
                .await
            {
                Ok(true) => resumed.push(task.id),
                Ok(false) => {}
                Err(e) => self.report_failure(&task.id, &e),
            }
        }
        resumed
    }

    /// Re-evaluate every waiting task. Level triggered: a repeated call
    /// evaluates all waiting tasks again.
    pub async fn on_wallet_disconnected(&self) -> DisconnectReport {
        let signal = WalletSignal::disconnected();
        let mut report = DisconnectReport {
            deferred: self.defer_to_in_flight(&signal),
            ..DisconnectReport::default()
        };

        for task in self.waiting_tasks().await {
            if !self.claim_or_defer(&task.id, &signal, &report.deferred) {
                if !report.deferred.contains(&task.id) {
                    report.deferred.push(task.id);
                }
                continue;
            }
            report.reevaluated.push(task.id.clone());
            if let Err(e) = self
                .run_claimed(&task.id, Action::Signals(vec![signal.clone()]))
                .await
            {
                self.report_failure(&task.id, &e);
            }
            if let Some(after) = self.inner.store.get(&task.id).await
                && after.status != task.status
            {
                report.changed.push(task.id);
            }
        }

        tracing::info!(
            reevaluated = report.reevaluated.len(),
            changed = report.changed.len(),
            "wallet disconnected"
        );
        report
    }

    /// Restart tasks a reload interrupted (`PENDING` or `RUNNING` at load).
    /// The unfinished step is attempted again; done steps are not.
    pub async fn resume_interrupted(&self) -> Vec<TaskId> {
        let mut tasks: Vec<Task> = self
            .inner
            .store
            .list()
            .await
            .into_iter()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Running))
            .collect();
        sort_oldest_first(&mut tasks);

        let mut resumed = Vec::new();
        for task in tasks {
            if !self.try_claim(&task.id) {
                continue;
            }
            tracing::info!(task_id = %task.id, status = %task.status, "resuming interrupted task");
            match self.run_claimed(&task.id, Action::Drive).await {
                Ok(_) => resumed.push(task.id),
                Err(e) => self.report_failure(&task.id, &e),
            }
        }
        resumed
    }

    /// Delete a task that is not being executed.
    pub async fn remove(&self, id: &TaskId) -> Result<Option<Task>, QueueError> {
        if !self.try_claim(id) {
            return Err(QueueError::TaskInFlight(id.clone()));
        }
        let result = self.inner.store.remove(id).await;
        // signals recorded for a deleted task have nothing left to resume
        self.in_flight().remove(id);
        result
    }

    // ------------------------------------------------------------------
    // in-flight marker
    // ------------------------------------------------------------------

    fn in_flight(&self) -> MutexGuard<'_, HashMap<TaskId, Vec<WalletSignal>>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn try_claim(&self, id: &TaskId) -> bool {
        let mut in_flight = self.in_flight();
        if in_flight.contains_key(id) {
            return false;
        }
        in_flight.insert(id.clone(), Vec::new());
        true
    }

    /// Claim `id`, or record `signal` for it when another caller holds the
    /// marker. `recorded` lists tasks that already got this signal.
    fn claim_or_defer(&self, id: &TaskId, signal: &WalletSignal, recorded: &[TaskId]) -> bool {
        let mut in_flight = self.in_flight();
        match in_flight.get_mut(id) {
            Some(pending) => {
                if !recorded.contains(id) {
                    pending.push(signal.clone());
                }
                false
            }
            None => {
                in_flight.insert(id.clone(), Vec::new());
                true
            }
        }
    }

    /// Record `signal` for every task currently in flight.
    fn defer_to_in_flight(&self, signal: &WalletSignal) -> Vec<TaskId> {
        let mut in_flight = self.in_flight();
        let mut ids = Vec::with_capacity(in_flight.len());
        for (id, pending) in in_flight.iter_mut() {
            pending.push(signal.clone());
            ids.push(id.clone());
        }
        ids.sort();
        ids
    }

    /// Take the signals recorded while the marker was held, or release the
    /// marker when there are none.
    fn take_pending_or_release(&self, id: &TaskId) -> Option<Vec<WalletSignal>> {
        let mut in_flight = self.in_flight();
        match in_flight.get_mut(id) {
            Some(pending) if !pending.is_empty() => Some(std::mem::take(pending)),
            _ => {
                in_flight.remove(id);
                None
            }
        }
    }

    /// Caller holds the marker for `id`. Performs `first`, replays whatever
    /// arrived meanwhile and releases the marker.
    ///
    /// Returns whether `first` drove the task.
    async fn run_claimed(&self, id: &TaskId, first: Action) -> Result<bool, QueueError> {
        let result = match first {
            Action::Drive => self.drive(id).await.map(|_| true),
            Action::Signals(signals) => self.apply_signals(id, signals).await,
        };

        while let Some(pending) = self.take_pending_or_release(id) {
            tracing::debug!(task_id = %id, signals = pending.len(), "replaying signals recorded while in flight");
            if let Err(e) = self.apply_signals(id, pending).await {
                self.report_failure(id, &e);
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // state machine
    // ------------------------------------------------------------------

    async fn apply_signals(
        &self,
        id: &TaskId,
        signals: Vec<WalletSignal>,
    ) -> Result<bool, QueueError> {
        let mut resumed = false;
        for signal in signals {
            let Some(mut task) = self.inner.store.get(id).await else {
                break;
            };
            match signal.kind {
                SignalKind::Connected => {
                    if self.is_eligible(&task, &signal) {
                        tracing::info!(task_id = %id, status = %task.status, "resuming waiting task");
                        self.drive(id).await?;
                        resumed = true;
                    }
                }
                SignalKind::Disconnected => {
                    let before = task.status;
                    if task.rederive_wait(self.now()) {
                        tracing::info!(task_id = %id, from = %before, to = %task.status, "waiting state re-derived");
                        self.persist(&task).await?;
                        self.emit(QueueEvent::TaskUpdated(task));
                    }
                }
            }
        }
        Ok(resumed)
    }

    fn is_eligible(&self, task: &Task, signal: &WalletSignal) -> bool {
        let Some(wallet) = signal.wallet_type.as_deref() else {
            return false;
        };
        let wallet_matches = task
            .required_wallet_type
            .as_deref()
            .is_none_or(|required| required == wallet);

        match task.status {
            TaskStatus::WaitingForWalletConnect => wallet_matches,
            TaskStatus::WaitingForNetworkChange => {
                let Some(required) = task.required_chain.as_deref() else {
                    return wallet_matches;
                };
                let on_chain = signal.chain.as_deref() == Some(required)
                    || self
                        .inner
                        .wallets
                        .as_ref()
                        .is_some_and(|w| w.can_switch_network(wallet, required));
                wallet_matches && on_chain
            }
            _ => false,
        }
    }

    /// Run steps until the task completes, parks or fails. Caller holds the
    /// in-flight marker.
    async fn drive(&self, id: &TaskId) -> Result<(), QueueError> {
        let mut task = self.get(id).await?;
        if task.status.is_terminal() {
            return Ok(());
        }

        task.mark_running(self.now());
        self.persist(&task).await?;
        tracing::info!(task_id = %id, step = ?task.current_step(), "task running");
        self.emit(QueueEvent::TaskUpdated(task.clone()));

        let Some(executor) = self.inner.executors.get(&task.task_type) else {
            let error = StepExecutionError {
                task_id: id.clone(),
                step: task.current_step().unwrap_or(0),
                detail: format!("no executor registered for task type '{}'", task.task_type),
            };
            return self.fail(task, error).await;
        };

        loop {
            let Some(step) = task.current_step() else {
                task.mark_completed(self.now());
                self.persist(&task).await?;
                tracing::info!(task_id = %id, "task completed");
                self.emit(QueueEvent::TaskCompleted(task));
                return Ok(());
            };

            match executor.execute(&task, step).await {
                StepOutcome::Done { result } => {
                    task.complete_step(step, result, self.now());
                    self.persist(&task).await?;
                    tracing::debug!(task_id = %id, step, "step done");
                    self.emit(QueueEvent::TaskUpdated(task.clone()));
                }
                StepOutcome::Blocked(precondition) => {
                    task.park(&precondition, self.now());
                    self.persist(&task).await?;
                    tracing::info!(
                        task_id = %id,
                        step,
                        status = %task.status,
                        chain = task.required_chain.as_deref(),
                        "task parked"
                    );
                    self.emit(QueueEvent::TaskUpdated(task));
                    return Ok(());
                }
                StepOutcome::Error(detail) => {
                    let error = StepExecutionError {
                        task_id: id.clone(),
                        step,
                        detail,
                    };
                    return self.fail(task, error).await;
                }
            }
        }
    }

    async fn fail(&self, mut task: Task, error: StepExecutionError) -> Result<(), QueueError> {
        tracing::warn!(task_id = %task.id, step = error.step, error = %error, "task failed");
        task.mark_failed(error.to_string(), self.now());
        self.persist(&task).await?;
        self.emit(QueueEvent::TaskFailed(task));
        Ok(())
    }

    /// Write-through. A storage failure is reported and the in-memory copy
    /// stays authoritative; the next successful write stores the full task.
    async fn persist(&self, task: &Task) -> Result<(), QueueError> {
        match self.inner.store.upsert(task.clone()).await {
            Ok(()) => Ok(()),
            Err(QueueError::Storage(e)) => {
                tracing::warn!(task_id = %task.id, error = %e, "failed to persist task");
                self.inner.diagnostics.report(
                    "failed to persist task",
                    serde_json::json!({
                        "task_id": task.id,
                        "status": task.status,
                        "error": e.to_string(),
                    }),
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn report_failure(&self, id: &TaskId, error: &QueueError) {
        tracing::warn!(task_id = %id, error = %error, "scheduler could not process task");
        self.inner.diagnostics.report(
            "scheduler could not process task",
            serde_json::json!({ "task_id": id, "error": error.to_string() }),
        );
    }

    async fn get(&self, id: &TaskId) -> Result<Task, QueueError> {
        self.inner
            .store
            .get(id)
            .await
            .ok_or_else(|| QueueError::TaskNotFound(id.clone()))
    }

    async fn waiting_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .inner
            .store
            .list()
            .await
            .into_iter()
            .filter(|t| t.status.is_waiting())
            .collect();
        sort_oldest_first(&mut tasks);
        tasks
    }

    fn emit(&self, event: QueueEvent) {
        self.inner.events.emit(&event);
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }
}

fn sort_oldest_first(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, TaskSpec, WalletPrecondition};
    use crate::impls::{InMemoryStorage, RecordingDiagnostics};
    use crate::ports::FixedClock;
    use crate::testing::{FakeWallet, ScriptedExecutor, record_events};
    use chrono::TimeZone;
    use rstest::rstest;

    type EventLog = Arc<std::sync::Mutex<Vec<(EventKind, TaskId, TaskStatus)>>>;

    struct Harness {
        scheduler: Scheduler,
        store: Arc<TaskStore>,
        storage: Arc<InMemoryStorage>,
        executor: Arc<ScriptedExecutor>,
        wallet: Arc<FakeWallet>,
        diagnostics: Arc<RecordingDiagnostics>,
        events: EventLog,
    }

    fn at(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, sec).unwrap()
    }

    fn id(s: &str) -> TaskId {
        TaskId::from_external(s).unwrap()
    }

    fn harness(executor: ScriptedExecutor) -> Harness {
        let storage = Arc::new(InMemoryStorage::new());
        let diagnostics = Arc::new(RecordingDiagnostics::new());
        let store = Arc::new(TaskStore::new(storage.clone(), diagnostics.clone()));
        let bus = Arc::new(EventBus::new(diagnostics.clone()));
        let events = record_events(&bus);
        let executor = Arc::new(executor);
        let wallet = Arc::new(FakeWallet::new());

        let mut executors = ExecutorRegistry::new();
        executors.register_arc("swap", executor.clone()).unwrap();

        let scheduler = Scheduler::new(
            store.clone(),
            executors,
            bus,
            diagnostics.clone(),
            Arc::new(FixedClock::new(at(30))),
            Some(wallet.clone() as Arc<dyn WalletCollaborator>),
        );
        Harness {
            scheduler,
            store,
            storage,
            executor,
            wallet,
            diagnostics,
            events,
        }
    }

    impl Harness {
        async fn add(&self, name: &str, created: u32, steps: &[&str]) -> TaskId {
            let task = Task::new(id(name), TaskSpec::new("swap", steps), at(created));
            self.store.upsert(task).await.unwrap();
            id(name)
        }

        async fn add_waiting(
            &self,
            name: &str,
            created: u32,
            precondition: WalletPrecondition,
        ) -> TaskId {
            let mut task = Task::new(id(name), TaskSpec::new("swap", &["swap"]), at(created));
            task.park(&precondition, at(created));
            self.store.upsert(task).await.unwrap();
            id(name)
        }

        async fn status(&self, id: &TaskId) -> TaskStatus {
            self.store.get(id).await.unwrap().status
        }

        fn count(&self, kind: EventKind, id: &TaskId) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, t, _)| *k == kind && t == id)
                .count()
        }
    }

    #[tokio::test]
    async fn pending_task_runs_every_step_and_completes() {
        let h = harness(ScriptedExecutor::new().then(0, StepOutcome::done_with(serde_json::json!({"tx": "0x1"}))));
        let t = h.add("t1", 0, &["approve", "swap"]).await;

        h.scheduler.start(&t).await.unwrap();

        let task = h.store.get(&t).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.steps.iter().all(|s| s.done));
        assert_eq!(task.steps[0].result, Some(serde_json::json!({"tx": "0x1"})));
        assert_eq!(h.count(EventKind::TaskCompleted, &t), 1);
        assert!(!h.scheduler.is_in_flight(&t));

        let statuses: Vec<TaskStatus> = h.events.lock().unwrap().iter().map(|(_, _, s)| *s).collect();
        assert_eq!(
            statuses,
            vec![
                TaskStatus::Running,
                TaskStatus::Running,
                TaskStatus::Running,
                TaskStatus::Completed
            ]
        );
    }

    #[tokio::test]
    async fn network_change_scenario_resumes_the_blocked_step_only() {
        let executor = ScriptedExecutor::new().then(
            1,
            StepOutcome::blocked(WalletPrecondition::change_network("POLYGON")),
        );
        let h = harness(executor);
        let t = h.add("t1", 0, &["approve", "swap"]).await;

        h.scheduler.start(&t).await.unwrap();
        let parked = h.store.get(&t).await.unwrap();
        assert_eq!(parked.status, TaskStatus::WaitingForNetworkChange);
        assert_eq!(parked.required_chain.as_deref(), Some("POLYGON"));

        assert!(h.scheduler.on_wallet_connected("metamask", "ETHEREUM").await.is_empty());
        assert_eq!(h.status(&t).await, TaskStatus::WaitingForNetworkChange);

        assert_eq!(h.scheduler.on_wallet_connected("metamask", "POLYGON").await, vec![t.clone()]);

        let done = h.store.get(&t).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.required_chain.is_none());
        assert_eq!(h.executor.calls_for(&t, 0), 1);
        assert_eq!(h.executor.calls_for(&t, 1), 2);
        assert_eq!(h.count(EventKind::TaskCompleted, &t), 1);
    }

    #[rstest]
    #[case::any_wallet_resumes(None, "metamask", true)]
    #[case::same_wallet_resumes(Some("phantom"), "phantom", true)]
    #[case::other_wallet_waits(Some("phantom"), "metamask", false)]
    #[tokio::test]
    async fn wallet_connect_resumes_by_wallet_type(
        #[case] required: Option<&'static str>,
        #[case] connected: &'static str,
        #[case] resumed: bool,
    ) {
        let h = harness(ScriptedExecutor::new());
        let precondition = match required {
            Some(w) => WalletPrecondition::connect_wallet(w),
            None => WalletPrecondition::any_wallet(),
        };
        let t = h.add_waiting("t1", 0, precondition).await;

        let result = h.scheduler.on_wallet_connected(connected, "ETHEREUM").await;

        assert_eq!(!result.is_empty(), resumed);
        let expected = if resumed {
            TaskStatus::Completed
        } else {
            TaskStatus::WaitingForWalletConnect
        };
        assert_eq!(h.status(&t).await, expected);
    }

    #[tokio::test]
    async fn network_wait_also_checks_the_wallet() {
        let h = harness(ScriptedExecutor::new());
        let t = h
            .add_waiting(
                "t1",
                0,
                WalletPrecondition::change_network("POLYGON").with_wallet_type("metamask"),
            )
            .await;

        assert!(h.scheduler.on_wallet_connected("phantom", "POLYGON").await.is_empty());
        assert_eq!(h.scheduler.on_wallet_connected("metamask", "POLYGON").await, vec![t]);
    }

    #[tokio::test]
    async fn switchable_wallet_resumes_network_wait_on_any_chain() {
        let h = harness(ScriptedExecutor::new());
        let t = h
            .add_waiting("t1", 0, WalletPrecondition::change_network("POLYGON"))
            .await;
        h.wallet.allow_switch("metamask", "POLYGON");

        assert!(h.scheduler.on_wallet_connected("keplr", "ETHEREUM").await.is_empty());
        assert_eq!(h.scheduler.on_wallet_connected("metamask", "ETHEREUM").await, vec![t]);
    }

    #[tokio::test]
    async fn duplicate_connect_signals_run_the_step_once() {
        let executor = ScriptedExecutor::new().then(
            0,
            StepOutcome::blocked(WalletPrecondition::change_network("POLYGON")),
        );
        let h = harness(executor);
        let t = h.add("t1", 0, &["swap"]).await;
        h.scheduler.start(&t).await.unwrap();
        assert_eq!(h.status(&t).await, TaskStatus::WaitingForNetworkChange);

        h.executor.gate(1);
        let scheduler = h.scheduler.clone();
        let first =
            tokio::spawn(async move { scheduler.on_wallet_connected("metamask", "POLYGON").await });
        h.executor.entered.notified().await;
        assert!(h.scheduler.is_in_flight(&t));

        assert!(h.scheduler.on_wallet_connected("metamask", "POLYGON").await.is_empty());
        assert!(h.scheduler.on_wallet_connected("metamask", "POLYGON").await.is_empty());

        h.executor.release.add_permits(1);
        assert_eq!(first.await.unwrap(), vec![t.clone()]);

        assert_eq!(h.status(&t).await, TaskStatus::Completed);
        assert_eq!(h.executor.calls_for(&t, 0), 2);
        assert_eq!(h.count(EventKind::TaskCompleted, &t), 1);
        assert!(!h.scheduler.is_in_flight(&t));
    }

    #[tokio::test]
    async fn signal_received_while_running_is_replayed_after_the_step_parks() {
        let executor = ScriptedExecutor::new().then(
            0,
            StepOutcome::blocked(WalletPrecondition::change_network("POLYGON")),
        );
        let h = harness(executor);
        let t = h.add("t1", 0, &["swap"]).await;

        h.executor.gate(1);
        let scheduler = h.scheduler.clone();
        let id = t.clone();
        let run = tokio::spawn(async move { scheduler.start(&id).await });
        h.executor.entered.notified().await;

        // the wallet switches before the running step reports it is blocked
        assert!(h.scheduler.on_wallet_connected("metamask", "POLYGON").await.is_empty());

        h.executor.release.add_permits(1);
        run.await.unwrap().unwrap();

        assert_eq!(h.status(&t).await, TaskStatus::Completed);
        assert_eq!(h.executor.calls_for(&t, 0), 2);
    }

    #[tokio::test]
    async fn signal_for_a_claimed_task_is_recorded_once_and_replayed() {
        let h = harness(ScriptedExecutor::new());
        let bound = h
            .add_waiting("bound", 0, WalletPrecondition::any_wallet().with_chain("POLYGON"))
            .await;
        let signal = WalletSignal::disconnected();

        assert!(h.scheduler.try_claim(&bound));
        assert!(!h.scheduler.claim_or_defer(&bound, &signal, &[]));
        assert!(!h.scheduler.claim_or_defer(&bound, &signal, &[bound.clone()]));
        assert_eq!(h.scheduler.in_flight().get(&bound).map(Vec::len), Some(1));

        h.scheduler
            .run_claimed(&bound, Action::Signals(Vec::new()))
            .await
            .unwrap();

        assert_eq!(h.status(&bound).await, TaskStatus::WaitingForNetworkChange);
        assert!(!h.scheduler.is_in_flight(&bound));
    }

    #[tokio::test]
    async fn disconnect_is_level_triggered_and_keeps_every_task() {
        let h = harness(ScriptedExecutor::new());
        let bound = h
            .add_waiting("bound", 0, WalletPrecondition::any_wallet().with_chain("POLYGON"))
            .await;
        let free = h.add_waiting("free", 1, WalletPrecondition::any_wallet()).await;

        let first = h.scheduler.on_wallet_disconnected().await;
        assert_eq!(first.reevaluated, vec![bound.clone(), free.clone()]);
        assert_eq!(first.changed, vec![bound.clone()]);
        assert_eq!(h.status(&bound).await, TaskStatus::WaitingForNetworkChange);
        assert_eq!(h.status(&free).await, TaskStatus::WaitingForWalletConnect);

        let second = h.scheduler.on_wallet_disconnected().await;
        assert_eq!(second.reevaluated, vec![bound.clone(), free.clone()]);
        assert!(second.changed.is_empty());
        assert_eq!(h.store.list().await.len(), 2);
        assert_eq!(h.count(EventKind::TaskUpdated, &bound), 1);
    }

    #[tokio::test]
    async fn eligible_tasks_resume_oldest_first() {
        let h = harness(ScriptedExecutor::new());
        let newest = h.add_waiting("c", 3, WalletPrecondition::any_wallet()).await;
        let oldest = h.add_waiting("a", 1, WalletPrecondition::any_wallet()).await;
        let middle = h.add_waiting("b", 2, WalletPrecondition::any_wallet()).await;

        let resumed = h.scheduler.on_wallet_connected("metamask", "ETHEREUM").await;

        assert_eq!(resumed, vec![oldest.clone(), middle.clone(), newest.clone()]);
        let order: Vec<TaskId> = h.executor.calls().into_iter().map(|(t, _)| t).collect();
        assert_eq!(order, vec![oldest, middle, newest]);
    }

    #[tokio::test]
    async fn retry_resumes_a_waiting_task() {
        let h = harness(ScriptedExecutor::new());
        let t = h
            .add_waiting("t1", 0, WalletPrecondition::connect_wallet("phantom"))
            .await;

        h.scheduler.retry_task(&t).await.unwrap();

        assert_eq!(h.status(&t).await, TaskStatus::Completed);
    }

    #[rstest]
    #[case::completed(StepOutcome::done(), TaskStatus::Completed)]
    #[case::failed(StepOutcome::error("slippage"), TaskStatus::Failed)]
    #[tokio::test]
    async fn terminal_tasks_are_not_resumable(
        #[case] outcome: StepOutcome,
        #[case] terminal: TaskStatus,
    ) {
        let h = harness(ScriptedExecutor::new().then(0, outcome));
        let t = h.add("t1", 0, &["swap"]).await;
        h.scheduler.start(&t).await.unwrap();
        let before = h.store.get(&t).await.unwrap();
        assert_eq!(before.status, terminal);

        let err = h.scheduler.retry_task(&t).await.unwrap_err();
        assert!(matches!(err, QueueError::TaskNotResumable { status, .. } if status == terminal));

        h.scheduler.on_wallet_connected("metamask", "POLYGON").await;
        h.scheduler.on_wallet_disconnected().await;
        assert_eq!(h.store.get(&t).await.unwrap(), before);
        assert_eq!(h.executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn retry_of_an_in_flight_task_is_rejected() {
        let h = harness(ScriptedExecutor::new());
        let t = h.add("t1", 0, &["swap"]).await;

        h.executor.gate(1);
        let scheduler = h.scheduler.clone();
        let id = t.clone();
        let run = tokio::spawn(async move { scheduler.start(&id).await });
        h.executor.entered.notified().await;

        let err = h.scheduler.retry_task(&t).await.unwrap_err();
        assert!(matches!(err, QueueError::TaskNotResumable { status: TaskStatus::Running, .. }));
        assert!(matches!(
            h.scheduler.remove(&t).await,
            Err(QueueError::TaskInFlight(_))
        ));

        h.executor.release.add_permits(1);
        run.await.unwrap().unwrap();
        assert_eq!(h.executor.calls_for(&t, 0), 1);
    }

    #[tokio::test]
    async fn step_error_fails_only_that_task() {
        let h = harness(ScriptedExecutor::new().then(0, StepOutcome::error("insufficient funds")));
        let bad = h.add("bad", 0, &["swap"]).await;
        let good = h.add("good", 1, &["swap"]).await;

        h.scheduler.start(&bad).await.unwrap();
        h.scheduler.start(&good).await.unwrap();

        let failed = h.store.get(&bad).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.last_error.unwrap().contains("insufficient funds"));
        assert_eq!(h.status(&good).await, TaskStatus::Completed);
        assert_eq!(h.count(EventKind::TaskFailed, &bad), 1);
    }

    #[tokio::test]
    async fn missing_executor_fails_the_task() {
        let h = harness(ScriptedExecutor::new());
        let task = Task::new(id("t1"), TaskSpec::new("bridge", &["lock"]), at(0));
        h.store.upsert(task).await.unwrap();

        h.scheduler.start(&id("t1")).await.unwrap();

        let failed = h.store.get(&id("t1")).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.last_error.unwrap().contains("bridge"));
        assert!(h.executor.calls().is_empty());
    }

    #[tokio::test]
    async fn resume_interrupted_skips_finished_steps() {
        let h = harness(ScriptedExecutor::new());
        let mut task = Task::new(id("t1"), TaskSpec::new("swap", &["approve", "swap"]), at(0));
        task.mark_running(at(1));
        task.complete_step(0, None, at(2));
        h.store.upsert(task).await.unwrap();
        let pending = h.add("t2", 5, &["swap"]).await;

        let resumed = h.scheduler.resume_interrupted().await;

        assert_eq!(resumed, vec![id("t1"), pending]);
        assert_eq!(h.executor.calls_for(&id("t1"), 0), 0);
        assert_eq!(h.executor.calls_for(&id("t1"), 1), 1);
        assert_eq!(h.status(&id("t1")).await, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn storage_failure_is_reported_and_the_task_still_advances() {
        let h = harness(ScriptedExecutor::new());
        let t = h.add("t1", 0, &["swap"]).await;
        h.storage.set_unavailable(true).await;

        h.scheduler.start(&t).await.unwrap();

        assert_eq!(h.status(&t).await, TaskStatus::Completed);
        assert!(!h.diagnostics.reports().is_empty());
    }

    #[tokio::test]
    async fn start_refuses_a_task_that_is_not_pending() {
        let h = harness(ScriptedExecutor::new());
        let t = h.add_waiting("t1", 0, WalletPrecondition::any_wallet()).await;

        let err = h.scheduler.start(&t).await.unwrap_err();
        assert!(matches!(err, QueueError::TaskNotResumable { .. }));
        assert!(matches!(
            h.scheduler.start(&id("missing")).await,
            Err(QueueError::TaskNotFound(_))
        ));
    }
}
