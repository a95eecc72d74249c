//! Test doubles shared by the unit tests of several modules.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use crate::domain::{ConnectError, EventKind, QueueEvent, StepOutcome, Task, TaskId, TaskStatus};
use crate::events::EventBus;
use crate::ports::{StepExecutor, WalletCollaborator, WalletState};
use crate::queue::TaskStore;

/// Executor driven by a per-step script. Unscripted calls return `Done`.
///
/// `gate(n)` makes the next `n` calls park until `release` is given permits,
/// signalling `entered` when they arrive.
pub struct ScriptedExecutor {
    script: Mutex<HashMap<usize, VecDeque<StepOutcome>>>,
    calls: Mutex<Vec<(TaskId, usize)>>,
    gated: AtomicUsize,
    pub entered: Notify,
    pub release: Semaphore,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            gated: AtomicUsize::new(0),
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }

    pub fn then(self, step: usize, outcome: StepOutcome) -> Self {
        self.push(step, outcome);
        self
    }

    pub fn push(&self, step: usize, outcome: StepOutcome) {
        self.script
            .lock()
            .unwrap()
            .entry(step)
            .or_default()
            .push_back(outcome);
    }

    pub fn gate(&self, calls: usize) {
        self.gated.store(calls, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(TaskId, usize)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, id: &TaskId, step: usize) -> usize {
        self.calls()
            .iter()
            .filter(|(t, s)| t == id && *s == step)
            .count()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, task: &Task, step_index: usize) -> StepOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((task.id.clone(), step_index));

        let gated = self
            .gated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if gated {
            self.entered.notify_one();
            self.release.acquire().await.unwrap().forget();
        }

        self.script
            .lock()
            .unwrap()
            .get_mut(&step_index)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(StepOutcome::done)
    }
}

/// In-memory wallet collaborator.
#[derive(Default)]
pub struct FakeWallet {
    states: Mutex<HashMap<String, WalletState>>,
    failures: Mutex<HashMap<String, ConnectError>>,
    switchable: Mutex<HashSet<(String, String)>>,
    pub connects: Mutex<Vec<(String, Option<String>)>>,
    pub disconnects: Mutex<Vec<String>>,
}

impl FakeWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&self, wallet_type: &str, state: WalletState) {
        self.states
            .lock()
            .unwrap()
            .insert(wallet_type.to_string(), state);
    }

    pub fn fail_next_connect(&self, wallet_type: &str, error: ConnectError) {
        self.failures
            .lock()
            .unwrap()
            .insert(wallet_type.to_string(), error);
    }

    pub fn allow_switch(&self, wallet_type: &str, chain: &str) {
        self.switchable
            .lock()
            .unwrap()
            .insert((wallet_type.to_string(), chain.to_string()));
    }
}

#[async_trait]
impl WalletCollaborator for FakeWallet {
    fn current_state(&self, wallet_type: &str) -> WalletState {
        self.states
            .lock()
            .unwrap()
            .get(wallet_type)
            .copied()
            .unwrap_or(WalletState {
                connected: false,
                installed: true,
                connecting: false,
            })
    }

    async fn connect(&self, wallet_type: &str, chain: Option<&str>) -> Result<(), ConnectError> {
        self.connects
            .lock()
            .unwrap()
            .push((wallet_type.to_string(), chain.map(str::to_string)));
        if let Some(e) = self.failures.lock().unwrap().remove(wallet_type) {
            return Err(e);
        }
        self.set_state(
            wallet_type,
            WalletState {
                connected: true,
                installed: true,
                connecting: false,
            },
        );
        Ok(())
    }

    async fn disconnect(&self, wallet_type: &str) {
        self.disconnects
            .lock()
            .unwrap()
            .push(wallet_type.to_string());
        self.set_state(
            wallet_type,
            WalletState {
                connected: false,
                installed: true,
                connecting: false,
            },
        );
    }

    fn can_switch_network(&self, wallet_type: &str, chain: &str) -> bool {
        self.switchable
            .lock()
            .unwrap()
            .contains(&(wallet_type.to_string(), chain.to_string()))
    }
}

/// Records every task event as `(kind, task id, status)`.
pub fn record_events(bus: &EventBus) -> Arc<Mutex<Vec<(EventKind, TaskId, TaskStatus)>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        EventKind::TaskCreated,
        EventKind::TaskUpdated,
        EventKind::TaskCompleted,
        EventKind::TaskFailed,
    ] {
        let log = log.clone();
        bus.subscribe(kind, move |event: &QueueEvent| {
            if let Some(task) = event.task() {
                log.lock()
                    .unwrap()
                    .push((event.kind(), task.id.clone(), task.status));
            }
            Ok(())
        });
    }
    log
}

/// Poll the store until the task reaches `status` (background drives).
pub async fn wait_for_status(store: &TaskStore, id: &TaskId, status: TaskStatus) -> Task {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(task) = store.get(id).await
                && task.status == status
            {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("task {id} never reached {status}"))
}
