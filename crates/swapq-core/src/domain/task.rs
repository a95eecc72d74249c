//! Task record: one swap/transfer request and its ordered steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;
use super::outcome::WalletPrecondition;
use super::state::TaskStatus;

/// One step of a task. Steps run strictly in order and never re-run once `done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            result: None,
        }
    }
}

/// What a caller hands to `enqueue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Selects the step executor.
    pub task_type: String,

    /// Step names, in execution order.
    pub steps: Vec<String>,

    /// Opaque swap request handed to the executor.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Wallet family that must sign, if any.
    #[serde(default)]
    pub required_wallet_type: Option<String>,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<String>, steps: &[&str]) -> Self {
        Self {
            task_type: task_type.into(),
            steps: steps.iter().map(|s| s.to_string()).collect(),
            payload: serde_json::Value::Null,
            required_wallet_type: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_wallet_type(mut self, wallet_type: impl Into<String>) -> Self {
        self.required_wallet_type = Some(wallet_type.into());
        self
    }
}

/// A queued task.
///
/// Design:
/// - This is the persisted shape (`tasks/{id}`), serialized as JSON.
/// - State transitions happen through the methods below, never by poking
///   `status` from the outside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub status: TaskStatus,

    /// Network the next step depends on (None when not blocked).
    #[serde(default)]
    pub required_chain: Option<String>,

    #[serde(default)]
    pub required_wallet_type: Option<String>,

    pub steps: Vec<Step>,

    #[serde(default)]
    pub payload: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub last_error: Option<String>,
}

impl Task {
    pub fn new(id: TaskId, spec: TaskSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            task_type: spec.task_type,
            status: TaskStatus::Pending,
            required_chain: None,
            required_wallet_type: spec.required_wallet_type,
            steps: spec.steps.into_iter().map(Step::new).collect(),
            payload: spec.payload,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    /// Index of the first unfinished step.
    pub fn current_step(&self) -> Option<usize> {
        self.steps.iter().position(|s| !s.done)
    }

    pub fn all_steps_done(&self) -> bool {
        self.current_step().is_none()
    }

    /// Pending / Waiting* -> Running. A running task is not blocked on any chain.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.required_chain = None;
        self.updated_at = now;
    }

    /// Record a finished step. The successful step clears `last_error`.
    pub fn complete_step(
        &mut self,
        index: usize,
        result: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) {
        if let Some(step) = self.steps.get_mut(index) {
            step.done = true;
            step.result = result;
        }
        self.last_error = None;
        self.required_chain = None;
        self.updated_at = now;
    }

    /// Park the task on a wallet precondition.
    pub fn park(&mut self, precondition: &WalletPrecondition, now: DateTime<Utc>) {
        self.status = match precondition {
            WalletPrecondition::ConnectWallet { .. } => TaskStatus::WaitingForWalletConnect,
            WalletPrecondition::ChangeNetwork { .. } => TaskStatus::WaitingForNetworkChange,
        };
        self.required_chain = precondition.chain().map(str::to_string);
        if let Some(wallet) = precondition.wallet_type() {
            self.required_wallet_type = Some(wallet.to_string());
        }
        self.updated_at = now;
    }

    /// Re-derive the waiting state after a wallet disconnect: a task that
    /// depends on a network waits for that network. Returns `true` when the
    /// status changed.
    pub fn rederive_wait(&mut self, now: DateTime<Utc>) -> bool {
        if !self.status.is_waiting() {
            return false;
        }
        let target = if self.required_chain.is_some() {
            TaskStatus::WaitingForNetworkChange
        } else {
            TaskStatus::WaitingForWalletConnect
        };
        if target == self.status {
            return false;
        }
        self.status = target;
        self.updated_at = now;
        true
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.required_chain = None;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.required_chain = None;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// What the UI should prompt for, when parked.
    pub fn waiting_for(&self) -> Option<WalletPrecondition> {
        match self.status {
            TaskStatus::WaitingForWalletConnect => Some(WalletPrecondition::ConnectWallet {
                wallet_type: self.required_wallet_type.clone(),
                chain: self.required_chain.clone(),
            }),
            TaskStatus::WaitingForNetworkChange => {
                self.required_chain
                    .clone()
                    .map(|chain| WalletPrecondition::ChangeNetwork {
                        chain,
                        wallet_type: self.required_wallet_type.clone(),
                    })
            }
            _ => None,
        }
    }
}
