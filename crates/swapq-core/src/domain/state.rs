//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a queued task.
///
/// State transitions:
/// - Pending -> Running
/// - Running -> Running (advance to the next step)
/// - Running -> Completed / Failed
/// - Running -> WaitingForWalletConnect / WaitingForNetworkChange
/// - Waiting* -> Running (resume, same step)
/// - Waiting* -> WaitingForNetworkChange (re-evaluated on disconnect)
///
/// Serialized as SCREAMING_SNAKE_CASE (`WAITING_FOR_WALLET_CONNECT`, ...) so the
/// persisted records read the same as the status names the UI shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Enqueued, never started.
    Pending,

    /// A step is being executed (or about to be).
    Running,

    /// Parked until a (specific) wallet is connected.
    WaitingForWalletConnect,

    /// Parked until a wallet is connected to the required network.
    WaitingForNetworkChange,

    /// All steps done.
    Completed,

    /// A step reported an unrecoverable error.
    Failed,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Is this task parked on a wallet precondition?
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            TaskStatus::WaitingForWalletConnect | TaskStatus::WaitingForNetworkChange
        )
    }

    /// Can `retry_task` pick this task up?
    pub fn is_resumable(self) -> bool {
        matches!(self, TaskStatus::Pending) || self.is_waiting()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::WaitingForWalletConnect => "WAITING_FOR_WALLET_CONNECT",
            TaskStatus::WaitingForNetworkChange => "WAITING_FOR_NETWORK_CHANGE",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Per-status counts, for status views.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
    pub waiting_for_wallet_connect: usize,
    pub waiting_for_network_change: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub(crate) fn add(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::WaitingForWalletConnect => self.waiting_for_wallet_connect += 1,
            TaskStatus::WaitingForNetworkChange => self.waiting_for_network_change += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }
}
