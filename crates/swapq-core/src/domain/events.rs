//! Events - キュー／タスクのライフサイクルイベント

use super::migration::MigrationReport;
use super::task::Task;

/// Event kinds a subscriber can listen to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskCompleted,
    TaskFailed,
    MigrationFinished,
}

/// Emitted on the event bus. Task events carry a snapshot of the task after
/// the transition.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    TaskCreated(Task),
    TaskUpdated(Task),
    TaskCompleted(Task),
    TaskFailed(Task),
    MigrationFinished(MigrationReport),
}

impl QueueEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            QueueEvent::TaskCreated(_) => EventKind::TaskCreated,
            QueueEvent::TaskUpdated(_) => EventKind::TaskUpdated,
            QueueEvent::TaskCompleted(_) => EventKind::TaskCompleted,
            QueueEvent::TaskFailed(_) => EventKind::TaskFailed,
            QueueEvent::MigrationFinished(_) => EventKind::MigrationFinished,
        }
    }

    pub fn task(&self) -> Option<&Task> {
        match self {
            QueueEvent::TaskCreated(t)
            | QueueEvent::TaskUpdated(t)
            | QueueEvent::TaskCompleted(t)
            | QueueEvent::TaskFailed(t) => Some(t),
            QueueEvent::MigrationFinished(_) => None,
        }
    }
}
