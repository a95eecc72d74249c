//! Domain model (ids, tasks, outcomes, signals, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod migration;
pub mod outcome;
pub mod signal;
pub mod state;
pub mod task;

pub use errors::{
    ConnectError, InitError, MigrationEntryError, QueueError, StepExecutionError, StorageError,
};
pub use events::{EventKind, QueueEvent};
pub use ids::{SubscriptionId, TaskId};
pub use migration::{MigrationRecord, MigrationReport};
pub use outcome::{StepOutcome, WalletPrecondition};
pub use signal::{SignalKind, WalletSignal};
pub use state::{QueueCounts, TaskStatus};
pub use task::{Step, Task, TaskSpec};
