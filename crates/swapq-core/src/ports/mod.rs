//! Ports - 抽象化レイヤー
//!
//! 外部コラボレータ（ストレージ、ウォレット、ステップ実行、診断）への
//! インターフェースを定義し、実装の詳細を隠蔽します。

pub mod clock;
pub mod diagnostics;
pub mod executor;
pub mod id_generator;
pub mod storage;
pub mod wallet;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::diagnostics::DiagnosticsSink;
pub use self::executor::StepExecutor;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::storage::{LEGACY_SWAPS_KEY, MIGRATION_KEY, StorageAdapter, TASKS_PREFIX, task_key};
pub use self::wallet::{WalletCollaborator, WalletState};
