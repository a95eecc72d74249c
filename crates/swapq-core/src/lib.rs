//! swapq-core
//!
//! 永続化されたスワップ／送金タスクのキュー。
//! ウォレット接続やネットワーク切り替え待ちで止まったタスクを、リロードを跨いで
//! 完了まで進めます。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, outcome, signal, events, errors, migration）
//! - **ports**: 抽象化レイヤー（StorageAdapter, StepExecutor, WalletCollaborator, DiagnosticsSink, Clock, IdGenerator）
//! - **impls**: ports の実装（InMemoryStorage, FileStorage, TracingDiagnostics）
//! - **queue**: TaskStore（メモリ上の正本 + write-through）
//! - **migration**: レガシー blob からの一度きりの移行
//! - **events**: イベントバスと公開用の購読 API
//! - **scheduler**: 状態機械・再開ロジック・executor の登録
//! - **app**: QueueManagerBuilder, QueueManager, WalletSession
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod events;
pub mod impls;
pub mod migration;
pub mod ports;
pub mod queue;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{QueueManager, QueueManagerBuilder, WalletSession};
pub use config::QueueConfig;
