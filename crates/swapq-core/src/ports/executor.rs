//! StepExecutor port - タスク種別ごとのステップ実行（外部コラボレータ）
//!
//! スケジューラは executor の中身を知りません。
//! 「次の未完了ステップを呼ぶ → 結果を解釈 → 状態更新 → イベント発行」までが責務です。

use async_trait::async_trait;

use crate::domain::{StepOutcome, Task};

/// Executes one step of a task.
///
/// # 使用例
/// ```ignore
/// struct EvmSwap;
///
/// #[async_trait]
/// impl StepExecutor for EvmSwap {
///     async fn execute(&self, task: &Task, step_index: usize) -> StepOutcome {
///         StepOutcome::done()
///     }
/// }
/// ```
///
/// A step that is re-attempted after a resume (or after a reload that
/// interrupted it) is called again with the same `step_index`, so executors
/// should be safe to call twice for an unfinished step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, task: &Task, step_index: usize) -> StepOutcome;
}
