//! ExecutorRegistry - task_type ごとの StepExecutor の登録と管理
//!
//! - task_type（文字列）→ `Arc<dyn StepExecutor>` の HashMap
//! - 二重登録はエラー（起動時に気付けるように）
//! - 未登録の task_type は `get` が None を返し、スケジューラ側でタスクを FAILED にする

use std::collections::HashMap;
use std::sync::Arc;

use crate::ports::StepExecutor;

/// ExecutorRegistry は task_type ごとの executor を保持
///
/// # 使用例
/// ```ignore
/// let mut registry = ExecutorRegistry::new();
/// registry.register("evm-swap", EvmSwapExecutor)?;
///
/// let executor = registry.get("evm-swap");
/// ```
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("executor for task type '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: StepExecutor + 'static>(
        &mut self,
        task_type: impl Into<String>,
        executor: E,
    ) -> Result<(), RegistryError> {
        self.register_arc(task_type, Arc::new(executor))
    }

    /// Register an executor that is shared with other owners.
    pub fn register_arc(
        &mut self,
        task_type: impl Into<String>,
        executor: Arc<dyn StepExecutor>,
    ) -> Result<(), RegistryError> {
        let task_type = task_type.into();
        if self.executors.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        self.executors.insert(task_type, executor);
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(task_type).cloned()
    }

    /// Registered task types, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedExecutor;

    #[test]
    fn register_and_get() {
        let mut registry = ExecutorRegistry::new();
        registry.register("swap", ScriptedExecutor::new()).unwrap();

        assert!(registry.get("swap").is_some());
        assert!(registry.get("bridge").is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = ExecutorRegistry::new();
        registry.register("swap", ScriptedExecutor::new()).unwrap();
        let result = registry.register("swap", ScriptedExecutor::new());

        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(t)) if t == "swap"));
    }

    #[test]
    fn registered_types_are_sorted() {
        let mut registry = ExecutorRegistry::new();
        registry.register("transfer", ScriptedExecutor::new()).unwrap();
        registry.register("bridge", ScriptedExecutor::new()).unwrap();

        assert_eq!(registry.registered_types(), vec!["bridge", "transfer"]);
    }
}
