//! QueueManagerBuilder - キューのワイヤリング
//!
//! # Fail-fast 設計
//! - register_executor() で task_type ごとの executor を登録（二重登録はエラー）
//! - expect_task_types() で必要な task_type を宣言
//! - build() 時に「期待集合 ⊆ 登録済み集合」をチェックし、不足があれば BuildError
//!
//! build() はまだ何も起動しません。ストレージ確認・移行・ロードは
//! `QueueManager::init` が行います。
//!
//! InitContext（移行ラッチ）は new() の必須引数です。プロセス内の全 builder に
//! 同じ Arc を渡してください。暗黙のデフォルトは作りません。

use std::sync::Arc;

use crate::config::{QueueConfig, StorageBackend};
use crate::events::{EventBus, EventSubscriptions};
use crate::impls::{FileStorage, InMemoryStorage, TracingDiagnostics};
use crate::migration::InitContext;
use crate::ports::{
    Clock, DiagnosticsSink, IdGenerator, LEGACY_SWAPS_KEY, StepExecutor, StorageAdapter,
    SystemClock, UlidGenerator, WalletCollaborator,
};
use crate::scheduler::{ExecutorRegistry, RegistryError};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These task types were expected but have no executor.")]
    MissingTaskTypes(Vec<String>),

    #[error("storage backend \"file\" needs a directory")]
    MissingStorageDir,
}

/// QueueManagerBuilder は QueueSetup を構築
///
/// # 使用例
/// ```ignore
/// let ctx = InitContext::new();
/// let setup = QueueManagerBuilder::new(ctx.clone())
///     .register_executor("evm-swap", EvmSwapExecutor)?
///     .expect_task_types(&["evm-swap"])
///     .storage(Arc::new(FileStorage::new("/var/lib/swapq")))
///     .build()?;
/// let manager = QueueManager::init(setup).await?;
/// ```
pub struct QueueManagerBuilder {
    executors: ExecutorRegistry,
    expected_types: Option<Vec<String>>,
    storage: Option<Arc<dyn StorageAdapter>>,
    wallets: Option<Arc<dyn WalletCollaborator>>,
    diagnostics: Option<Arc<dyn DiagnosticsSink>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    init_context: Arc<InitContext>,
    migration_enabled: bool,
    resume_on_init: bool,
    legacy_key: String,
}

impl QueueManagerBuilder {
    /// `ctx` must be shared by every builder of the process.
    pub fn new(ctx: Arc<InitContext>) -> Self {
        Self {
            executors: ExecutorRegistry::new(),
            expected_types: None,
            storage: None,
            wallets: None,
            diagnostics: None,
            clock: None,
            ids: None,
            init_context: ctx,
            migration_enabled: true,
            resume_on_init: true,
            legacy_key: LEGACY_SWAPS_KEY.to_string(),
        }
    }

    /// Storage backend and migration switch from a loaded config.
    pub fn from_config(config: &QueueConfig, ctx: Arc<InitContext>) -> Result<Self, BuildError> {
        let storage: Arc<dyn StorageAdapter> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(InMemoryStorage::new()),
            StorageBackend::File => {
                let dir = config
                    .storage
                    .dir
                    .clone()
                    .ok_or(BuildError::MissingStorageDir)?;
                Arc::new(FileStorage::new(dir))
            }
        };
        Ok(Self::new(ctx)
            .storage(storage)
            .migration(config.migration.enabled))
    }

    pub fn register_executor<E: StepExecutor + 'static>(
        mut self,
        task_type: impl Into<String>,
        executor: E,
    ) -> Result<Self, RegistryError> {
        self.executors.register(task_type, executor)?;
        Ok(self)
    }

    pub fn register_executor_arc(
        mut self,
        task_type: impl Into<String>,
        executor: Arc<dyn StepExecutor>,
    ) -> Result<Self, RegistryError> {
        self.executors.register_arc(task_type, executor)?;
        Ok(self)
    }

    pub fn expect_task_types(mut self, task_types: &[&str]) -> Self {
        self.expected_types = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn wallets(mut self, wallets: Arc<dyn WalletCollaborator>) -> Self {
        self.wallets = Some(wallets);
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn migration(mut self, enabled: bool) -> Self {
        self.migration_enabled = enabled;
        self
    }

    /// Restart interrupted tasks right after `init` (default). Read-only
    /// tools turn this off.
    pub fn resume_on_init(mut self, enabled: bool) -> Self {
        self.resume_on_init = enabled;
        self
    }

    pub fn legacy_key(mut self, key: impl Into<String>) -> Self {
        self.legacy_key = key.into();
        self
    }

    pub fn build(self) -> Result<QueueSetup, BuildError> {
        if let Some(expected) = &self.expected_types {
            let registered = self.executors.registered_types();
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !registered.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }

        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(TracingDiagnostics));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let events = Arc::new(EventBus::new(diagnostics.clone()));

        Ok(QueueSetup {
            executors: self.executors,
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(InMemoryStorage::new())),
            wallets: self.wallets,
            diagnostics,
            clock,
            ids,
            events,
            init_context: self.init_context,
            migration_enabled: self.migration_enabled,
            resume_on_init: self.resume_on_init,
            legacy_key: self.legacy_key,
        })
    }
}

/// Validated wiring, not started yet. Hand it to `QueueManager::init`.
pub struct QueueSetup {
    pub(crate) executors: ExecutorRegistry,
    pub(crate) storage: Arc<dyn StorageAdapter>,
    pub(crate) wallets: Option<Arc<dyn WalletCollaborator>>,
    pub(crate) diagnostics: Arc<dyn DiagnosticsSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) init_context: Arc<InitContext>,
    pub(crate) migration_enabled: bool,
    pub(crate) resume_on_init: bool,
    pub(crate) legacy_key: String,
}

impl QueueSetup {
    /// Subscribe before `init` to observe the `migrationFinished` event.
    pub fn events(&self) -> EventSubscriptions {
        EventSubscriptions::new(self.events.clone())
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.executors.registered_types()
    }
}
