//! QueueConfig - TOML 設定の読み込み
//!
//! 優先順位（高い順）:
//! 1. 環境変数 `SWAPQ_STORAGE_DIR`
//! 2. 設定ファイル
//! 3. デフォルト値（セクションごとに省略可能）

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const STORAGE_DIR_ENV: &str = "SWAPQ_STORAGE_DIR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("storage backend \"file\" needs [storage] dir")]
    MissingStorageDir,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub enabled: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletsConfig {
    /// Allow more than one wallet connected at a time.
    pub multi_wallets: bool,
}

impl Default for WalletsConfig {
    fn default() -> Self {
        Self {
            multi_wallets: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub storage: StorageConfig,
    pub migration: MigrationConfig,
    pub wallets: WalletsConfig,
    pub logging: LoggingConfig,
}

impl QueueConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: QueueConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read `path` and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg: QueueConfig = toml::from_str(&s)?;
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Self {
        let mut cfg = QueueConfig::default();
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg
    }

    /// A non-blank `SWAPQ_STORAGE_DIR` selects the file backend at that path.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(STORAGE_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            self.storage.backend = StorageBackend::File;
            self.storage.dir = Some(PathBuf::from(dir.trim()));
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.backend == StorageBackend::File && self.storage.dir.is_none() {
            return Err(ConfigError::MissingStorageDir);
        }
        Ok(())
    }
}
