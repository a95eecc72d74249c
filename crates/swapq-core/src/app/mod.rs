//! App - アプリケーション層
//!
//! ports / store / scheduler / migration を組み合わせて公開 API を提供します。
//!
//! # 主要コンポーネント
//! - **QueueManagerBuilder**: ワイヤリングと起動時検証（fail-fast）
//! - **QueueManager**: 起動バリア付きのキュー本体
//! - **WalletSession**: ウォレット操作とスケジューラへの信号転送

pub mod builder;
pub mod manager;
pub mod wallet_session;

pub use self::builder::{BuildError, QueueManagerBuilder, QueueSetup};
pub use self::manager::QueueManager;
pub use self::wallet_session::{ToggleOutcome, WalletSession};
