//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStorage**: 開発・テスト用のストレージ
//! - **FileStorage**: ディレクトリベースの永続ストレージ
//! - **TracingDiagnostics / RecordingDiagnostics**: 診断の出力先

pub mod diagnostics;
pub mod file_storage;
pub mod memory_storage;

pub use self::diagnostics::{DiagnosticReport, RecordingDiagnostics, TracingDiagnostics};
pub use self::file_storage::FileStorage;
pub use self::memory_storage::InMemoryStorage;
