//! DiagnosticsSink port - 致命的でない失敗の報告先
//!
//! 移行エントリの不正や、イベントハンドラの失敗はここへ報告され、
//! スケジューラには伝播しません。

/// Receives non-fatal failures.
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, message: &str, context: serde_json::Value);
}
