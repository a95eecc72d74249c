//! DiagnosticsSink の実装
//!
//! - TracingDiagnostics: `tracing::warn!` に流す（デフォルト）
//! - RecordingDiagnostics: 報告をメモリに溜める（テスト・埋め込み UI 用）

use std::sync::Mutex;

use crate::ports::DiagnosticsSink;

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn report(&self, message: &str, context: serde_json::Value) {
        tracing::warn!(%context, "{message}");
    }
}

/// One report captured by `RecordingDiagnostics`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticReport {
    pub message: String,
    pub context: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    reports: Mutex<Vec<DiagnosticReport>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<DiagnosticReport> {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl DiagnosticsSink for RecordingDiagnostics {
    fn report(&self, message: &str, context: serde_json::Value) {
        tracing::debug!(%context, "diagnostic: {message}");
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(DiagnosticReport {
                message: message.to_string(),
                context,
            });
    }
}
