//! Legacy swap records (the old single-blob storage shape).
//!
//! Only the fields needed to build a finished task are typed; everything else
//! in an entry is kept verbatim as the task payload.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::domain::{MigrationEntryError, Step, Task, TaskId, TaskStatus};

pub const LEGACY_TASK_TYPE: &str = "legacy-swap";

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LegacyTimestamp {
    Millis(i64),
    Text(String),
}

impl LegacyTimestamp {
    fn parse(&self) -> Option<DateTime<Utc>> {
        match self {
            LegacyTimestamp::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            LegacyTimestamp::Text(s) => {
                let s = s.trim();
                if let Ok(ms) = s.parse::<i64>() {
                    return Utc.timestamp_millis_opt(ms).single();
                }
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySwap {
    pub request_id: String,
    pub status: String,
    #[serde(default)]
    pub creation_time: Option<LegacyTimestamp>,
    #[serde(default)]
    pub finish_time: Option<LegacyTimestamp>,
    #[serde(default)]
    pub steps: Vec<serde_json::Value>,
    #[serde(default)]
    pub extra_message: Option<String>,
}

fn entry_error(index: usize, request_id: Option<&str>, reason: impl Into<String>) -> MigrationEntryError {
    MigrationEntryError {
        index,
        request_id: request_id.map(str::to_string),
        reason: reason.into(),
    }
}

/// Convert one legacy entry into a finished task.
///
/// Legacy swaps are always history: `success` becomes `COMPLETED`, anything
/// else `FAILED`. `now` is used when the entry has no creation time.
pub fn convert_entry(
    index: usize,
    entry: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<Task, MigrationEntryError> {
    let raw_id = entry.get("requestId").and_then(|v| v.as_str()).map(str::to_string);
    let swap: LegacySwap = serde_json::from_value(entry.clone())
        .map_err(|e| entry_error(index, raw_id.as_deref(), e.to_string()))?;

    let id = TaskId::from_external(&swap.request_id)
        .ok_or_else(|| entry_error(index, None, "blank requestId"))?;

    let created_at = match &swap.creation_time {
        None => now,
        Some(ts) => ts.parse().ok_or_else(|| {
            entry_error(index, Some(id.as_str()), format!("invalid creationTime {ts:?}"))
        })?,
    };
    let updated_at = swap
        .finish_time
        .as_ref()
        .and_then(LegacyTimestamp::parse)
        .unwrap_or(created_at);

    let (status, last_error) = match swap.status.as_str() {
        "success" => (TaskStatus::Completed, None),
        "failed" => (
            TaskStatus::Failed,
            Some(swap.extra_message.clone().unwrap_or_else(|| "swap failed".to_string())),
        ),
        other => (
            TaskStatus::Failed,
            Some(format!("interrupted before migration (legacy status={other})")),
        ),
    };

    let steps = swap
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| Step {
            name: step
                .get("id")
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| format!("step-{i}")),
            done: step.get("status").and_then(|s| s.as_str()) == Some("success"),
            result: Some(step.clone()),
        })
        .collect();

    Ok(Task {
        id,
        task_type: LEGACY_TASK_TYPE.to_string(),
        status,
        required_chain: None,
        required_wallet_type: None,
        steps,
        payload: entry,
        created_at,
        updated_at,
        last_error,
    })
}
