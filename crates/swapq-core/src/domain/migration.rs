//! MigrationRecord / MigrationReport - 移行の永続フラグと結果

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::MigrationEntryError;

/// Persisted at `meta/migration`. Created on the first migration attempt and
/// never deleted; once `done` it is never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub done: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub migrated: usize,
    #[serde(default)]
    pub skipped: usize,
}

impl MigrationRecord {
    pub fn completed(at: DateTime<Utc>, migrated: usize, skipped: usize) -> Self {
        Self {
            done: true,
            completed_at: Some(at),
            migrated,
            skipped,
        }
    }
}

/// What one migration run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Tasks written to the store.
    pub migrated: usize,
    /// Entries whose id already existed in the store.
    pub already_present: usize,
    /// Malformed entries, one per skipped record.
    pub errors: Vec<MigrationEntryError>,
    /// True when this run found the record already `done` and did nothing.
    pub was_already_done: bool,
}
