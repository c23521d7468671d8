//! Completed-transfer history
//!
//! Sessions emit a `HistoryEntry` when they finish; the CLI appends it to
//! `transfer-records.json`. Newest entries come first and the file is capped.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ferry_common::protocol::Direction;

#[cfg(unix)]
use super::checkpoint::set_private_permissions;
use crate::constants::{APP_DIR_NAME, HISTORY_FILE_NAME, MAX_HISTORY_ENTRIES};

/// How a transfer ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Failed,
    Cancelled,
}

/// One finished transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub direction: Direction,
    pub file_name: String,
    pub file_size: u64,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_path: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    records: Vec<HistoryEntry>,
}

/// History file access
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    records: Vec<HistoryEntry>,
}

impl HistoryStore {
    /// Platform-specific history file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(HISTORY_FILE_NAME))
    }

    /// Load the history, or start empty if the file is missing or unreadable
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut records = Vec::new();
        if path.exists()
            && let Ok(contents) = fs::read_to_string(&path)
            && let Ok(file) = serde_json::from_str::<HistoryFile>(&contents)
        {
            records = file.records;
        }
        Self { path, records }
    }

    /// Newest first
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.records
    }

    /// Record a finished transfer and save
    pub fn append(&mut self, entry: HistoryEntry) -> Result<(), String> {
        self.records.insert(0, entry);
        self.records.truncate(MAX_HISTORY_ENTRIES);
        self.save()
    }

    pub fn clear(&mut self) -> Result<(), String> {
        self.records.clear();
        self.save()
    }

    fn save(&self) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
        }

        let file = HistoryFile {
            records: self.records.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| format!("failed to serialize history: {e}"))?;
        fs::write(&self.path, json)
            .map_err(|e| format!("failed to write {}: {e}", self.path.display()))?;

        #[cfg(unix)]
        set_private_permissions(&self.path)
            .map_err(|e| format!("failed to set permissions on {}: {e}", self.path.display()))?;

        Ok(())
    }
}
