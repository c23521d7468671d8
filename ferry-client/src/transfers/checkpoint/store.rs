//! Durable resume checkpoints
//!
//! Checkpoints live in `transfer-progress.json` next to `config.json`.
//! Entries older than the cache lifetime count as absent and are purged on
//! the next write.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ferry_common::protocol::Direction;

#[cfg(unix)]
use crate::constants::PRIVATE_FILE_MODE;
use crate::constants::{APP_DIR_NAME, CHECKPOINTS_FILE_NAME};

/// Checkpoint persistence failures (logged, never fatal to a transfer)
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize checkpoints: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Last durable position of one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeCheckpoint {
    pub transfer_id: String,
    pub room_id: String,
    pub direction: Direction,
    pub file_name: String,
    pub file_size: u64,
    /// Chunks known to be delivered; the resume point
    pub chunk_index: u64,
    pub total_chunks: u64,
    /// Chunk size the indices refer to
    #[serde(default)]
    pub chunk_size: u64,
    /// Sender's source file, so a restarted sender can reopen it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    pub last_updated: DateTime<Utc>,
}

/// Persistent checkpoints file structure
#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckpointsFile {
    checkpoints: Vec<ResumeCheckpoint>,
}

/// Checkpoints keyed by transfer id
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    lifetime: chrono::Duration,
    checkpoints: HashMap<String, ResumeCheckpoint>,
}

impl CheckpointStore {
    /// Platform-specific checkpoints file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CHECKPOINTS_FILE_NAME))
    }

    /// Open the store at `path`, starting empty if the file is missing or unreadable
    pub fn open(path: impl Into<PathBuf>, lifetime: Duration) -> Self {
        let path = path.into();
        let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::MAX);

        let mut checkpoints = HashMap::new();
        if path.exists()
            && let Ok(contents) = fs::read_to_string(&path)
            && let Ok(file) = serde_json::from_str::<CheckpointsFile>(&contents)
        {
            checkpoints = file
                .checkpoints
                .into_iter()
                .map(|c| (c.transfer_id.clone(), c))
                .collect();
        }

        Self {
            path,
            lifetime,
            checkpoints,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upsert a checkpoint and purge expired entries
    pub fn save(&mut self, checkpoint: ResumeCheckpoint) -> Result<(), CheckpointError> {
        self.checkpoints
            .insert(checkpoint.transfer_id.clone(), checkpoint);
        self.purge_expired(Utc::now());
        self.write()
    }

    /// The checkpoint for `transfer_id`, unless missing or expired
    pub fn load(&self, transfer_id: &str) -> Option<ResumeCheckpoint> {
        let now = Utc::now();
        self.checkpoints
            .get(transfer_id)
            .filter(|c| !self.is_expired(c, now))
            .cloned()
    }

    /// Remove one checkpoint; returns whether it existed
    pub fn clear(&mut self, transfer_id: &str) -> Result<bool, CheckpointError> {
        if self.checkpoints.remove(transfer_id).is_none() {
            return Ok(false);
        }
        self.write()?;
        Ok(true)
    }

    /// Remove every checkpoint
    pub fn clear_all(&mut self) -> Result<(), CheckpointError> {
        self.checkpoints.clear();
        self.write()
    }

    /// Live checkpoints, most recently updated first
    pub fn list(&self) -> Vec<ResumeCheckpoint> {
        let now = Utc::now();
        let mut live: Vec<ResumeCheckpoint> = self
            .checkpoints
            .values()
            .filter(|c| !self.is_expired(c, now))
            .cloned()
            .collect();
        live.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        live
    }

    /// Most recent live checkpoint for sending this file
    pub fn find_for_file(&self, file_name: &str, file_size: u64) -> Option<ResumeCheckpoint> {
        self.list().into_iter().find(|c| {
            c.direction == Direction::Send && c.file_name == file_name && c.file_size == file_size
        })
    }

    /// Most recent live checkpoint for receiving in this room
    pub fn find_for_room(&self, room_id: &str) -> Option<ResumeCheckpoint> {
        self.list()
            .into_iter()
            .find(|c| c.direction == Direction::Receive && c.room_id.eq_ignore_ascii_case(room_id))
    }

    fn is_expired(&self, checkpoint: &ResumeCheckpoint, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(checkpoint.last_updated) > self.lifetime
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) {
        let lifetime = self.lifetime;
        self.checkpoints
            .retain(|_, c| now.signed_duration_since(c.last_updated) <= lifetime);
    }

    /// Write the file with restrictive permissions, creating the directory
    fn write(&self) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let file = CheckpointsFile {
            checkpoints: self.checkpoints.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(&self.path, json).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })?;

        #[cfg(unix)]
        set_private_permissions(&self.path).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })?;

        Ok(())
    }
}

/// Set file permissions to owner read/write only on Unix systems
#[cfg(unix)]
pub(crate) fn set_private_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(PRIVATE_FILE_MODE);
    fs::set_permissions(path, perms)
}
