//! When checkpoints are written

use crate::config::ResumeSettings;

/// Write a checkpoint every `interval` completed chunks
///
/// Sampling bounds checkpoint I/O. After a resume, chunks between the last
/// written checkpoint and the real position are delivered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPolicy {
    interval: u64,
}

impl CheckpointPolicy {
    /// An interval of 0 disables sampled checkpoints
    pub fn every(interval: u64) -> Self {
        Self { interval }
    }

    pub fn disabled() -> Self {
        Self { interval: 0 }
    }

    pub fn from_settings(settings: &ResumeSettings) -> Self {
        if settings.enabled {
            Self::every(settings.checkpoint_interval)
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval > 0
    }

    /// Whether reaching `completed_chunks` calls for a checkpoint
    pub fn should_write(&self, completed_chunks: u64) -> bool {
        self.interval > 0 && completed_chunks > 0 && completed_chunks % self.interval == 0
    }
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self::from_settings(&ResumeSettings::default())
    }
}
