//! User settings
//!
//! Stored as `config.json` in the platform config directory. Every field has
//! a serde default so older or partial files keep loading.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ferry_common::{DEFAULT_CHUNK_SIZE, DEFAULT_PORT, DEFAULT_RELAY_CHUNK_SIZE, MAX_CHUNK_SIZE};

use crate::constants::{APP_DIR_NAME, CONFIG_FILE_NAME};

// =============================================================================
// Defaults
// =============================================================================

/// Pause after each chunk on a direct channel
pub const DEFAULT_DIRECT_PAUSE_MS: u64 = 10;

/// Pause after each chunk through the relay
pub const DEFAULT_RELAY_PAUSE_MS: u64 = 50;

/// How long a receiver waits after the last chunk when no metadata arrived
pub const DEFAULT_METADATA_GRACE_MS: u64 = 2000;

/// Reconnect attempts before giving up
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay before the first reconnect attempt
pub const DEFAULT_INITIAL_RECONNECT_DELAY_MS: u64 = 3000;

/// Growth factor between reconnect delays
pub const DEFAULT_RECONNECT_MULTIPLIER: f64 = 1.5;

/// Upper bound on a single reconnect delay
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// Write a checkpoint every this many chunks
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 10;

/// Checkpoints older than this are ignored and purged
pub const DEFAULT_CACHE_LIFETIME_HOURS: u64 = 24;

// =============================================================================
// Sections
// =============================================================================

/// Chunking and pacing
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TransferSettings {
    /// Chunk size on peer-to-peer channels
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Chunk size through the relay (capped at the relay frame limit)
    #[serde(default = "default_relay_chunk_size")]
    pub relay_chunk_size: u64,

    #[serde(default = "default_direct_pause_ms")]
    pub direct_pause_ms: u64,

    #[serde(default = "default_relay_pause_ms")]
    pub relay_pause_ms: u64,

    #[serde(default = "default_metadata_grace_ms")]
    pub metadata_grace_ms: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            relay_chunk_size: DEFAULT_RELAY_CHUNK_SIZE,
            direct_pause_ms: DEFAULT_DIRECT_PAUSE_MS,
            relay_pause_ms: DEFAULT_RELAY_PAUSE_MS,
            metadata_grace_ms: DEFAULT_METADATA_GRACE_MS,
        }
    }
}

impl TransferSettings {
    /// Chunk size for a peer-to-peer channel, clamped to what a frame can carry
    pub fn channel_chunk_size(&self) -> u64 {
        self.chunk_size.clamp(1, MAX_CHUNK_SIZE)
    }

    /// Chunk size for the relay, clamped to what a frame can carry
    pub fn relay_chunk_size(&self) -> u64 {
        self.relay_chunk_size.clamp(1, MAX_CHUNK_SIZE)
    }

    pub fn direct_pause(&self) -> Duration {
        Duration::from_millis(self.direct_pause_ms)
    }

    pub fn relay_pause(&self) -> Duration {
        Duration::from_millis(self.relay_pause_ms)
    }

    pub fn metadata_grace(&self) -> Duration {
        Duration::from_millis(self.metadata_grace_ms)
    }
}

/// Reconnect backoff
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_RECONNECT_DELAY_MS,
            multiplier: DEFAULT_RECONNECT_MULTIPLIER,
            max_delay_ms: DEFAULT_MAX_RECONNECT_DELAY_MS,
        }
    }
}

/// Checkpointing
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResumeSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    #[serde(default = "default_cache_lifetime_hours")]
    pub cache_lifetime_hours: u64,
}

impl Default for ResumeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            cache_lifetime_hours: DEFAULT_CACHE_LIFETIME_HOURS,
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Client preferences
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Settings {
    /// Signaling server as `host:port`
    #[serde(default = "default_server_address")]
    pub server_address: String,

    /// Address reported to the server for topology classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_address: Option<String>,

    /// Where received files are written; the current directory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,

    #[serde(default)]
    pub transfer: TransferSettings,

    #[serde(default)]
    pub reconnect: ReconnectSettings,

    #[serde(default)]
    pub resume: ResumeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            local_address: None,
            download_dir: None,
            transfer: TransferSettings::default(),
            reconnect: ReconnectSettings::default(),
            resume: ResumeSettings::default(),
        }
    }
}

impl Settings {
    /// Directory holding `config.json` and the durable transfer files
    ///
    /// Returns None if the config directory cannot be determined.
    pub fn app_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME))
    }

    /// Platform-specific settings file path
    pub fn default_path() -> Option<PathBuf> {
        Self::app_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    /// Load settings, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        if path.exists()
            && let Ok(contents) = fs::read_to_string(path)
        {
            match serde_json::from_str::<Settings>(&contents) {
                Ok(settings) => return settings,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt settings file");
                }
            }
        }
        Self::default()
    }

    /// Write settings as pretty JSON, creating the parent directory
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize settings: {e}"))?;
        fs::write(path, json).map_err(|e| format!("failed to write {}: {e}", path.display()))
    }
}

// =============================================================================
// Default Functions (for serde)
// =============================================================================

fn default_server_address() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_relay_chunk_size() -> u64 {
    DEFAULT_RELAY_CHUNK_SIZE
}

fn default_direct_pause_ms() -> u64 {
    DEFAULT_DIRECT_PAUSE_MS
}

fn default_relay_pause_ms() -> u64 {
    DEFAULT_RELAY_PAUSE_MS
}

fn default_metadata_grace_ms() -> u64 {
    DEFAULT_METADATA_GRACE_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_initial_delay_ms() -> u64 {
    DEFAULT_INITIAL_RECONNECT_DELAY_MS
}

fn default_multiplier() -> f64 {
    DEFAULT_RECONNECT_MULTIPLIER
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_RECONNECT_DELAY_MS
}

fn default_checkpoint_interval() -> u64 {
    DEFAULT_CHECKPOINT_INTERVAL
}

fn default_cache_lifetime_hours() -> u64 {
    DEFAULT_CACHE_LIFETIME_HOURS
}
