//! Application-wide constants
//!
//! Shared constants used across multiple modules.

use std::time::Duration;

/// Application directory name (used in config directory path)
pub const APP_DIR_NAME: &str = "ferry";

/// Config file name
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Resume checkpoints file name
pub const CHECKPOINTS_FILE_NAME: &str = "transfer-progress.json";

/// Completed-transfer history file name
pub const HISTORY_FILE_NAME: &str = "transfer-records.json";

/// File permissions for the durable client files on Unix (owner read/write only)
#[cfg(unix)]
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// How long a request waits for its response
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the initial signaling connection
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-candidate dial timeout for peer-to-peer data channels
pub const CANDIDATE_DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// How long a receiver waits for the sender to dial its offer
pub const OFFER_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait before uploading again when the relay buffer is full
pub const RELAY_BUSY_RETRY: Duration = Duration::from_millis(200);

/// How long a finished sender waits for the room to close
pub const COMPLETION_WAIT: Duration = Duration::from_secs(5 * 60);

/// Maximum number of history entries kept on disk
pub const MAX_HISTORY_ENTRIES: usize = 200;
