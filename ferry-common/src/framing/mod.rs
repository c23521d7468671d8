//! Wire framing for Ferry messages
//!
//! Every message travels as one frame:
//!
//! ```text
//! FY|<type_len>|<type>|<msg_id>|<payload_len>|<payload>\n
//! ```
//!
//! The type is checked against a table of known types before the payload is
//! read, and each type has its own payload ceiling.

mod error;
mod frame;
pub mod limits;
mod message_id;
mod reader;
mod writer;

pub use error::FrameError;
pub use frame::RawFrame;
pub use message_id::MessageId;
pub use reader::{DEFAULT_FRAME_TIMEOUT, DEFAULT_IDLE_TIMEOUT, FrameReader};
pub use writer::FrameWriter;

/// Magic bytes that open every frame
pub const MAGIC: &[u8; 3] = b"FY|";

/// Field separator
pub const DELIMITER: u8 = b'|';

/// Frame terminator
pub const TERMINATOR: u8 = b'\n';

/// Length of a message ID in bytes (hex characters)
pub const MSG_ID_LENGTH: usize = 12;

/// Longest message type name accepted
pub const MAX_TYPE_LENGTH: usize = 32;

/// Digits allowed in the type length field
pub const MAX_TYPE_LENGTH_DIGITS: usize = 3;

/// Digits allowed in the payload length field
pub const MAX_PAYLOAD_LENGTH_DIGITS: usize = 20;

/// Ceiling applied to types without their own limit (4 MiB)
pub const MAX_PAYLOAD_LENGTH: u64 = 4 * 1024 * 1024;
