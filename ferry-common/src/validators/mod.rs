//! Input validation functions
//!
//! Shared between client and server: clients pre-validate, the server
//! enforces.

mod address;
mod file_name;
mod room_code;
mod signal;
mod transfer_id;

pub use address::{AddressError, MAX_ADDRESS_LENGTH, parse_address, validate_address};
pub use file_name::{
    FileNameError, MAX_FILE_NAME_LENGTH, MAX_MIME_TYPE_LENGTH, validate_file_name,
    validate_mime_type,
};
pub use room_code::{RoomCodeError, normalize_room_code, validate_room_code};
pub use signal::{MAX_SIGNAL_PAYLOAD_LENGTH, SignalError, validate_signal_payload};
pub use transfer_id::{MAX_TRANSFER_ID_LENGTH, TransferIdError, validate_transfer_id};

/// Maximum length for human-readable error strings in responses
pub const MAX_ERROR_LENGTH: usize = 2048;
