//! Error message functions for handlers
//!
//! Human-readable text for responses. Clients branch on `error_kind`, never
//! on these strings.

use ferry_common::validators::{
    AddressError, FileNameError, RoomCodeError, SignalError, TransferIdError,
};

use crate::rooms::{JoinError, RoomError};

/// Outgoing channel of a connection is gone
pub const ERR_CHANNEL_CLOSED: &str = "connection channel closed";

// ========================================================================
// Protocol Errors
// ========================================================================

pub fn err_invalid_message_format() -> String {
    "Invalid message format".to_string()
}

// ========================================================================
// Validation Errors
// ========================================================================

pub fn err_room_code(e: RoomCodeError) -> String {
    format!("Invalid room code: {e}")
}

pub fn err_file_info(e: FileNameError) -> String {
    format!("Invalid file info: {e}")
}

pub fn err_address(e: AddressError) -> String {
    format!("Invalid local address: {e}")
}

pub fn err_transfer_id(e: TransferIdError) -> String {
    format!("Invalid transfer id: {e}")
}

pub fn err_signal_payload(e: SignalError) -> String {
    format!("Invalid signal: {e}")
}

// ========================================================================
// Room Errors
// ========================================================================

pub fn err_room_not_found(room_id: &str) -> String {
    format!("Room {room_id} not found")
}

pub fn err_room_full(room_id: &str) -> String {
    format!("Room {room_id} is full")
}

pub fn err_room_gone(room_id: &str) -> String {
    format!("Room {room_id} no longer exists")
}

pub fn err_not_member(room_id: &str) -> String {
    format!("Not a member of room {room_id}")
}

pub fn err_room_codes_exhausted() -> String {
    "Could not allocate a room code".to_string()
}

pub fn join_error_to_message(e: &JoinError, room_id: &str) -> String {
    match e {
        JoinError::NotFound => err_room_not_found(room_id),
        JoinError::Full => err_room_full(room_id),
    }
}

pub fn room_error_to_message(e: &RoomError, room_id: &str) -> String {
    match e {
        RoomError::NotFound => err_room_not_found(room_id),
        RoomError::Gone => err_room_gone(room_id),
        RoomError::Full => err_room_full(room_id),
        RoomError::NotMember => err_not_member(room_id),
        RoomError::IdSpaceExhausted => err_room_codes_exhausted(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_room() {
        assert!(err_room_not_found("ABC123").contains("ABC123"));
        assert!(err_room_full("ABC123").contains("full"));
        assert!(err_room_gone("ABC123").contains("no longer"));
    }

    #[test]
    fn test_room_error_mapping() {
        assert_eq!(
            room_error_to_message(&RoomError::Gone, "XYZ789"),
            err_room_gone("XYZ789")
        );
        assert_eq!(
            join_error_to_message(&JoinError::Full, "XYZ789"),
            err_room_full("XYZ789")
        );
    }

    #[test]
    fn test_validation_messages_include_cause() {
        let msg = err_room_code(RoomCodeError::WrongLength);
        assert!(msg.starts_with("Invalid room code: "));
        assert!(msg.contains("6 characters"));
    }
}
