//! Room code validation
//!
//! Room codes are 6 characters from `A-Z0-9`. Input is case-insensitive;
//! the canonical form is uppercase.

use thiserror::Error;

use crate::{ROOM_CODE_ALPHABET, ROOM_CODE_LENGTH};

/// Validation error for room codes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomCodeError {
    #[error("room code is empty")]
    Empty,
    #[error("room code must be {ROOM_CODE_LENGTH} characters")]
    WrongLength,
    #[error("room code may only contain letters and digits")]
    InvalidCharacters,
}

/// Validate a room code in any letter case
///
/// # Errors
///
/// Returns a `RoomCodeError` describing the failure.
pub fn validate_room_code(code: &str) -> Result<(), RoomCodeError> {
    if code.is_empty() {
        return Err(RoomCodeError::Empty);
    }
    if code.chars().count() != ROOM_CODE_LENGTH {
        return Err(RoomCodeError::WrongLength);
    }
    if !code
        .bytes()
        .all(|b| ROOM_CODE_ALPHABET.contains(&b.to_ascii_uppercase()))
    {
        return Err(RoomCodeError::InvalidCharacters);
    }
    Ok(())
}

/// Validate and return the canonical uppercase form of a room code
///
/// # Errors
///
/// Returns a `RoomCodeError` if the code is invalid.
pub fn normalize_room_code(code: &str) -> Result<String, RoomCodeError> {
    let trimmed = code.trim();
    validate_room_code(trimmed)?;
    Ok(trimmed.to_ascii_uppercase())
}
