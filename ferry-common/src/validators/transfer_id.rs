//! Transfer identifier validation

use thiserror::Error;

/// Maximum length for transfer identifiers
pub const MAX_TRANSFER_ID_LENGTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferIdError {
    #[error("transfer id is empty")]
    Empty,
    #[error("transfer id is longer than {MAX_TRANSFER_ID_LENGTH} characters")]
    TooLong,
    #[error("transfer id may only contain ASCII letters, digits, '-' and '_'")]
    InvalidCharacters,
}

/// Validate a transfer identifier
///
/// # Errors
///
/// Returns a `TransferIdError` describing the failure.
pub fn validate_transfer_id(id: &str) -> Result<(), TransferIdError> {
    if id.is_empty() {
        return Err(TransferIdError::Empty);
    }
    if id.len() > MAX_TRANSFER_ID_LENGTH {
        return Err(TransferIdError::TooLong);
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(TransferIdError::InvalidCharacters);
    }
    Ok(())
}
