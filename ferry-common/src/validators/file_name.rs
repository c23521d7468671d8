//! File name and MIME type validation
//!
//! File names travel in room metadata and end up as the receiver's output
//! name, so path components are rejected outright.

use thiserror::Error;

/// Maximum length for file names in bytes
pub const MAX_FILE_NAME_LENGTH: usize = 255;

/// Maximum length for MIME types in bytes
pub const MAX_MIME_TYPE_LENGTH: usize = 128;

/// Validation error for file names and MIME types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileNameError {
    #[error("file name is empty")]
    Empty,
    #[error("file name is longer than {MAX_FILE_NAME_LENGTH} bytes")]
    TooLong,
    #[error("file name may not contain path separators or control characters")]
    InvalidCharacters,
    #[error("file name may not be '.' or '..'")]
    Reserved,
    #[error("mime type is longer than {MAX_MIME_TYPE_LENGTH} bytes")]
    MimeTypeTooLong,
}

/// Validate a bare file name
///
/// # Errors
///
/// Returns a `FileNameError` describing the failure.
pub fn validate_file_name(name: &str) -> Result<(), FileNameError> {
    if name.is_empty() {
        return Err(FileNameError::Empty);
    }
    if name.len() > MAX_FILE_NAME_LENGTH {
        return Err(FileNameError::TooLong);
    }
    if name == "." || name == ".." {
        return Err(FileNameError::Reserved);
    }
    if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
    {
        return Err(FileNameError::InvalidCharacters);
    }
    Ok(())
}

/// Validate a MIME type (empty is allowed)
///
/// # Errors
///
/// Returns `FileNameError::MimeTypeTooLong` if over the limit.
pub fn validate_mime_type(mime_type: &str) -> Result<(), FileNameError> {
    if mime_type.len() > MAX_MIME_TYPE_LENGTH {
        return Err(FileNameError::MimeTypeTooLong);
    }
    Ok(())
}
