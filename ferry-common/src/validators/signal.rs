//! Signal payload validation

use thiserror::Error;

/// Maximum serialized size of a forwarded signal payload
pub const MAX_SIGNAL_PAYLOAD_LENGTH: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("signal payload is larger than {MAX_SIGNAL_PAYLOAD_LENGTH} bytes")]
    TooLarge,
    #[error("signal payload may not be null")]
    Null,
}

/// Validate an opaque signal payload
///
/// Contents are not interpreted; only size and presence are checked.
///
/// # Errors
///
/// Returns a `SignalError` describing the failure.
pub fn validate_signal_payload(payload: &serde_json::Value) -> Result<(), SignalError> {
    if payload.is_null() {
        return Err(SignalError::Null);
    }
    let size = serde_json::to_vec(payload).map_or(usize::MAX, |bytes| bytes.len());
    if size > MAX_SIGNAL_PAYLOAD_LENGTH {
        return Err(SignalError::TooLarge);
    }
    Ok(())
}
