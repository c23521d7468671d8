//! Message IDs for request/response correlation

use std::fmt;

use rand::RngExt;

use super::MSG_ID_LENGTH;
use super::error::FrameError;

/// A 12-character lowercase hex identifier carried by every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; MSG_ID_LENGTH]);

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

impl MessageId {
    /// Generate a random message ID
    #[must_use]
    pub fn new() -> Self {
        let random: [u8; MSG_ID_LENGTH / 2] = rand::rng().random();
        let mut bytes = [0u8; MSG_ID_LENGTH];
        for (i, b) in random.iter().enumerate() {
            bytes[i * 2] = HEX_DIGITS[(b >> 4) as usize];
            bytes[i * 2 + 1] = HEX_DIGITS[(b & 0x0f) as usize];
        }
        Self(bytes)
    }

    /// Parse a message ID from raw bytes
    ///
    /// Accepts exactly 12 hex characters; uppercase is normalized to lowercase.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != MSG_ID_LENGTH {
            return Err(FrameError::InvalidMessageId);
        }
        let mut out = [0u8; MSG_ID_LENGTH];
        for (slot, b) in out.iter_mut().zip(bytes) {
            if !b.is_ascii_hexdigit() {
                return Err(FrameError::InvalidMessageId);
            }
            *slot = b.to_ascii_lowercase();
        }
        Ok(Self(out))
    }

    /// Raw hex bytes of this ID
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; MSG_ID_LENGTH] {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only ever holds ASCII hex digits
        f.write_str(std::str::from_utf8(&self.0).map_err(|_| fmt::Error)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_valid_hex() {
        let id = MessageId::new();
        assert!(id.as_bytes().iter().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(MessageId::from_bytes(id.as_bytes()).unwrap(), id);
    }

    #[test]
    fn test_new_ids_differ() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn test_from_bytes_rejects_bad_input() {
        assert!(MessageId::from_bytes(b"short").is_err());
        assert!(MessageId::from_bytes(b"zzzzzzzzzzzz").is_err());
        assert!(MessageId::from_bytes(b"a1b2c3d4e5f6a").is_err());
    }

    #[test]
    fn test_uppercase_normalized() {
        let upper = MessageId::from_bytes(b"A1B2C3D4E5F6").unwrap();
        let lower = MessageId::from_bytes(b"a1b2c3d4e5f6").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.to_string(), "a1b2c3d4e5f6");
    }
}
