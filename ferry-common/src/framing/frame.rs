//! Raw frame representation

use super::message_id::MessageId;
use super::{DELIMITER, MAGIC, TERMINATOR};

/// A frame with its header fields parsed and the payload left opaque
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub message_id: MessageId,
    pub message_type: String,
    pub payload: Vec<u8>,
}

impl RawFrame {
    /// Create a new frame
    pub fn new(message_id: MessageId, message_type: String, payload: Vec<u8>) -> Self {
        Self {
            message_id,
            message_type,
            payload,
        }
    }

    /// Serialize the frame into its wire representation
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let type_len = self.message_type.len().to_string();
        let payload_len = self.payload.len().to_string();
        let mut out = Vec::with_capacity(
            MAGIC.len()
                + type_len.len()
                + self.message_type.len()
                + self.message_id.as_bytes().len()
                + payload_len.len()
                + self.payload.len()
                + 5,
        );
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(type_len.as_bytes());
        out.push(DELIMITER);
        out.extend_from_slice(self.message_type.as_bytes());
        out.push(DELIMITER);
        out.extend_from_slice(self.message_id.as_bytes());
        out.push(DELIMITER);
        out.extend_from_slice(payload_len.as_bytes());
        out.push(DELIMITER);
        out.extend_from_slice(&self.payload);
        out.push(TERMINATOR);
        out
    }
}
