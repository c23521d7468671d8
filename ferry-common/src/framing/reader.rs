//! Frame reader for parsing messages from a stream

use std::io;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::time::timeout;

use super::error::FrameError;
use super::frame::RawFrame;
use super::limits::{is_known_message_type, max_payload_for_type};
use super::message_id::MessageId;
use super::{
    DELIMITER, MAGIC, MAX_PAYLOAD_LENGTH_DIGITS, MAX_TYPE_LENGTH, MAX_TYPE_LENGTH_DIGITS,
    MSG_ID_LENGTH, TERMINATOR,
};

/// Default timeout for completing a frame once the first byte is received
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for the first byte on connections that may not idle
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads frames from an async reader
pub struct FrameReader<R> {
    reader: R,
}

impl<R> FrameReader<R> {
    /// Create a new frame reader
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Get a mutable reference to the underlying reader
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consume the frame reader and return the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: AsyncReadExt + Unpin> FrameReader<R> {
    /// Read the next frame from the stream
    ///
    /// Returns `Ok(None)` if the connection is cleanly closed. Waits
    /// indefinitely; prefer [`read_frame_with_timeout`](Self::read_frame_with_timeout)
    /// on sockets.
    pub async fn read_frame(&mut self) -> Result<Option<RawFrame>, FrameError> {
        let Some(first_byte) = self.read_byte_allow_eof().await? else {
            return Ok(None);
        };
        self.read_frame_after_first_byte(first_byte).await.map(Some)
    }

    /// Read the next frame, allowing an idle wait but bounding the frame itself
    ///
    /// The first byte may take arbitrarily long. Once it arrives the rest of
    /// the frame must complete within `frame_timeout`.
    pub async fn read_frame_with_timeout(
        &mut self,
        frame_timeout: Duration,
    ) -> Result<Option<RawFrame>, FrameError> {
        let Some(first_byte) = self.read_byte_allow_eof().await? else {
            return Ok(None);
        };

        match timeout(frame_timeout, self.read_frame_after_first_byte(first_byte)).await {
            Ok(result) => result.map(Some),
            Err(_) => Err(FrameError::FrameTimeout),
        }
    }

    /// Read the next frame with a bound on the idle wait as well
    pub async fn read_frame_with_full_timeout(
        &mut self,
        idle_timeout: Duration,
        frame_timeout: Duration,
    ) -> Result<Option<RawFrame>, FrameError> {
        let first_byte = match timeout(idle_timeout, self.read_byte_allow_eof()).await {
            Ok(Ok(Some(b))) => b,
            Ok(Ok(None)) => return Ok(None),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(FrameError::IdleTimeout),
        };

        match timeout(frame_timeout, self.read_frame_after_first_byte(first_byte)).await {
            Ok(result) => result.map(Some),
            Err(_) => Err(FrameError::FrameTimeout),
        }
    }

    async fn read_frame_after_first_byte(&mut self, first_byte: u8) -> Result<RawFrame, FrameError> {
        if first_byte != MAGIC[0] {
            return Err(FrameError::InvalidMagic);
        }
        let mut magic_rest = [0u8; 2];
        self.reader.read_exact(&mut magic_rest).await?;
        if magic_rest != MAGIC[1..] {
            return Err(FrameError::InvalidMagic);
        }

        let type_length = self
            .read_length_field(
                MAX_TYPE_LENGTH_DIGITS,
                FrameError::InvalidTypeLength,
                FrameError::TypeLengthTooManyDigits,
            )
            .await?;
        if type_length == 0 || type_length > MAX_TYPE_LENGTH as u64 {
            return Err(FrameError::TypeLengthOutOfRange);
        }

        let mut type_bytes = vec![0u8; type_length as usize];
        self.reader.read_exact(&mut type_bytes).await?;
        let message_type = String::from_utf8(type_bytes)
            .map_err(|_| FrameError::UnknownMessageType("<invalid utf8>".to_string()))?;

        // Reject unknown types before touching the payload
        if !is_known_message_type(&message_type) {
            return Err(FrameError::UnknownMessageType(message_type));
        }

        self.expect_delimiter().await?;

        let mut msg_id_bytes = [0u8; MSG_ID_LENGTH];
        self.reader.read_exact(&mut msg_id_bytes).await?;
        let message_id = MessageId::from_bytes(&msg_id_bytes)?;

        self.expect_delimiter().await?;

        let payload_length = self
            .read_length_field(
                MAX_PAYLOAD_LENGTH_DIGITS,
                FrameError::InvalidPayloadLength,
                FrameError::PayloadLengthTooManyDigits,
            )
            .await?;
        let max = max_payload_for_type(&message_type);
        if payload_length > max {
            return Err(FrameError::PayloadLengthExceedsTypeMax {
                message_type,
                length: payload_length,
                max,
            });
        }

        let mut payload = vec![0u8; payload_length as usize];
        self.reader.read_exact(&mut payload).await?;

        if self.read_byte().await? != TERMINATOR {
            return Err(FrameError::MissingTerminator);
        }

        Ok(RawFrame::new(message_id, message_type, payload))
    }

    async fn expect_delimiter(&mut self) -> Result<(), FrameError> {
        if self.read_byte().await? != DELIMITER {
            return Err(FrameError::MissingDelimiter);
        }
        Ok(())
    }

    /// Read a single byte, returning None on clean EOF
    async fn read_byte_allow_eof(&mut self) -> Result<Option<u8>, FrameError> {
        let mut buf = [0u8; 1];
        match self.reader.read_exact(&mut buf).await {
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_byte(&mut self) -> Result<u8, FrameError> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf).await?;
        Ok(buf[0])
    }

    /// Read a length field (digits terminated by the delimiter)
    async fn read_length_field(
        &mut self,
        max_digits: usize,
        invalid_err: FrameError,
        too_many_err: FrameError,
    ) -> Result<u64, FrameError> {
        let mut digits = Vec::with_capacity(max_digits);

        for _ in 0..=max_digits {
            let byte = self.read_byte().await?;

            if byte == DELIMITER {
                if digits.is_empty() {
                    return Err(invalid_err);
                }
                let s = std::str::from_utf8(&digits).map_err(|_| invalid_err.clone())?;
                return s.parse().map_err(|_| invalid_err.clone());
            }

            if !byte.is_ascii_digit() {
                return Err(invalid_err);
            }

            digits.push(byte);
        }

        Err(too_many_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::{AsyncWriteExt, BufReader};

    fn reader_for(data: &[u8]) -> FrameReader<BufReader<Cursor<Vec<u8>>>> {
        FrameReader::new(BufReader::new(Cursor::new(data.to_vec())))
    }

    #[tokio::test]
    async fn test_valid_frame() {
        let mut reader = reader_for(b"FY|8|JoinRoom|a1b2c3d4e5f6|20|{\"room_id\":\"ABC123\"}\n");

        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.message_type, "JoinRoom");
        assert_eq!(
            frame.message_id,
            MessageId::from_bytes(b"a1b2c3d4e5f6").unwrap()
        );
        assert_eq!(frame.payload, b"{\"room_id\":\"ABC123\"}");
    }

    #[tokio::test]
    async fn test_multiple_frames() {
        let mut reader =
            reader_for(b"FY|8|JoinRoom|a1b2c3d4e5f6|2|{}\nFY|11|ServerStats|b2c3d4e5f6a1|2|{}\n");

        let first = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(first.message_type, "JoinRoom");
        let second = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(second.message_type, "ServerStats");
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_binary_payload_with_newlines() {
        let mut data = b"FY|11|ChannelData|a1b2c3d4e5f6|4|".to_vec();
        data.extend_from_slice(&[b'\n', 0, b'|', 7]);
        data.push(b'\n');
        let mut reader = reader_for(&data);

        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.payload, vec![b'\n', 0, b'|', 7]);
    }

    #[tokio::test]
    async fn test_clean_eof() {
        let mut reader = reader_for(b"");
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_magic() {
        let mut reader = reader_for(b"NX|8|JoinRoom|a1b2c3d4e5f6|2|{}\n");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::InvalidMagic)
        ));

        let mut reader = reader_for(b"FZ|8|JoinRoom|a1b2c3d4e5f6|2|{}\n");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::InvalidMagic)
        ));
    }

    #[tokio::test]
    async fn test_unknown_type_rejected() {
        let mut reader = reader_for(b"FY|8|ChatSend|a1b2c3d4e5f6|2|{}\n");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::UnknownMessageType(t)) if t == "ChatSend"
        ));
    }

    #[tokio::test]
    async fn test_invalid_message_id() {
        let mut reader = reader_for(b"FY|8|JoinRoom|not_hex_char|2|{}\n");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::InvalidMessageId)
        ));
    }

    #[tokio::test]
    async fn test_type_length_errors() {
        let mut reader = reader_for(b"FY|0||a1b2c3d4e5f6|2|{}\n");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::TypeLengthOutOfRange)
        ));

        let mut reader = reader_for(b"FY|1234|X|a1b2c3d4e5f6|2|{}\n");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::TypeLengthTooManyDigits)
        ));

        let mut reader = reader_for(b"FY|x|X|a1b2c3d4e5f6|2|{}\n");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::InvalidTypeLength)
        ));
    }

    #[tokio::test]
    async fn test_payload_length_errors() {
        let mut reader = reader_for(b"FY|8|JoinRoom|a1b2c3d4e5f6||{}\n");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::InvalidPayloadLength)
        ));

        let mut reader = reader_for(b"FY|8|JoinRoom|a1b2c3d4e5f6|123456789012345678901|{}\n");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::PayloadLengthTooManyDigits)
        ));
    }

    #[tokio::test]
    async fn test_payload_exceeds_type_max() {
        let mut reader = reader_for(b"FY|9|LeaveRoom|a1b2c3d4e5f6|5000|");
        let max = max_payload_for_type("LeaveRoom");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::PayloadLengthExceedsTypeMax { message_type, length: 5000, max: m })
                if message_type == "LeaveRoom" && m == max
        ));
    }

    #[tokio::test]
    async fn test_missing_delimiter_and_terminator() {
        let mut reader = reader_for(b"FY|8|JoinRoomXa1b2c3d4e5f6|2|{}\n");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::MissingDelimiter)
        ));

        let mut reader = reader_for(b"FY|8|JoinRoom|a1b2c3d4e5f6|2|{} ");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::MissingTerminator)
        ));

        let mut reader = reader_for(b"FY|8|JoinRoom|a1b2c3d4e5f6|2|{}");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_timeout_after_first_byte() {
        let (client, server) = tokio::io::duplex(1024);
        let (_read, mut write) = tokio::io::split(client);
        let mut reader = FrameReader::new(BufReader::new(server));

        write.write_all(b"FY|8|Join").await.unwrap();

        let result = reader
            .read_frame_with_timeout(Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(FrameError::FrameTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_timeout_idle() {
        let (_client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(BufReader::new(server));

        let result = reader
            .read_frame_with_full_timeout(Duration::from_millis(50), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(FrameError::IdleTimeout)));
    }

    #[tokio::test]
    async fn test_with_timeout_completes() {
        let mut reader = reader_for(b"FY|11|ServerStats|a1b2c3d4e5f6|2|{}\n");
        let frame = reader
            .read_frame_with_timeout(DEFAULT_FRAME_TIMEOUT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.message_type, "ServerStats");
    }
}
