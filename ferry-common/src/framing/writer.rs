//! Frame writer for sending messages to a stream

use tokio::io::AsyncWriteExt;

use super::error::FrameError;
use super::frame::RawFrame;
use super::message_id::MessageId;

/// Writes frames to an async writer
pub struct FrameWriter<W> {
    writer: W,
}

impl<W> FrameWriter<W> {
    /// Create a new frame writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Get a mutable reference to the underlying writer
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Consume the frame writer and return the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWriteExt + Unpin> FrameWriter<W> {
    /// Write a frame and flush it
    pub async fn write_frame(&mut self, frame: &RawFrame) -> Result<(), FrameError> {
        self.writer.write_all(&frame.to_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Build a frame from its parts and write it
    pub async fn write(
        &mut self,
        message_id: MessageId,
        message_type: &str,
        payload: &[u8],
    ) -> Result<(), FrameError> {
        let frame = RawFrame::new(message_id, message_type.to_string(), payload.to_vec());
        self.write_frame(&frame).await
    }
}
