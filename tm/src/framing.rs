//! Length-header framing
//!
//! Every frame on the wire is a big-endian unsigned length followed by that
//! many payload bytes. The header is 1, 2 or 4 bytes wide; both ends of a
//! connection must agree on the width.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Framing failures
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame of {len} bytes exceeds header limit of {max}")]
    TooLarge { len: usize, max: usize },

    #[error("Unsupported length header width: {0} bytes")]
    UnsupportedWidth(u8),

    #[error("Connection closed")]
    Closed,
}

impl FrameError {
    /// True if the peer closed the stream cleanly between frames
    pub fn is_closed(&self) -> bool {
        matches!(self, FrameError::Closed)
    }
}

/// Width of the length header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LengthHeader {
    #[default]
    One,
    Two,
    Four,
}

impl LengthHeader {
    pub fn width(self) -> usize {
        match self {
            LengthHeader::One => 1,
            LengthHeader::Two => 2,
            LengthHeader::Four => 4,
        }
    }

    /// Largest payload the header can describe
    pub fn max_len(self) -> usize {
        match self {
            LengthHeader::One => u8::MAX as usize,
            LengthHeader::Two => u16::MAX as usize,
            LengthHeader::Four => u32::MAX as usize,
        }
    }

    fn encode(self, len: usize) -> Result<Vec<u8>, FrameError> {
        if len > self.max_len() {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_len(),
            });
        }
        let bytes = (len as u32).to_be_bytes();
        Ok(bytes[4 - self.width()..].to_vec())
    }

    fn decode(self, header: &[u8]) -> usize {
        header.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b))
    }
}

impl TryFrom<u8> for LengthHeader {
    type Error = FrameError;

    fn try_from(width: u8) -> Result<Self, Self::Error> {
        match width {
            1 => Ok(LengthHeader::One),
            2 => Ok(LengthHeader::Two),
            4 => Ok(LengthHeader::Four),
            other => Err(FrameError::UnsupportedWidth(other)),
        }
    }
}

impl From<LengthHeader> for u8 {
    fn from(header: LengthHeader) -> Self {
        header.width() as u8
    }
}

/// Read one frame
///
/// Returns `FrameError::Closed` if the stream ends before a header starts;
/// ending partway through a frame is an IO error.
pub async fn read_frame<R>(reader: &mut R, header: LengthHeader) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 4];
    let head = &mut head[..header.width()];

    // First byte separately so a clean EOF can be told apart from truncation
    if reader.read(&mut head[..1]).await? == 0 {
        return Err(FrameError::Closed);
    }
    reader.read_exact(&mut head[1..]).await?;

    let len = header.decode(head);
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one frame and flush
pub async fn write_frame<W>(writer: &mut W, header: LengthHeader, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let head = header.encode(payload.len())?;
    let mut frame = Vec::with_capacity(head.len() + payload.len());
    frame.extend_from_slice(&head);
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
