//! Feed frame codec.
//!
//! Peers stream events over TCP as length-prefixed frames:
//!
//! ```text
//! [u32 little-endian length][payload bytes]
//! [u32 little-endian length][payload bytes]
//! ...
//! ```
//!
//! Each frame carries exactly one event. [`FrameDecoder`] is fed whatever a
//! socket read returned; it buffers partial frames and yields payloads only
//! once they are complete.

use crate::error::{Error, Result};
use std::io::Write;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload a peer may send in a single frame (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Encode a payload as a single frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Write a payload as a single frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    writer.write_all(&encode_frame(payload))?;
    Ok(())
}

/// Incremental decoder for length-prefixed frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder enforcing [`MAX_FRAME_SIZE`].
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom payload limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_size,
        }
    }

    /// Append raw bytes received from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// Returns an error as soon as a length prefix exceeds the limit; the
    /// stream cannot be resynchronised after that.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&self.buf[..LENGTH_PREFIX_SIZE]);
        let len = u32::from_le_bytes(prefix) as usize;

        if len > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                len,
                max: self.max_frame_size,
            });
        }

        let end = LENGTH_PREFIX_SIZE + len;
        if self.buf.len() < end {
            return Ok(None);
        }

        let frame = self.buf[LENGTH_PREFIX_SIZE..end].to_vec();
        self.buf.drain(..end);
        Ok(Some(frame))
    }
}
