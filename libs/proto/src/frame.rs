//! Length-prefixed framing.
//!
//! A frame is a 4-byte big-endian payload length followed by exactly that
//! many payload bytes. [`FrameDecoder`] reassembles frames from arbitrarily
//! fragmented reads and yields them in arrival order.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound for a single inbound frame (64 KiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Incremental frame decoder.
///
/// Bytes are appended with [`FrameDecoder::extend`]; complete frames are
/// drained with [`FrameDecoder::decode_next`]. Partial frames stay buffered
/// until the rest arrives.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_len: usize,
}

impl FrameDecoder {
    /// Create a decoder that rejects frames longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(LENGTH_PREFIX_LEN + 64),
            max_frame_len,
        }
    }

    /// Append bytes from one I/O delivery.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame payload, if one is buffered.
    ///
    /// An oversized length prefix is unrecoverable: the stream can no longer
    /// be resynchronised, so the caller should drop the connection.
    pub fn decode_next(&mut self) -> Result<Option<Bytes>, FrameError> {
        if self.buf.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&self.buf[..LENGTH_PREFIX_LEN]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len > self.max_frame_len {
            return Err(FrameError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        if self.buf.len() < LENGTH_PREFIX_LEN + len {
            self.buf.reserve(LENGTH_PREFIX_LEN + len - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(LENGTH_PREFIX_LEN);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}
