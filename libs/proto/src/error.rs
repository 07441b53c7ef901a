//! Error types for packet decoding and framing.

use thiserror::Error;

/// An inbound payload that does not decode to a known packet.
///
/// Receivers log and drop the offending frame; the connection stays open.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MalformedPacket {
    /// Payload length does not match the fixed packet size.
    #[error("invalid packet length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Image type byte outside the known range.
    #[error("unknown image type: {0}")]
    UnknownImageType(u8),

    /// Boolean flag encoded as something other than 0 or 1.
    #[error("invalid flag byte for {field}: {value}")]
    InvalidFlag { field: &'static str, value: u8 },

    /// Numeric field is NaN, infinite or outside its allowed range.
    #[error("field {field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f32 },
}

/// Errors raised while splitting a byte stream into frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Declared frame length exceeds the receiver's limit.
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },
}
