//! FramePayloadValidator types

use serde::Serialize;

/// A frame that passed every structural check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DecodedFrame {
    pub height: u32,
    pub width: u32,
    /// Channels the frame is consumed with
    pub channels: u8,
    /// Channels of the encoded image before colour expansion
    pub source_channels: u8,
    /// Size of the decoded byte stream (compressed image)
    pub byte_len: usize,
}

/// Why a frame payload was dropped
///
/// Each variant renders a distinct message used for diagnostics only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameRejection {
    #[error("Frame data is empty")]
    Empty,

    #[error("Frame data is not a string")]
    NotText,

    #[error("Frame too large: {len} bytes (max: {max})")]
    EncodedTooLarge { len: usize, max: usize },

    #[error("Frame too small: {len} bytes (min: {min})")]
    EncodedTooSmall { len: usize, min: usize },

    #[error("Invalid base64 encoding: {0}")]
    InvalidEncoding(String),

    #[error("Decoded frame is empty")]
    DecodedEmpty,

    #[error("Decoded frame too large: {len} bytes (max: {max})")]
    DecodedTooLarge { len: usize, max: usize },

    #[error("Could not decode frame image: {0}")]
    UndecodableImage(String),

    #[error("Frame dimensions too small: {width}x{height} pixels (min: {min}x{min})")]
    DimensionsTooSmall { width: u32, height: u32, min: u32 },

    #[error("Frame dimensions too large: {width}x{height} pixels (max: {max}x{max})")]
    DimensionsTooLarge { width: u32, height: u32, max: u32 },

    #[error("Rate limit exceeded: max {max_per_second} requests/second")]
    RateLimited { max_per_second: u32 },
}

impl FrameRejection {
    /// Rejected by admission control rather than by structure
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, FrameRejection::RateLimited { .. })
    }
}

/// Why a session identifier was refused
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionIdRejection {
    #[error("Session ID cannot be empty")]
    Empty,

    #[error("Session ID too long: {len} characters (max: {max})")]
    TooLong { len: usize, max: usize },

    #[error("Session ID contains invalid characters (use only alphanumerics, _ and -)")]
    InvalidCharacters,
}
