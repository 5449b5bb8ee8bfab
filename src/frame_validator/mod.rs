//! FramePayloadValidator - Inbound Frame Guardrail
//!
//! ## Responsibilities
//!
//! - Structural validation of untrusted frame payloads
//! - Strict base64 decoding, image decoding and geometry checks
//! - Per-session admission via RateBudget, only after the frame is known good
//! - Session identifier validation for the connection handshake
//!
//! Checks run in a fixed order and stop at the first failure. No partial frame
//! is ever returned.
//!
//! Dimensions are read from the image header before any pixel data is decoded,
//! and decoding runs under allocation limits derived from the maximum frame side.
//! Frames are consumed as colour, so grayscale and alpha sources are expanded or
//! dropped to three channels downstream; the three-channel requirement therefore
//! holds for every decodable frame and `source_channels` only records the layout
//! the client sent.

mod types;

pub use types::*;

use crate::rate_budget::RateBudget;
use crate::state::GuardLimits;
use base64::Engine;
use image::ImageReader;
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;
use tokio::time::Instant;

/// Separator between an optional data-URL header and the encoded frame
const PAYLOAD_DELIMITER: char = ',';

/// Frames are consumed as colour images
const COLOUR_CHANNELS: u8 = 3;

/// FramePayloadValidator instance
#[derive(Clone)]
pub struct FramePayloadValidator {
    limits: Arc<GuardLimits>,
    rate_budget: Arc<RateBudget>,
}

impl FramePayloadValidator {
    /// Create new validator sharing the process-wide rate budget
    pub fn new(limits: Arc<GuardLimits>, rate_budget: Arc<RateBudget>) -> Self {
        Self { limits, rate_budget }
    }

    /// Validate a raw `data` field of a frame message
    pub fn validate(
        &self,
        raw: &Value,
        session_id: &str,
        now: Instant,
    ) -> Result<DecodedFrame, FrameRejection> {
        // 1. Non-empty text
        let payload = match raw {
            Value::String(s) => s.as_str(),
            Value::Null => return Err(FrameRejection::Empty),
            _ => return Err(FrameRejection::NotText),
        };
        if payload.is_empty() {
            return Err(FrameRejection::Empty);
        }

        // 2. Encoded size class
        let len = payload.len();
        if len > self.limits.max_frame_size {
            return Err(FrameRejection::EncodedTooLarge {
                len,
                max: self.limits.max_frame_size,
            });
        }
        if len < self.limits.min_encoded_length {
            return Err(FrameRejection::EncodedTooSmall {
                len,
                min: self.limits.min_encoded_length,
            });
        }

        // 3-5. Strip "data:image/...;base64," and decode strictly
        let bytes = decode_segment(strip_delimiter(payload))?;
        if bytes.is_empty() {
            return Err(FrameRejection::DecodedEmpty);
        }
        if bytes.len() > self.limits.max_frame_size {
            return Err(FrameRejection::DecodedTooLarge {
                len: bytes.len(),
                max: self.limits.max_frame_size,
            });
        }

        // 6-8. Header geometry, then bounded decode
        let frame = decode_image(&bytes, &self.limits)?;

        // 9. Admission
        if !self
            .rate_budget
            .admit(session_id, now, self.limits.max_fps_per_session)
        {
            return Err(FrameRejection::RateLimited {
                max_per_second: self.limits.max_fps_per_session,
            });
        }

        tracing::debug!(
            session_id = %session_id,
            width = frame.width,
            height = frame.height,
            bytes = frame.byte_len,
            "Frame accepted"
        );

        Ok(frame)
    }
}

/// Keep only the segment after the last delimiter
fn strip_delimiter(payload: &str) -> &str {
    match payload.rsplit_once(PAYLOAD_DELIMITER) {
        Some((_, segment)) => segment,
        None => payload,
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, FrameRejection> {
    base64::engine::general_purpose::STANDARD
        .decode(segment)
        .map_err(|e| FrameRejection::InvalidEncoding(e.to_string()))
}

/// Check geometry from the image header, then decode under allocation limits
fn decode_image(bytes: &[u8], limits: &GuardLimits) -> Result<DecodedFrame, FrameRejection> {
    let (width, height) = open_reader(bytes)?
        .into_dimensions()
        .map_err(|e| FrameRejection::UndecodableImage(e.to_string()))?;
    check_dimensions(width, height, limits)?;

    let max_side = limits.max_frame_dimension;
    let mut decode_limits = image::Limits::default();
    decode_limits.max_image_width = Some(max_side);
    decode_limits.max_image_height = Some(max_side);
    decode_limits.max_alloc = Some(u64::from(max_side) * u64::from(max_side) * 4);

    let mut reader = open_reader(bytes)?;
    reader.limits(decode_limits);
    let image = reader
        .decode()
        .map_err(|e| FrameRejection::UndecodableImage(e.to_string()))?;

    Ok(DecodedFrame {
        height,
        width,
        channels: COLOUR_CHANNELS,
        source_channels: image.color().channel_count(),
        byte_len: bytes.len(),
    })
}

fn open_reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, FrameRejection> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| FrameRejection::UndecodableImage(e.to_string()))
}

pub(crate) fn check_dimensions(
    width: u32,
    height: u32,
    limits: &GuardLimits,
) -> Result<(), FrameRejection> {
    if width < limits.min_frame_dimension || height < limits.min_frame_dimension {
        return Err(FrameRejection::DimensionsTooSmall {
            width,
            height,
            min: limits.min_frame_dimension,
        });
    }
    if width > limits.max_frame_dimension || height > limits.max_frame_dimension {
        return Err(FrameRejection::DimensionsTooLarge {
            width,
            height,
            max: limits.max_frame_dimension,
        });
    }
    Ok(())
}

/// Validate a session identifier: 1..=max chars of `[A-Za-z0-9_-]`
pub fn validate_session_id(session_id: &str, max_len: usize) -> Result<(), SessionIdRejection> {
    if session_id.is_empty() {
        return Err(SessionIdRejection::Empty);
    }

    let len = session_id.chars().count();
    if len > max_len {
        return Err(SessionIdRejection::TooLong { len, max: max_len });
    }

    if !session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(SessionIdRejection::InvalidCharacters);
    }

    Ok(())
}
