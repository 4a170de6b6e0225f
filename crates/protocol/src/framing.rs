//! Frame codec for the 2-byte length-prefixed transport framing.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - 1 byte: payload length / 256 (high byte)
//! - 1 byte: payload length & 0xFF (low byte)
//! - N bytes: UTF-8 encoded JSON payload
//!
//! A frame with a zero length carries no payload and signals that the peer
//! is disconnecting.

use crate::error::{ProtocolError, Result};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The payload bytes, without the length prefix.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame with the given payload.
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// The zero-length frame a client sends before closing.
    pub fn disconnect() -> Self {
        Self {
            payload: Vec::new(),
        }
    }

    /// Whether this frame is the disconnect sentinel.
    #[inline]
    pub fn is_disconnect(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Encode a payload length as the 2-byte prefix.
pub fn encode_length(len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok([(len / 256) as u8, (len & 0xFF) as u8])
}

/// Decode the 2-byte prefix into a payload length.
#[inline]
pub fn decode_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> usize {
    usize::from(prefix[0]) * 256 + usize::from(prefix[1])
}

/// Encoder and decoder for frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        Self
    }

    /// Encode a frame into bytes.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let prefix = encode_length(frame.payload.len())?;

        let mut output = Vec::with_capacity(LENGTH_PREFIX_SIZE + frame.payload.len());
        output.extend_from_slice(&prefix);
        output.extend_from_slice(&frame.payload);
        Ok(output)
    }

    /// Decode a frame from bytes.
    ///
    /// Returns the decoded frame and the number of bytes consumed.
    pub fn decode(&self, data: &[u8]) -> Result<(Frame, usize)> {
        match self.try_decode(data)? {
            Some(decoded) => Ok(decoded),
            None => Err(ProtocolError::Deserialization(format!(
                "insufficient data for frame: have {} bytes",
                data.len()
            ))),
        }
    }

    /// Try to decode a frame from bytes, returning None if there isn't enough data.
    ///
    /// This is useful for streaming scenarios where you may receive partial frames.
    pub fn try_decode(&self, data: &[u8]) -> Result<Option<(Frame, usize)>> {
        if data.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let len = decode_length([data[0], data[1]]);
        let total = LENGTH_PREFIX_SIZE + len;
        if data.len() < total {
            return Ok(None);
        }

        let frame = Frame::new(data[LENGTH_PREFIX_SIZE..total].to_vec());
        Ok(Some((frame, total)))
    }
}
