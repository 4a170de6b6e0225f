//! # Cadence Protocol Library
//!
//! This crate defines the messages exchanged between the Cadence daemon and
//! its clients, and the framing used to delimit them on a local connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Request / Response (JSON)        │
//! ├─────────────────────────────────────────┤
//! │      Framing (2-byte length prefix)     │
//! ├─────────────────────────────────────────┤
//! │       Transport (Unix domain socket)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{FrameCodec, Request, messages::ARG_SESSION_ID};
//!
//! let request = Request::new("session", "pause").with_argument(ARG_SESSION_ID, "reading");
//! let bytes = request.to_frame_bytes().unwrap();
//!
//! let (frame, _) = FrameCodec::new().decode(&bytes).unwrap();
//! assert_eq!(Request::from_json(&frame.payload).unwrap(), request);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Request and response definitions
//! - [`framing`]: Length-prefixed frame codec
//! - [`error`]: Error types

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use framing::{
    decode_length, encode_length, Frame, FrameCodec, LENGTH_PREFIX_SIZE, MAX_PAYLOAD_SIZE,
};
pub use messages::{Request, Response, StatusCode, COMMAND_CONFIG, COMMAND_SESSION};
