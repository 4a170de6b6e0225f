//! Protocol message definitions for Cadence.
//!
//! A client sends one [`Request`] per frame and receives exactly one
//! [`Response`] per request. Both are serialized as JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::framing::{Frame, FrameCodec};

/// Command family for session management.
pub const COMMAND_SESSION: &str = "session";
/// Command family for session template management.
pub const COMMAND_CONFIG: &str = "config";

/// Argument key naming a session.
pub const ARG_SESSION_ID: &str = "session-id";
/// Argument key naming a session template.
pub const ARG_SESSION_CONFIG_ID: &str = "session-config-id";
/// Argument key for a focus phase duration.
pub const ARG_FOCUS_DURATION: &str = "focus-duration";
/// Argument key for a break phase duration.
pub const ARG_BREAK_DURATION: &str = "break-duration";
/// Argument key for the delay inserted between phases.
pub const ARG_DELAY_BETWEEN_PHASES: &str = "delay-between-phases";
/// Argument key for the number of cycles to run.
pub const ARG_TARGET_CYCLES: &str = "target-cycles";

/// A request sent from a client to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Command family, e.g. `session`.
    pub command_type: String,
    /// Operation within the family, e.g. `pause`.
    pub subcommand_type: String,
    /// Named string arguments.
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
}

impl Request {
    /// Create a request without arguments.
    pub fn new(command_type: impl Into<String>, subcommand_type: impl Into<String>) -> Self {
        Self {
            command_type: command_type.into(),
            subcommand_type: subcommand_type.into(),
            arguments: BTreeMap::new(),
        }
    }

    /// Add an argument, builder style.
    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Look up an argument, treating blank values as absent.
    pub fn argument(&self, key: &str) -> Option<&str> {
        self.arguments
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Serialize to a JSON payload.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from a JSON payload.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)?;
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize and wrap in a length-prefixed frame.
    pub fn to_frame_bytes(&self) -> Result<Vec<u8>> {
        FrameCodec::new().encode(&Frame::new(self.to_json()?))
    }
}

/// Status codes carried in a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum StatusCode {
    /// The command succeeded.
    Ok,
    /// The command was rejected: bad arguments, unknown id, conflict.
    BadRequest,
    /// The daemon failed while processing the command.
    Error,
}

impl StatusCode {
    /// Numeric representation on the wire.
    pub fn as_u16(self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Error => 500,
        }
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> Self {
        code.as_u16()
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            200 => Ok(StatusCode::Ok),
            400 => Ok(StatusCode::BadRequest),
            500 => Ok(StatusCode::Error),
            other => Err(ProtocolError::UnknownStatusCode(other)),
        }
    }
}

/// A response sent from the daemon to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Outcome class.
    pub status_code: StatusCode,
    /// Whether the command succeeded.
    pub success: bool,
    /// Human-readable message.
    pub message: String,
}

impl Response {
    /// A successful response.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::Ok,
            success: true,
            message: message.into(),
        }
    }

    /// A rejected request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::BadRequest,
            success: false,
            message: message.into(),
        }
    }

    /// An internal failure.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::Error,
            success: false,
            message: message.into(),
        }
    }

    /// Serialize to a JSON payload.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from a JSON payload.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)?;
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize and wrap in a length-prefixed frame.
    pub fn to_frame_bytes(&self) -> Result<Vec<u8>> {
        FrameCodec::new().encode(&Frame::new(self.to_json()?))
    }
}
