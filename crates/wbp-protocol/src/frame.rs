//! The U-WBP v2 wire frame and its encode/decode rules (spec C1).

use crate::ids::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Protocol version this codec speaks. Frames with a mismatched version are
/// a protocol violation and close the session.
pub const CURRENT_VERSION: u32 = 2;

/// Default maximum encoded frame size, in bytes. Configurable per deployment.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Request,
    Response,
    Event,
    Heartbeat,
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameType::Request => "request",
            FrameType::Response => "response",
            FrameType::Event => "event",
            FrameType::Heartbeat => "heartbeat",
        };
        write!(f, "{s}")
    }
}

/// A dotted operation tag, e.g. `server.get_info`, `event.subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Op(pub String);

impl Op {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The part before the first dot, e.g. `server` for `server.get_info`.
    pub fn namespace(&self) -> &str {
        self.0.split('.').next().unwrap_or("")
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Op {
    fn from(s: &str) -> Self {
        Op(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl FrameError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A single U-WBP v2 frame. `id` is empty for events and heartbeats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<Op>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: u64,
    pub version: u32,
    #[serde(rename = "serverId", skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FrameError>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameCodecError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame of {actual} bytes exceeds max size {max}")]
    TooLarge { actual: usize, max: usize },
    #[error("unsupported protocol version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

impl Frame {
    pub fn request(id: impl Into<String>, op: impl Into<Op>, data: Value, timestamp: u64) -> Self {
        Self {
            frame_type: FrameType::Request,
            id: Some(id.into()),
            op: Some(op.into()),
            data: Some(data),
            timestamp,
            version: CURRENT_VERSION,
            server_id: None,
            error: None,
        }
    }

    pub fn response(
        id: impl Into<String>,
        op: impl Into<Op>,
        data: Value,
        timestamp: u64,
    ) -> Self {
        Self {
            frame_type: FrameType::Response,
            id: Some(id.into()),
            op: Some(op.into()),
            data: Some(data),
            timestamp,
            version: CURRENT_VERSION,
            server_id: None,
            error: None,
        }
    }

    pub fn error_response(
        id: impl Into<String>,
        op: impl Into<Op>,
        error: FrameError,
        timestamp: u64,
    ) -> Self {
        Self {
            frame_type: FrameType::Response,
            id: Some(id.into()),
            op: Some(op.into()),
            data: Some(serde_json::json!({ "success": false })),
            timestamp,
            version: CURRENT_VERSION,
            server_id: None,
            error: Some(error),
        }
    }

    pub fn event(op: impl Into<Op>, data: Value, server_id: SessionId, timestamp: u64) -> Self {
        Self {
            frame_type: FrameType::Event,
            id: None,
            op: Some(op.into()),
            data: Some(data),
            timestamp,
            version: CURRENT_VERSION,
            server_id: Some(server_id.to_string()),
            error: None,
        }
    }

    pub fn heartbeat(timestamp: u64) -> Self {
        Self {
            frame_type: FrameType::Heartbeat,
            id: None,
            op: None,
            data: None,
            timestamp,
            version: CURRENT_VERSION,
            server_id: None,
            error: None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameCodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8], max_size: usize) -> Result<Self, FrameCodecError> {
        if bytes.len() > max_size {
            return Err(FrameCodecError::TooLarge {
                actual: bytes.len(),
                max: max_size,
            });
        }
        let frame: Frame = serde_json::from_slice(bytes)?;
        if frame.version != CURRENT_VERSION {
            return Err(FrameCodecError::VersionMismatch {
                found: frame.version,
                expected: CURRENT_VERSION,
            });
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let frame = Frame::request("req-1", Op::new("server.get_info"), serde_json::json!({}), 1);
        let bytes = frame.encode().unwrap();
        let decoded = Frame::decode(&bytes, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(decoded.id, frame.id);
        assert_eq!(decoded.op.unwrap().0, "server.get_info");
    }

    #[test]
    fn response_echoes_request_id_and_op() {
        let req = Frame::request("abc", Op::new("system.ping"), serde_json::json!({}), 1);
        let resp = Frame::response(
            req.id.clone().unwrap(),
            req.op.clone().unwrap(),
            serde_json::json!({"success": true}),
            2,
        );
        assert_eq!(resp.id, req.id);
        assert_eq!(resp.op, req.op);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let big = vec![b'a'; 10];
        let err = Frame::decode(&big, 5).unwrap_err();
        assert!(matches!(err, FrameCodecError::TooLarge { .. }));
    }

    #[test]
    fn mismatched_version_is_rejected() {
        let mut frame = Frame::heartbeat(1);
        frame.version = 1;
        let bytes = serde_json::to_vec(&frame).unwrap();
        let err = Frame::decode(&bytes, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, FrameCodecError::VersionMismatch { .. }));
    }

    #[test]
    fn heartbeat_has_no_id_or_op() {
        let hb = Frame::heartbeat(42);
        let bytes = hb.encode().unwrap();
        let decoded = Frame::decode(&bytes, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert!(decoded.id.is_none());
        assert!(decoded.op.is_none());
    }

    #[test]
    fn op_namespace_splits_on_first_dot() {
        assert_eq!(Op::new("whitelist.add").namespace(), "whitelist");
    }
}
