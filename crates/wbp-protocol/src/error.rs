//! The abstract error taxonomy (spec §7), shared between the wire codec and
//! the core so handler results map onto frame errors without translation.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Error codes carried on the wire, grouped by the kind that produces them.
/// Retry/backoff/escalation behavior lives in `hub_core`; this enum only
/// fixes the wire-visible code string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Transport
    ConnectionFailed,
    SessionClosed,
    Timeout,
    // Protocol
    ProtocolViolation,
    UnknownOperation,
    InvalidRequest,
    // Authentication
    AuthInvalid,
    AuthExpired,
    IpNotAllowed,
    IpBlocked,
    // Authorization
    PermissionDenied,
    // Availability
    ServerUnavailable,
    // Conflict
    SyncConflict,
    // Rate
    RateLimited,
    // Internal
    RequestFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::SessionClosed => "SESSION_CLOSED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ProtocolViolation => "PROTOCOL_VIOLATION",
            ErrorCode::UnknownOperation => "UNKNOWN_OPERATION",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::AuthInvalid => "AUTH_INVALID",
            ErrorCode::AuthExpired => "AUTH_EXPIRED",
            ErrorCode::IpNotAllowed => "IP_NOT_ALLOWED",
            ErrorCode::IpBlocked => "IP_BLOCKED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::ServerUnavailable => "SERVER_UNAVAILABLE",
            ErrorCode::SyncConflict => "SYNC_CONFLICT",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::RequestFailed => "REQUEST_FAILED",
        }
    }

    /// Whether (C7) should schedule an automatic retry for this code.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionFailed | ErrorCode::SessionClosed | ErrorCode::Timeout
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_codes_are_retryable() {
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::ConnectionFailed.is_retryable());
    }

    #[test]
    fn auth_codes_are_not_retryable() {
        assert!(!ErrorCode::IpBlocked.is_retryable());
        assert!(!ErrorCode::AuthInvalid.is_retryable());
    }

    #[test]
    fn as_str_matches_wire_shape() {
        assert_eq!(ErrorCode::UnknownOperation.as_str(), "UNKNOWN_OPERATION");
    }
}
