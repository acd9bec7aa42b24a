//! `HubError` maps every failure a component can produce onto the abstract
//! taxonomy in spec §7, and onto a concrete `wbp_protocol::ErrorCode` for
//! the wire.

use wbp_protocol::{ErrorCode, FrameError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum HubError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("session closed")]
    SessionClosed,
    #[error("request timed out")]
    Timeout,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("authentication invalid")]
    AuthInvalid,
    #[error("authentication expired")]
    AuthExpired,
    #[error("ip not allowed")]
    IpNotAllowed,
    #[error("ip blocked, retry after {retry_after_ms}ms")]
    IpBlocked { retry_after_ms: u64 },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("server unavailable: {0}")]
    ServerUnavailable(String),

    #[error("sync conflict: {kind}")]
    SyncConflict { kind: String },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("request failed: {0}")]
    Internal(String),
}

impl HubError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HubError::ConnectionFailed(_) => ErrorCode::ConnectionFailed,
            HubError::SessionClosed => ErrorCode::SessionClosed,
            HubError::Timeout => ErrorCode::Timeout,
            HubError::ProtocolViolation(_) => ErrorCode::ProtocolViolation,
            HubError::UnknownOperation(_) => ErrorCode::UnknownOperation,
            HubError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            HubError::AuthInvalid => ErrorCode::AuthInvalid,
            HubError::AuthExpired => ErrorCode::AuthExpired,
            HubError::IpNotAllowed => ErrorCode::IpNotAllowed,
            HubError::IpBlocked { .. } => ErrorCode::IpBlocked,
            HubError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            HubError::ServerUnavailable(_) => ErrorCode::ServerUnavailable,
            HubError::SyncConflict { .. } => ErrorCode::SyncConflict,
            HubError::RateLimited { .. } => ErrorCode::RateLimited,
            HubError::Internal(_) => ErrorCode::RequestFailed,
        }
    }

    /// Turns this error into the wire-level error shape (spec §6), with the
    /// underlying cause redacted for internal errors.
    pub fn to_frame_error(&self) -> FrameError {
        let message = match self {
            HubError::Internal(_) => "an internal error occurred".to_string(),
            other => other.to_string(),
        };
        FrameError::new(self.code().as_str(), message)
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            HubError::IpBlocked { retry_after_ms } | HubError::RateLimited { retry_after_ms } => {
                Some(*retry_after_ms)
            }
            _ => None,
        }
    }
}
