use serde::{Deserialize, Serialize};
use wbp_protocol::{PendingOperationId, ServerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOperationStatus {
    Pending,
    Replayed,
    Expired,
}

/// A deferred side-effect queued against a server that was unreachable at
/// the time it was issued (spec §3, §4.8b).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    pub op_id: PendingOperationId,
    pub server_id: ServerId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: u64,
    pub expires_at: u64,
    pub status: PendingOperationStatus,
}

impl PendingOperation {
    pub fn new(server_id: ServerId, kind: impl Into<String>, payload: serde_json::Value, now: u64, ttl_secs: u64) -> Self {
        Self {
            op_id: PendingOperationId::new(),
            server_id,
            kind: kind.into(),
            payload,
            created_at: now,
            expires_at: now + ttl_secs,
            status: PendingOperationStatus::Pending,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// The set of operations the degrader is allowed to cache for later replay.
///
/// `player.kick` is deliberately excluded: the degradation strategy table
/// marks it critical (surface failure immediately), which takes precedence
/// over its mention in the general cacheable-set list.
pub const CACHEABLE_OPERATIONS: &[&str] = &[
    "whitelist.add",
    "whitelist.remove",
    "server.broadcast",
    "player.message",
];

pub fn is_cacheable(op: &str) -> bool {
    CACHEABLE_OPERATIONS.contains(&op)
}
