use serde::{Deserialize, Serialize};
use wbp_protocol::ServerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    WhitelistMismatch,
    PlayerIdentity,
    OperationConflict,
    DataVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    ServerWins,
    ClientWins,
    Merge,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConflict {
    pub server_id: ServerId,
    pub kind: ConflictKind,
    pub data: serde_json::Value,
    pub severity: String,
    pub resolution: ResolutionStrategy,
    pub resolved: bool,
}

impl SyncConflict {
    pub fn new(server_id: ServerId, kind: ConflictKind, data: serde_json::Value, severity: impl Into<String>) -> Self {
        Self {
            server_id,
            kind,
            data,
            severity: severity.into(),
            resolution: ResolutionStrategy::Manual,
            resolved: false,
        }
    }
}
