use serde::{Deserialize, Serialize};
use wbp_protocol::{EventId, ServerId};

/// An immutable event as it flows through the bus exactly as received from
/// an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub server_id: ServerId,
    pub kind: String,
    pub timestamp: u64,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(server_id: ServerId, kind: impl Into<String>, payload: serde_json::Value, timestamp: u64) -> Self {
        Self {
            event_id: EventId::new(),
            server_id,
            kind: kind.into(),
            timestamp,
            payload,
        }
    }

    pub fn player_id(&self) -> Option<&str> {
        self.payload.get("playerId").and_then(|v| v.as_str())
    }

    pub fn severity(&self) -> Option<&str> {
        self.payload.get("severity").and_then(|v| v.as_str())
    }

    /// The minute-bucket this event falls in, for flood-aggregation counters.
    pub fn minute_bucket(&self) -> u64 {
        self.timestamp / 60
    }
}
