use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use wbp_protocol::ServerId;

/// One of the three transport variants a server can be reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Plugin,
    Rcon,
    Terminal,
}

/// The remote engine family; opaque to routing, carried for display/audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoreKind(pub String);

/// Per-mode connection parameters, e.g. rcon host/port/password, terminal
/// working directory, plugin socket address. Kept opaque to the core beyond
/// simple key/value pairs; adapters interpret their own keys.
pub type ConnectionConfig = HashMap<String, serde_json::Value>;

/// A registered remote server. Owned by the persistent store; the core holds
/// a read-through copy for routing decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub server_id: ServerId,
    pub core_kind: CoreKind,
    pub preferred_mode: Mode,
    /// Fallback order after `preferred_mode`, used by the mode manager.
    pub mode_preference: Vec<Mode>,
    pub connection_config: HashMap<Mode, ConnectionConfig>,
    pub owner_id: String,
    pub tags: Vec<String>,
}

impl ServerDescriptor {
    pub fn new(server_id: ServerId, core_kind: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            server_id,
            core_kind: CoreKind(core_kind.into()),
            preferred_mode: Mode::Plugin,
            mode_preference: vec![Mode::Plugin, Mode::Rcon, Mode::Terminal],
            connection_config: HashMap::new(),
            owner_id: owner_id.into(),
            tags: Vec::new(),
        }
    }

    /// The ordered list of modes to attempt, `preferred_mode` first, with
    /// the rest of `mode_preference` following (duplicates removed).
    pub fn candidate_modes(&self) -> Vec<Mode> {
        let mut modes = vec![self.preferred_mode];
        for m in &self.mode_preference {
            if !modes.contains(m) {
                modes.push(*m);
            }
        }
        modes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_modes_puts_preferred_first_and_dedupes() {
        let mut d = ServerDescriptor::new(ServerId::new(), "vanilla", "owner-1");
        d.preferred_mode = Mode::Rcon;
        d.mode_preference = vec![Mode::Plugin, Mode::Rcon, Mode::Terminal];
        assert_eq!(d.candidate_modes(), vec![Mode::Rcon, Mode::Plugin, Mode::Terminal]);
    }
}
