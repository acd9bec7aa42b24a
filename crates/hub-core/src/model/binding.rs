use serde::{Deserialize, Serialize};
use wbp_protocol::{BindingId, ServerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    Chat,
    Event,
    Command,
    Monitoring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterRule {
    Regex { pattern: String, action: FilterAction },
    Keyword { words: Vec<String>, action: FilterAction },
    Length { max: usize, action: FilterAction },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    Block,
    Transform,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub max_messages: u32,
    pub window_ms: u64,
}

/// A configured mapping from an external chat group to a server for one
/// routing kind. At most one binding may exist per
/// `(group_id, server_id, binding_kind)` — enforced by the message router's
/// binding table, not by this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub binding_id: BindingId,
    pub group_id: String,
    pub server_id: ServerId,
    pub binding_kind: BindingKind,
    pub filters: Vec<FilterRule>,
    pub format_template: String,
    pub rate_limit: RateLimitWindow,
    pub enabled: bool,
    /// Not persisted across restarts — see the cold-start note in the
    /// message router's health signal.
    pub last_activity: u64,
    /// For `BindingKind::Event` bindings, the event kinds this binding
    /// forwards; empty means every kind on the bound server.
    pub event_kinds: Vec<String>,
}

impl Binding {
    pub fn new(group_id: impl Into<String>, server_id: ServerId, binding_kind: BindingKind, now: u64) -> Self {
        Self {
            binding_id: BindingId::new(),
            group_id: group_id.into(),
            server_id,
            binding_kind,
            filters: Vec::new(),
            format_template: "{content}".to_string(),
            rate_limit: RateLimitWindow {
                max_messages: 10,
                window_ms: 60_000,
            },
            enabled: true,
            last_activity: now,
            event_kinds: Vec::new(),
        }
    }
}
