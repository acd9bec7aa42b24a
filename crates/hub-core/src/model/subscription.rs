use std::collections::HashSet;
use wbp_protocol::{ServerId, SessionId, SubscriptionId};

/// Filter predicates for a subscription. `None` on any field means "no
/// constraint on that dimension"; a match requires every `Some` predicate
/// to hold.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kinds: Option<HashSet<String>>,
    pub player_id: Option<String>,
    pub severity: Option<String>,
    pub time_range: Option<(u64, u64)>,
}

impl EventFilter {
    pub fn basic() -> Self {
        let mut kinds = HashSet::new();
        for k in ["player.join", "player.leave", "player.chat", "server.status"] {
            kinds.insert(k.to_string());
        }
        Self {
            kinds: Some(kinds),
            ..Default::default()
        }
    }

    pub fn extended() -> Self {
        let mut kinds = HashSet::new();
        for k in [
            "player.join",
            "player.leave",
            "player.chat",
            "server.status",
            "command.executed",
            "world.state",
            "diagnostics.report",
        ] {
            kinds.insert(k.to_string());
        }
        Self {
            kinds: Some(kinds),
            ..Default::default()
        }
    }

    pub fn matches(
        &self,
        kind: &str,
        player_id: Option<&str>,
        severity: Option<&str>,
        at: u64,
    ) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(kind) {
                return false;
            }
        }
        if let Some(expected) = &self.player_id {
            if Some(expected.as_str()) != player_id {
                return false;
            }
        }
        if let Some(expected) = &self.severity {
            if Some(expected.as_str()) != severity {
                return false;
            }
        }
        if let Some((start, end)) = self.time_range {
            if at < start || at > end {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub subscription_id: SubscriptionId,
    pub session_id: SessionId,
    pub server_id: Option<ServerId>,
    pub filter: EventFilter,
    pub created_at: u64,
    pub last_activity: u64,
    pub active: bool,
}

impl Subscription {
    pub fn new(session_id: SessionId, server_id: Option<ServerId>, filter: EventFilter, now: u64) -> Self {
        Self {
            subscription_id: SubscriptionId::new(),
            session_id,
            server_id,
            filter,
            created_at: now,
            last_activity: now,
            active: true,
        }
    }

    pub fn is_stale(&self, now: u64, ttl_secs: u64) -> bool {
        now.saturating_sub(self.last_activity) > ttl_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_preset_excludes_extended_kinds() {
        let filter = EventFilter::basic();
        assert!(filter.matches("player.chat", None, None, 0));
        assert!(!filter.matches("world.state", None, None, 0));
    }

    #[test]
    fn unconstrained_filter_matches_everything() {
        let filter = EventFilter::default();
        assert!(filter.matches("anything", Some("p1"), Some("critical"), 12345));
    }

    #[test]
    fn player_id_predicate_is_enforced() {
        let mut filter = EventFilter::default();
        filter.player_id = Some("p1".into());
        assert!(filter.matches("k", Some("p1"), None, 0));
        assert!(!filter.matches("k", Some("p2"), None, 0));
        assert!(!filter.matches("k", None, None, 0));
    }

    #[test]
    fn stale_detection_uses_ttl() {
        let sub = Subscription::new(SessionId::new(), None, EventFilter::default(), 0);
        assert!(!sub.is_stale(100, 200));
        assert!(sub.is_stale(300, 200));
    }
}
