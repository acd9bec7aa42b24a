//! Message router (C9, spec §4.9): fans messages between external "group"
//! sources and bound servers.

use crate::messaging::filters::{apply_pipeline, FilterOutcome};
use crate::messaging::template::{render, TemplateContext};
use crate::model::{Binding, BindingKind, Event};
use dashmap::DashMap;
use std::collections::VecDeque;
use wbp_protocol::ServerId;

#[derive(Debug, Clone)]
pub struct IncomingGroupMessage {
    pub group_id: String,
    pub user_id: String,
    pub user_name: String,
    pub content: String,
    pub at: u64,
}

#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub server_id: ServerId,
    pub content: String,
}

/// A server event rendered for delivery to one bound external group
/// (reverse direction of `route_incoming`).
#[derive(Debug, Clone)]
pub struct OutgoingGroupMessage {
    pub group_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterHealth {
    Healthy,
    Degraded,
}

struct RateLimitState {
    window_start: u64,
    count: u32,
}

const DEGRADED_ERROR_RATE: f64 = 0.10;
const ERROR_WINDOW_SECS: u64 = 24 * 3600;

struct ErrorWindow {
    events: VecDeque<(u64, bool)>,
}

impl ErrorWindow {
    fn new() -> Self {
        Self { events: VecDeque::new() }
    }

    fn record(&mut self, now: u64, is_error: bool) {
        self.events.push_back((now, is_error));
        while let Some((ts, _)) = self.events.front() {
            if now.saturating_sub(*ts) > ERROR_WINDOW_SECS {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn error_rate(&self) -> f64 {
        if self.events.is_empty() {
            return 0.0;
        }
        let errors = self.events.iter().filter(|(_, e)| *e).count();
        errors as f64 / self.events.len() as f64
    }
}

pub struct MessageRouter {
    /// `(groupId, bindingKind) -> [Binding]`, the routing table's forward direction.
    bindings: DashMap<(String, BindingKind), Vec<Binding>>,
    rate_limits: DashMap<(String, ServerId), RateLimitState>,
    error_window: std::sync::Mutex<ErrorWindow>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
            rate_limits: DashMap::new(),
            error_window: std::sync::Mutex::new(ErrorWindow::new()),
        }
    }

    /// Adds a binding, enforcing at most one per `(groupId, serverId,
    /// bindingKind)` by replacing an existing match.
    pub fn add_binding(&self, binding: Binding) {
        let key = (binding.group_id.clone(), binding.binding_kind);
        let mut list = self.bindings.entry(key).or_insert_with(Vec::new);
        list.retain(|b| b.server_id != binding.server_id);
        list.push(binding);
    }

    pub fn remove_binding(&self, group_id: &str, server_id: ServerId, kind: BindingKind) {
        if let Some(mut list) = self.bindings.get_mut(&(group_id.to_string(), kind)) {
            list.retain(|b| b.server_id != server_id);
        }
    }

    /// Steps 1-6 of spec §4.9 for a single incoming group chat message.
    pub fn route_incoming(&self, msg: IncomingGroupMessage, now: u64) -> Vec<OutgoingMessage> {
        let Some(bindings) = self.bindings.get(&(msg.group_id.clone(), BindingKind::Chat)) else {
            return Vec::new();
        };
        let mut outgoing = Vec::new();
        for binding in bindings.iter() {
            if !binding.enabled {
                continue;
            }
            if self.is_rate_limited(&msg.group_id, binding, now) {
                self.record_outcome(false, now);
                continue;
            }
            match apply_pipeline(&binding.filters, msg.content.clone()) {
                FilterOutcome::Blocked => {
                    self.record_outcome(false, now);
                    continue;
                }
                FilterOutcome::Pass(content) => {
                    let rendered = render(
                        &binding.format_template,
                        &TemplateContext {
                            username: &msg.user_name,
                            content: &content,
                            group: &msg.group_id,
                            time: &now.to_string(),
                        },
                    );
                    self.record_outcome(true, now);
                    outgoing.push(OutgoingMessage {
                        server_id: binding.server_id,
                        content: rendered,
                    });
                }
            }
        }
        outgoing
    }

    /// Reverse direction (REDESIGN FLAG 2): consumes one event off the (C6)
    /// tap and turns it into zero or more outbound group messages, one per
    /// `bindingKind=event` binding bound to the event's server whose
    /// `event_kinds` allow-list (empty = everything) includes this kind.
    pub fn route_event(&self, event: &Event, now: u64) -> Vec<OutgoingGroupMessage> {
        let mut outgoing = Vec::new();
        for entry in self.bindings.iter() {
            let (group_id, kind) = entry.key();
            if *kind != BindingKind::Event {
                continue;
            }
            for binding in entry.value() {
                if binding.server_id != event.server_id || !binding.enabled {
                    continue;
                }
                if !binding.event_kinds.is_empty() && !binding.event_kinds.iter().any(|k| k == &event.kind) {
                    continue;
                }
                if self.is_rate_limited(group_id, binding, now) {
                    self.record_outcome(false, now);
                    continue;
                }
                let content = event_content(event);
                match apply_pipeline(&binding.filters, content) {
                    FilterOutcome::Blocked => {
                        self.record_outcome(false, now);
                        continue;
                    }
                    FilterOutcome::Pass(content) => {
                        let rendered = render(
                            &binding.format_template,
                            &TemplateContext {
                                username: event.player_id().unwrap_or("server"),
                                content: &content,
                                group: group_id,
                                time: &now.to_string(),
                            },
                        );
                        self.record_outcome(true, now);
                        outgoing.push(OutgoingGroupMessage {
                            group_id: group_id.clone(),
                            content: rendered,
                        });
                    }
                }
            }
        }
        outgoing
    }

    fn is_rate_limited(&self, group_id: &str, binding: &Binding, now: u64) -> bool {
        let key = (group_id.to_string(), binding.server_id);
        let mut state = self.rate_limits.entry(key).or_insert_with(|| RateLimitState {
            window_start: now,
            count: 0,
        });
        if now.saturating_sub(state.window_start) > binding.rate_limit.window_ms / 1000 {
            state.window_start = now;
            state.count = 0;
        }
        if state.count >= binding.rate_limit.max_messages {
            return true;
        }
        state.count += 1;
        false
    }

    fn record_outcome(&self, success: bool, now: u64) {
        let mut window = self.error_window.lock().expect("error window lock poisoned");
        window.record(now, !success);
    }

    pub fn health(&self) -> RouterHealth {
        let window = self.error_window.lock().expect("error window lock poisoned");
        if window.error_rate() >= DEGRADED_ERROR_RATE {
            RouterHealth::Degraded
        } else {
            RouterHealth::Healthy
        }
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn event_content(event: &Event) -> String {
    event
        .payload
        .get("message")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| event.kind.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilterAction, FilterRule};

    fn binding_with_filter(server_id: ServerId) -> Binding {
        let mut binding = Binding::new("g1", server_id, BindingKind::Chat, 0);
        binding.filters = vec![FilterRule::Regex {
            pattern: "badword".into(),
            action: FilterAction::Block,
        }];
        binding.format_template = "<{username}> {content}".to_string();
        binding.rate_limit.max_messages = 10;
        binding.rate_limit.window_ms = 60_000;
        binding
    }

    #[test]
    fn blocked_message_produces_no_outgoing_message() {
        let router = MessageRouter::new();
        let server_id = ServerId::new();
        router.add_binding(binding_with_filter(server_id));

        let msg = IncomingGroupMessage {
            group_id: "g1".into(),
            user_id: "u7".into(),
            user_name: "Bob".into(),
            content: "hello badword world".into(),
            at: 0,
        };
        let out = router.route_incoming(msg, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn passing_message_is_rendered_via_template() {
        let router = MessageRouter::new();
        let server_id = ServerId::new();
        router.add_binding(binding_with_filter(server_id));

        let msg = IncomingGroupMessage {
            group_id: "g1".into(),
            user_id: "u7".into(),
            user_name: "Bob".into(),
            content: "hi".into(),
            at: 0,
        };
        let out = router.route_incoming(msg, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "<Bob> hi");
        assert_eq!(out[0].server_id, server_id);
    }

    #[test]
    fn rate_limit_drops_excess_messages_within_window() {
        let router = MessageRouter::new();
        let server_id = ServerId::new();
        let mut binding = binding_with_filter(server_id);
        binding.rate_limit.max_messages = 1;
        router.add_binding(binding);

        let msg = |content: &str| IncomingGroupMessage {
            group_id: "g1".into(),
            user_id: "u7".into(),
            user_name: "Bob".into(),
            content: content.into(),
            at: 0,
        };
        let first = router.route_incoming(msg("hi"), 0);
        let second = router.route_incoming(msg("hi again"), 1);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn health_degrades_when_error_rate_crosses_threshold() {
        let router = MessageRouter::new();
        for i in 0..10u64 {
            router.record_outcome(i < 8, i);
        }
        assert_eq!(router.health(), RouterHealth::Degraded);
    }

    #[test]
    fn at_most_one_binding_per_group_server_kind_triple() {
        let router = MessageRouter::new();
        let server_id = ServerId::new();
        router.add_binding(binding_with_filter(server_id));
        let mut replacement = binding_with_filter(server_id);
        replacement.format_template = "{content} only".to_string();
        router.add_binding(replacement);

        let out = router.route_incoming(
            IncomingGroupMessage {
                group_id: "g1".into(),
                user_id: "u1".into(),
                user_name: "Bob".into(),
                content: "hi".into(),
                at: 0,
            },
            0,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "hi only");
    }

    #[test]
    fn route_event_forwards_to_bound_groups_matching_kind() {
        let router = MessageRouter::new();
        let server_id = ServerId::new();
        let mut binding = Binding::new("g1", server_id, BindingKind::Event, 0);
        binding.event_kinds = vec!["player.chat".to_string()];
        binding.format_template = "[{group}] <{username}> {content}".to_string();
        router.add_binding(binding);

        let matching = Event::new(server_id, "player.chat", serde_json::json!({"playerId": "Bob", "message": "hi"}), 1);
        let out = router.route_event(&matching, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].group_id, "g1");
        assert_eq!(out[0].content, "[g1] <Bob> hi");

        let other_kind = Event::new(server_id, "player.leave", serde_json::json!({"playerId": "Bob"}), 2);
        assert!(router.route_event(&other_kind, 2).is_empty());
    }
}
