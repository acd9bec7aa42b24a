//! Event bus (C6, spec §4.6): subscription table, flood suppression, and
//! the explicit tap the message router consumes for `bindingKind=event`
//! bindings (REDESIGN FLAG 2 — no implicit event forwarding).

use crate::model::{Event, Subscription};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use wbp_protocol::SubscriptionId;

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct FloodAlert {
    pub server_id: wbp_protocol::ServerId,
    pub kind_bucket: u64,
}

pub struct EventBus {
    subscriptions: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
    /// `(serverId, kind, minute)` -> count, for flood suppression.
    minute_counts: DashMap<(wbp_protocol::ServerId, String, u64), u32>,
    flood_threshold: u32,
    /// The explicit tap consumed by the message router for event bindings.
    event_tap: broadcast::Sender<Event>,
    dropped_events: DashMap<SubscriptionId, u64>,
}

impl EventBus {
    pub fn new(flood_threshold: u32) -> Self {
        let (event_tap, _) = broadcast::channel(DEFAULT_QUEUE_CAPACITY);
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            minute_counts: DashMap::new(),
            flood_threshold,
            event_tap,
            dropped_events: DashMap::new(),
        }
    }

    pub fn tap(&self) -> broadcast::Receiver<Event> {
        self.event_tap.subscribe()
    }

    pub async fn subscribe(&self, subscription: Subscription) -> SubscriptionId {
        let id = subscription.subscription_id;
        self.subscriptions.write().await.insert(id, subscription);
        id
    }

    /// Leaves bus state identical to before `subscribe` (the idempotence
    /// law in spec §8).
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.write().await.remove(&id).is_some()
    }

    pub async fn active_subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn subscriptions_for_session(&self, session_id: wbp_protocol::SessionId) -> Vec<SubscriptionId> {
        self.subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.session_id == session_id)
            .map(|s| s.subscription_id)
            .collect()
    }

    /// Processes one inbound event: updates flood counters, tests every
    /// subscription's filter, and returns the ids of subscriptions it
    /// matched (delivery to the session's queue is the caller's job, since
    /// only the caller knows the session's outbound channel).
    pub async fn publish(&self, event: Event) -> PublishOutcome {
        let bucket_key = (event.server_id, event.kind.clone(), event.minute_bucket());
        let mut count = self.minute_counts.entry(bucket_key.clone()).or_insert(0);
        *count += 1;
        let suppressed = *count > self.flood_threshold;
        drop(count);

        if suppressed {
            return PublishOutcome {
                matched: Vec::new(),
                flood_alert: if *self.minute_counts.get(&bucket_key).unwrap() == self.flood_threshold + 1 {
                    Some(FloodAlert {
                        server_id: event.server_id,
                        kind_bucket: event.minute_bucket(),
                    })
                } else {
                    None
                },
            };
        }

        let subscriptions = self.subscriptions.read().await;
        let mut matched = Vec::new();
        for (id, sub) in subscriptions.iter() {
            if let Some(scope) = sub.server_id {
                if scope != event.server_id {
                    continue;
                }
            }
            if sub.filter.matches(
                &event.kind,
                event.player_id(),
                event.severity(),
                event.timestamp,
            ) {
                matched.push(*id);
            }
        }
        drop(subscriptions);

        let _ = self.event_tap.send(event);

        PublishOutcome {
            matched,
            flood_alert: None,
        }
    }

    pub async fn touch_subscription(&self, id: SubscriptionId, now: u64) {
        if let Some(sub) = self.subscriptions.write().await.get_mut(&id) {
            sub.last_activity = now;
        }
    }

    pub fn record_dropped(&self, id: SubscriptionId) {
        *self.dropped_events.entry(id).or_insert(0) += 1;
    }

    pub fn dropped_count(&self, id: SubscriptionId) -> u64 {
        self.dropped_events.get(&id).map(|v| *v).unwrap_or(0)
    }

    /// Garbage-collects subscriptions that saw no delivery attempt and no
    /// refresh within `ttl_secs`.
    pub async fn gc_inactive(&self, now: u64, ttl_secs: u64) -> Vec<SubscriptionId> {
        let mut subscriptions = self.subscriptions.write().await;
        let stale: Vec<SubscriptionId> = subscriptions
            .values()
            .filter(|s| s.is_stale(now, ttl_secs))
            .map(|s| s.subscription_id)
            .collect();
        for id in &stale {
            subscriptions.remove(id);
        }
        stale
    }
}

#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub matched: Vec<SubscriptionId>,
    pub flood_alert: Option<FloodAlert>,
}
