//! Business-error degrader (C8, spec §4.8): permission-denial escalation,
//! unavailable-server operation caching, and sync-conflict resolution.

use crate::error::HubError;
use crate::model::{
    is_cacheable, ConflictKind, PendingOperation, PendingOperationStatus, ResolutionStrategy,
    SyncConflict,
};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::warn;
use wbp_protocol::{PendingOperationId, ServerId};

#[derive(Debug, Clone)]
pub struct DegraderConfig {
    pub max_permission_retries: u32,
    pub max_cached_operations: usize,
    pub cache_expiration_secs: u64,
    pub whitelist_conflict_strategy: ResolutionStrategy,
    pub data_version_strategy: ResolutionStrategy,
}

impl Default for DegraderConfig {
    fn default() -> Self {
        Self {
            max_permission_retries: 3,
            max_cached_operations: 100,
            cache_expiration_secs: 3600,
            whitelist_conflict_strategy: ResolutionStrategy::Merge,
            data_version_strategy: ResolutionStrategy::Manual,
        }
    }
}

/// One candidate add/remove operation on a `target` (e.g. a player id),
/// fed into `resolve_operation_conflict`.
#[derive(Debug, Clone)]
pub struct ConflictingOp {
    pub target: String,
    pub direction: OperationDirection,
    pub timestamp: u64,
    pub op_id: PendingOperationId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationDirection {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationStrategy {
    Critical,
    AttemptOtherServer,
    Cache,
    NotAvailable,
}

pub fn strategy_for(op: &str) -> DegradationStrategy {
    if op == "player.kick" {
        DegradationStrategy::Critical
    } else if op == "server.broadcast" {
        DegradationStrategy::AttemptOtherServer
    } else if op.starts_with("whitelist.") {
        DegradationStrategy::Cache
    } else {
        DegradationStrategy::NotAvailable
    }
}

pub struct BusinessErrorDegrader {
    config: DegraderConfig,
    permission_denials: DashMap<String, AtomicU32>,
    queues: DashMap<ServerId, VecDeque<PendingOperation>>,
}

impl BusinessErrorDegrader {
    pub fn new(config: DegraderConfig) -> Self {
        Self {
            config,
            permission_denials: DashMap::new(),
            queues: DashMap::new(),
        }
    }

    /// (a) Permission-denial escalation. Returns `true` if the threshold was
    /// crossed and `permissionEscalation` should be emitted.
    pub fn record_permission_denial(&self, subject: &str) -> bool {
        let counter = self
            .permission_denials
            .entry(subject.to_string())
            .or_insert_with(|| AtomicU32::new(0));
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.config.max_permission_retries {
            warn!(subject, count, "permission escalation");
            true
        } else {
            false
        }
    }

    /// (b) Decides what happens to an operation against an unreachable
    /// server: cache it, escalate as critical, suggest another server, or
    /// surface unavailability.
    pub fn handle_unavailable(
        &self,
        server_id: ServerId,
        op: &str,
        payload: serde_json::Value,
        now: u64,
    ) -> Result<PendingOperationId, HubError> {
        if is_cacheable(op) {
            return Ok(self.enqueue(server_id, op, payload, now));
        }
        match strategy_for(op) {
            DegradationStrategy::Critical => Err(HubError::ServerUnavailable(format!(
                "{op} cannot be deferred"
            ))),
            DegradationStrategy::AttemptOtherServer => Err(HubError::ServerUnavailable(format!(
                "{op} should be retried on another server bound to the same group"
            ))),
            DegradationStrategy::Cache => Ok(self.enqueue(server_id, op, payload, now)),
            DegradationStrategy::NotAvailable => {
                Err(HubError::ServerUnavailable("degradationNotAvailable".into()))
            }
        }
    }

    fn enqueue(&self, server_id: ServerId, op: &str, payload: serde_json::Value, now: u64) -> PendingOperationId {
        let entry = PendingOperation::new(server_id, op, payload, now, self.config.cache_expiration_secs);
        let id = entry.op_id;
        let mut queue = self.queues.entry(server_id).or_insert_with(VecDeque::new);
        if queue.len() >= self.config.max_cached_operations {
            queue.pop_front();
        }
        queue.push_back(entry);
        id
    }

    pub fn queue_len(&self, server_id: ServerId) -> usize {
        self.queues.get(&server_id).map(|q| q.len()).unwrap_or(0)
    }

    /// Sweeps a server's queue, marking overdue entries expired.
    pub fn sweep_expired(&self, server_id: ServerId, now: u64) {
        if let Some(mut queue) = self.queues.get_mut(&server_id) {
            for entry in queue.iter_mut() {
                if entry.status == PendingOperationStatus::Pending && entry.is_expired(now) {
                    entry.status = PendingOperationStatus::Expired;
                }
            }
        }
    }

    /// Replays pending operations for a recovered server in FIFO order.
    /// `replay` decides success/failure per entry; replayed entries are
    /// removed, failed ones stay queued until `expiresAt`.
    pub fn replay_pending<F>(&self, server_id: ServerId, now: u64, mut replay: F)
    where
        F: FnMut(&PendingOperation) -> bool,
    {
        let Some(mut queue) = self.queues.get_mut(&server_id) else {
            return;
        };
        let mut remaining = VecDeque::new();
        while let Some(mut entry) = queue.pop_front() {
            if entry.status == PendingOperationStatus::Expired {
                continue;
            }
            if replay(&entry) {
                entry.status = PendingOperationStatus::Replayed;
            } else if entry.is_expired(now) {
                entry.status = PendingOperationStatus::Expired;
            } else {
                remaining.push_back(entry);
            }
        }
        *queue = remaining;
    }

    /// (c) Resolves a whitelist mismatch by union, newest-write-wins for
    /// overlaps, when the configured strategy is `merge`.
    pub fn resolve_whitelist_merge(
        &self,
        server_side: &HashMap<String, u64>,
        client_side: &HashMap<String, u64>,
    ) -> HashSet<String> {
        let mut merged: HashMap<String, u64> = server_side.clone();
        for (player, ts) in client_side {
            merged
                .entry(player.clone())
                .and_modify(|existing| {
                    if *ts > *existing {
                        *existing = *ts;
                    }
                })
                .or_insert(*ts);
        }
        merged.into_keys().collect()
    }

    /// (c) `operation_conflict`: detects add/remove pairs on the same
    /// `target` and keeps only the newest operation per target regardless
    /// of direction (REDESIGN FLAG 3). Ties break by later timestamp, then
    /// deterministically by `opId`.
    pub fn resolve_operation_conflict<'a>(
        &self,
        ops: &'a [ConflictingOp],
    ) -> HashMap<&'a str, &'a ConflictingOp> {
        let mut latest: HashMap<&str, &ConflictingOp> = HashMap::new();
        for op in ops {
            latest
                .entry(op.target.as_str())
                .and_modify(|existing| {
                    if op.timestamp > existing.timestamp
                        || (op.timestamp == existing.timestamp && op.op_id.0 > existing.op_id.0)
                    {
                        *existing = op;
                    }
                })
                .or_insert(op);
        }
        latest
    }

    pub fn conflict(&self, server_id: ServerId, kind: ConflictKind, data: serde_json::Value) -> SyncConflict {
        let mut conflict = SyncConflict::new(server_id, kind, data, "warning");
        conflict.resolution = match kind {
            ConflictKind::WhitelistMismatch => self.config.whitelist_conflict_strategy,
            ConflictKind::PlayerIdentity => ResolutionStrategy::Manual,
            ConflictKind::OperationConflict => ResolutionStrategy::ServerWins,
            ConflictKind::DataVersion => self.config.data_version_strategy,
        };
        conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denial_escalates_past_threshold() {
        let degrader = BusinessErrorDegrader::new(DegraderConfig::default());
        for _ in 0..3 {
            assert!(!degrader.record_permission_denial("user-1"));
        }
        assert!(degrader.record_permission_denial("user-1"));
    }

    #[test]
    fn player_kick_is_never_cached() {
        let degrader = BusinessErrorDegrader::new(DegraderConfig::default());
        let server_id = ServerId::new();
        let err = degrader
            .handle_unavailable(server_id, "player.kick", serde_json::json!({}), 0)
            .unwrap_err();
        assert!(matches!(err, HubError::ServerUnavailable(_)));
        assert_eq!(degrader.queue_len(server_id), 0);
    }

    #[test]
    fn whitelist_add_is_cached_with_bounded_overflow() {
        let mut config = DegraderConfig::default();
        config.max_cached_operations = 2;
        let degrader = BusinessErrorDegrader::new(config);
        let server_id = ServerId::new();
        for i in 0..3 {
            degrader
                .handle_unavailable(server_id, "whitelist.add", serde_json::json!({"n": i}), 0)
                .unwrap();
        }
        assert_eq!(degrader.queue_len(server_id), 2);
    }

    #[test]
    fn replay_runs_fifo_and_clears_successful_entries() {
        let degrader = BusinessErrorDegrader::new(DegraderConfig::default());
        let server_id = ServerId::new();
        degrader
            .handle_unavailable(server_id, "whitelist.add", serde_json::json!({"n": 1}), 0)
            .unwrap();
        degrader
            .handle_unavailable(server_id, "whitelist.add", serde_json::json!({"n": 2}), 0)
            .unwrap();

        let mut seen = Vec::new();
        degrader.replay_pending(server_id, 10, |entry| {
            seen.push(entry.payload["n"].as_i64().unwrap());
            true
        });
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(degrader.queue_len(server_id), 0);
    }

    #[test]
    fn whitelist_merge_keeps_newest_write_on_overlap() {
        let degrader = BusinessErrorDegrader::new(DegraderConfig::default());
        let mut server_side = HashMap::new();
        server_side.insert("alice".to_string(), 10);
        let mut client_side = HashMap::new();
        client_side.insert("alice".to_string(), 20);
        client_side.insert("bob".to_string(), 5);

        let merged = degrader.resolve_whitelist_merge(&server_side, &client_side);
        assert!(merged.contains("alice"));
        assert!(merged.contains("bob"));
    }

    #[test]
    fn operation_conflict_keeps_newest_regardless_of_direction() {
        let degrader = BusinessErrorDegrader::new(DegraderConfig::default());
        let ops = vec![
            ConflictingOp {
                target: "alice".to_string(),
                direction: OperationDirection::Add,
                timestamp: 1,
                op_id: PendingOperationId::new(),
            },
            ConflictingOp {
                target: "alice".to_string(),
                direction: OperationDirection::Remove,
                timestamp: 2,
                op_id: PendingOperationId::new(),
            },
        ];
        let resolved = degrader.resolve_operation_conflict(&ops);
        assert_eq!(resolved.len(), 1);
        let winner = resolved.get("alice").unwrap();
        assert_eq!(winner.timestamp, 2);
        assert_eq!(winner.direction, OperationDirection::Remove);
    }

    #[test]
    fn operation_conflict_tie_breaks_deterministically_by_op_id() {
        let degrader = BusinessErrorDegrader::new(DegraderConfig::default());
        let earlier_id = PendingOperationId::new();
        let later_id = PendingOperationId::new();
        let (smaller, larger) = if earlier_id.0 < later_id.0 {
            (earlier_id, later_id)
        } else {
            (later_id, earlier_id)
        };
        let ops = vec![
            ConflictingOp {
                target: "bob".to_string(),
                direction: OperationDirection::Add,
                timestamp: 5,
                op_id: smaller,
            },
            ConflictingOp {
                target: "bob".to_string(),
                direction: OperationDirection::Remove,
                timestamp: 5,
                op_id: larger,
            },
        ];
        let resolved = degrader.resolve_operation_conflict(&ops);
        assert_eq!(resolved.get("bob").unwrap().op_id.0, larger.0);
    }
}
