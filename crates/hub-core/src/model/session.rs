use crate::model::server::Mode;
use std::collections::HashSet;
use tokio::sync::oneshot;
use wbp_protocol::{RequestId, ServerId, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Authenticating,
    Connected,
    Degraded,
    Closing,
    Closed,
    Error,
}

/// A live connection to one server via one adapter (spec §3). At most one
/// `Connected` session may exist per `server_id`; the session manager
/// enforces this, not the `Session` itself.
#[derive(Debug)]
pub struct Session {
    pub session_id: SessionId,
    pub server_id: ServerId,
    pub mode: Mode,
    pub status: SessionStatus,
    pub capabilities: HashSet<String>,
    pub last_activity: u64,
    pub authenticated: bool,
    pending: std::collections::HashMap<RequestId, PendingRequest>,
}

impl Session {
    pub fn new(server_id: ServerId, mode: Mode, now: u64) -> Self {
        Self {
            session_id: SessionId::new(),
            server_id,
            mode,
            status: SessionStatus::Connecting,
            capabilities: HashSet::new(),
            last_activity: now,
            authenticated: false,
            pending: std::collections::HashMap::new(),
        }
    }

    pub fn touch(&mut self, now: u64) {
        self.last_activity = now;
    }

    /// Registers an in-flight request and returns the receiver side of its
    /// completion channel. Fails if the id is already in-flight (the
    /// universal invariant: at most one request with a given id in flight).
    /// `deadline` is the absolute timestamp after which a sweep fails this
    /// request with `Timeout` (spec §5).
    pub fn begin_request(
        &mut self,
        request_id: RequestId,
        op: impl Into<String>,
        deadline: u64,
    ) -> Result<oneshot::Receiver<PendingRequestOutcome>, DuplicateRequestId> {
        if self.pending.contains_key(&request_id) {
            return Err(DuplicateRequestId);
        }
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            request_id,
            PendingRequest {
                request_id,
                op: op.into(),
                deadline,
                sink: Some(tx),
            },
        );
        Ok(rx)
    }

    pub fn resolve_request(&mut self, request_id: RequestId, outcome: PendingRequestOutcome) -> bool {
        if let Some(mut pending) = self.pending.remove(&request_id) {
            if let Some(sink) = pending.sink.take() {
                let _ = sink.send(outcome);
            }
            true
        } else {
            false
        }
    }

    /// Fails every in-flight request with `SESSION_CLOSED`, leaving no
    /// orphaned entries — called when the session closes.
    pub fn cancel_all_pending(&mut self) {
        for (_, mut pending) in self.pending.drain() {
            if let Some(sink) = pending.sink.take() {
                let _ = sink.send(PendingRequestOutcome::SessionClosed);
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fails and removes every pending request whose deadline has passed,
    /// returning their ids (spec §5: "On deadline the PendingRequest is
    /// failed with TIMEOUT and removed").
    pub fn expire_overdue(&mut self, now: u64) -> Vec<RequestId> {
        let overdue: Vec<RequestId> = self
            .pending
            .values()
            .filter(|p| now >= p.deadline)
            .map(|p| p.request_id)
            .collect();
        for id in &overdue {
            if let Some(mut pending) = self.pending.remove(id) {
                if let Some(sink) = pending.sink.take() {
                    let _ = sink.send(PendingRequestOutcome::Timeout);
                }
            }
        }
        overdue
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DuplicateRequestId;

#[derive(Debug)]
pub enum PendingRequestOutcome {
    Response(serde_json::Value),
    Timeout,
    SessionClosed,
}

/// Correlation record for one in-flight request (spec §3). The sink is a
/// single-shot channel; only `begin_request`/`resolve_request` touch it.
#[derive(Debug)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub op: String,
    pub deadline: u64,
    sink: Option<oneshot::Sender<PendingRequestOutcome>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_request_id_is_rejected() {
        let mut session = Session::new(ServerId::new(), Mode::Plugin, 0);
        let id = RequestId::new();
        assert!(session.begin_request(id, "system.ping", 1000).is_ok());
        assert!(session.begin_request(id, "system.ping", 1000).is_err());
    }

    #[tokio::test]
    async fn resolve_request_delivers_outcome_and_clears_pending() {
        let mut session = Session::new(ServerId::new(), Mode::Plugin, 0);
        let id = RequestId::new();
        let rx = session.begin_request(id, "system.ping", 1000).unwrap();
        assert_eq!(session.pending_count(), 1);
        assert!(session.resolve_request(id, PendingRequestOutcome::Response(serde_json::json!({}))));
        assert_eq!(session.pending_count(), 0);
        assert!(matches!(rx.await.unwrap(), PendingRequestOutcome::Response(_)));
    }

    #[test]
    fn cancel_all_pending_empties_the_table() {
        let mut session = Session::new(ServerId::new(), Mode::Plugin, 0);
        session.begin_request(RequestId::new(), "system.ping", 1000).unwrap();
        session.begin_request(RequestId::new(), "system.ping", 1000).unwrap();
        session.cancel_all_pending();
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn expire_overdue_times_out_past_deadline_requests() {
        let mut session = Session::new(ServerId::new(), Mode::Plugin, 0);
        let expired_id = RequestId::new();
        let live_id = RequestId::new();
        let expired_rx = session.begin_request(expired_id, "command.execute", 100).unwrap();
        let _live_rx = session.begin_request(live_id, "command.execute", 1000).unwrap();

        let timed_out = session.expire_overdue(500);
        assert_eq!(timed_out, vec![expired_id]);
        assert_eq!(session.pending_count(), 1);
        assert!(matches!(expired_rx.await.unwrap(), PendingRequestOutcome::Timeout));
    }
}
