//! Owns the session table. Enforces the "at most one `connected` session per
//! server" invariant by closing any previous session before admitting a new
//! one, the way the teacher's `ConnectionManager` serializes connection
//! registration behind a single table lock.

use crate::model::{DuplicateRequestId, Mode, PendingRequestOutcome, Session, SessionStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use wbp_protocol::{RequestId, ServerId, SessionId};

#[derive(Debug, Clone, Copy)]
pub enum BeginRequestError {
    Duplicate,
    NoSuchSession,
}

pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
    by_server: Arc<RwLock<HashMap<ServerId, SessionId>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            by_server: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a new session for `server_id`, closing and removing any
    /// previously connected session for that server first.
    pub async fn open(&self, server_id: ServerId, mode: Mode, now: u64) -> SessionId {
        let mut by_server = self.by_server.write().await;
        let mut sessions = self.sessions.write().await;

        if let Some(old_id) = by_server.get(&server_id).copied() {
            if let Some(old) = sessions.get_mut(&old_id) {
                old.status = SessionStatus::Closing;
                old.cancel_all_pending();
            }
            sessions.remove(&old_id);
        }

        let session = Session::new(server_id, mode, now);
        let session_id = session.session_id;
        sessions.insert(session_id, session);
        by_server.insert(server_id, session_id);
        session_id
    }

    pub async fn set_status(&self, session_id: SessionId, status: SessionStatus) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&session_id) {
            session.status = status;
        }
    }

    pub async fn touch(&self, session_id: SessionId, now: u64) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&session_id) {
            session.touch(now);
        }
    }

    pub async fn close(&self, session_id: SessionId) {
        let mut sessions = self.sessions.write().await;
        let mut by_server = self.by_server.write().await;
        if let Some(mut session) = sessions.remove(&session_id) {
            session.status = SessionStatus::Closed;
            session.cancel_all_pending();
            by_server.retain(|_, sid| *sid != session_id);
        }
    }

    pub async fn session_for_server(&self, server_id: ServerId) -> Option<SessionId> {
        self.by_server.read().await.get(&server_id).copied()
    }

    pub async fn status_of(&self, session_id: SessionId) -> Option<SessionStatus> {
        self.sessions.read().await.get(&session_id).map(|s| s.status)
    }

    pub async fn connected_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.status == SessionStatus::Connected)
            .count()
    }

    /// Begins a correlated request on `session_id` (spec §5). The returned
    /// receiver resolves when the request's response arrives, the session
    /// closes, or `sweep_request_deadlines` times it out.
    pub async fn begin_request(
        &self,
        session_id: SessionId,
        request_id: RequestId,
        op: impl Into<String>,
        deadline: u64,
    ) -> Result<oneshot::Receiver<PendingRequestOutcome>, BeginRequestError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&session_id).ok_or(BeginRequestError::NoSuchSession)?;
        session
            .begin_request(request_id, op, deadline)
            .map_err(|DuplicateRequestId| BeginRequestError::Duplicate)
    }

    pub async fn resolve_request(&self, session_id: SessionId, request_id: RequestId, outcome: PendingRequestOutcome) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(session) => session.resolve_request(request_id, outcome),
            None => false,
        }
    }

    /// Times out every pending request across every session whose deadline
    /// has passed, returning `(session_id, request_id)` pairs.
    pub async fn sweep_request_deadlines(&self, now: u64) -> Vec<(SessionId, RequestId)> {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        for (session_id, session) in sessions.iter_mut() {
            for request_id in session.expire_overdue(now) {
                expired.push((*session_id, request_id));
            }
        }
        expired
    }

    /// Degrades sessions that have missed two consecutive heartbeats, and
    /// closes those past the full heartbeat timeout (spec §8 boundary
    /// behavior).
    pub async fn sweep_heartbeats(&self, now: u64, heartbeat_interval_secs: u64, heartbeat_timeout_secs: u64) -> Vec<SessionId> {
        let mut closed = Vec::new();
        let degrade_after = 2 * heartbeat_interval_secs;
        let mut sessions = self.sessions.write().await;
        let mut to_close = Vec::new();
        for (id, session) in sessions.iter_mut() {
            let silence = now.saturating_sub(session.last_activity);
            if silence > degrade_after + heartbeat_timeout_secs {
                to_close.push(*id);
            } else if silence > degrade_after && session.status == SessionStatus::Connected {
                session.status = SessionStatus::Degraded;
            }
        }
        drop(sessions);
        for id in to_close {
            self.close(id).await;
            closed.push(id);
        }
        closed
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opening_a_second_session_closes_the_first() {
        let manager = SessionManager::new();
        let server_id = ServerId::new();
        let first = manager.open(server_id, Mode::Plugin, 0).await;
        let second = manager.open(server_id, Mode::Rcon, 1).await;

        assert_ne!(first, second);
        assert!(manager.status_of(first).await.is_none());
        assert_eq!(manager.session_for_server(server_id).await, Some(second));
    }

    #[tokio::test]
    async fn heartbeat_sweep_degrades_then_closes() {
        let manager = SessionManager::new();
        let server_id = ServerId::new();
        let session_id = manager.open(server_id, Mode::Plugin, 0).await;
        manager.set_status(session_id, SessionStatus::Connected).await;

        let closed = manager.sweep_heartbeats(61, 30, 30).await;
        assert!(closed.is_empty());
        assert_eq!(manager.status_of(session_id).await, Some(SessionStatus::Degraded));

        let closed = manager.sweep_heartbeats(200, 30, 30).await;
        assert_eq!(closed, vec![session_id]);
        assert!(manager.status_of(session_id).await.is_none());
    }

    #[tokio::test]
    async fn connected_count_only_counts_connected_status() {
        let manager = SessionManager::new();
        let s1 = manager.open(ServerId::new(), Mode::Plugin, 0).await;
        manager.open(ServerId::new(), Mode::Plugin, 0).await;
        manager.set_status(s1, SessionStatus::Connected).await;
        assert_eq!(manager.connected_count().await, 1);
    }

    #[tokio::test]
    async fn sweep_request_deadlines_times_out_overdue_requests() {
        let manager = SessionManager::new();
        let session_id = manager.open(ServerId::new(), Mode::Plugin, 0).await;
        let request_id = RequestId::new();
        let rx = manager
            .begin_request(session_id, request_id, "command.execute", 100)
            .await
            .unwrap();

        let expired = manager.sweep_request_deadlines(500).await;
        assert_eq!(expired, vec![(session_id, request_id)]);
        assert!(matches!(rx.await.unwrap(), PendingRequestOutcome::Timeout));
    }
}
