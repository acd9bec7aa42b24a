//! Connection-mode manager (C3, spec §4.3): per-server mode selection,
//! health probing and the non-absorbing `error` state machine.

use crate::connection::adapter::ConnectionAdapter;
use crate::model::Mode;
use crate::retry::{RetryEngine, RetryOutcome};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use wbp_protocol::ServerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeState {
    None,
    Connecting,
    Connected,
    Degraded,
    Reconnecting,
    Closed,
    Error,
}

#[derive(Debug, Clone)]
pub enum ModeManagerEvent {
    ModeSwitched { server_id: ServerId, old: Mode, new: Mode },
    ConnectionFailed { server_id: ServerId },
}

struct ServerModeState {
    state: ModeState,
    active_mode: Option<Mode>,
}

/// Holds, per server, the set of candidate adapters in preference order and
/// the active state machine. Retry/backoff timing for a single candidate
/// mode is delegated to the passed-in (C7) engine; this component only
/// decides which mode to try next once (C7) says to fail over.
pub struct ConnectionModeManager {
    adapters: DashMap<(ServerId, Mode), Arc<dyn ConnectionAdapter>>,
    states: DashMap<ServerId, ServerModeState>,
}

impl ConnectionModeManager {
    pub fn new() -> Self {
        Self {
            adapters: DashMap::new(),
            states: DashMap::new(),
        }
    }

    pub fn register_adapter(&self, server_id: ServerId, mode: Mode, adapter: Arc<dyn ConnectionAdapter>) {
        self.adapters.insert((server_id, mode), adapter);
    }

    pub fn active_adapter(&self, server_id: ServerId) -> Option<Arc<dyn ConnectionAdapter>> {
        let mode = self.states.get(&server_id).and_then(|s| s.active_mode)?;
        self.adapters.get(&(server_id, mode)).map(|a| a.clone())
    }

    /// Tries `candidate_modes` in order. For each candidate, retries the
    /// SAME mode with `retry`'s backoff schedule until it connects or
    /// `retry` reports `FailoverToNextMode`, matching spec §4.3/§8's
    /// scenario of several timed retries of one mode before switching.
    pub async fn establish_connection(
        &self,
        server_id: ServerId,
        candidate_modes: &[Mode],
        retry: &RetryEngine,
    ) -> Vec<ModeManagerEvent> {
        let mut events = Vec::new();
        self.states.insert(
            server_id,
            ServerModeState {
                state: ModeState::Connecting,
                active_mode: None,
            },
        );

        let mut previous_mode: Option<Mode> = None;
        for mode in candidate_modes {
            let Some(adapter) = self.adapters.get(&(server_id, *mode)).map(|a| a.clone()) else {
                continue;
            };

            loop {
                let started = Instant::now();
                match adapter.connect().await {
                    Ok(()) => {
                        let latency_ms = started.elapsed().as_millis() as u64;
                        retry.record_success(server_id, latency_ms);
                        if let Some(prev) = previous_mode {
                            if prev != *mode {
                                events.push(ModeManagerEvent::ModeSwitched {
                                    server_id,
                                    old: prev,
                                    new: *mode,
                                });
                            }
                        }
                        self.states.insert(
                            server_id,
                            ServerModeState {
                                state: ModeState::Connected,
                                active_mode: Some(*mode),
                            },
                        );
                        info!(?server_id, ?mode, "connection established");
                        return events;
                    }
                    Err(err) => {
                        let latency_ms = started.elapsed().as_millis() as u64;
                        warn!(?server_id, ?mode, %err, "candidate mode attempt failed");
                        match retry.record_failure(server_id, latency_ms) {
                            RetryOutcome::RetryAfter(delay_ms) => {
                                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                                continue;
                            }
                            RetryOutcome::FailoverToNextMode | RetryOutcome::Unreachable => {
                                previous_mode = Some(*mode);
                                break;
                            }
                        }
                    }
                }
            }
        }

        retry.mark_all_modes_exhausted(server_id);
        if let Some(mut state) = self.states.get_mut(&server_id) {
            state.state = ModeState::Error;
        }
        events.push(ModeManagerEvent::ConnectionFailed { server_id });
        events
    }

    /// Runs the periodic health probe for a server's active adapter;
    /// triggers re-selection on failure.
    pub async fn health_probe(&self, server_id: ServerId) -> bool {
        let active_mode = self.states.get(&server_id).and_then(|s| s.active_mode);
        let Some(mode) = active_mode else { return false };
        let Some(adapter) = self.adapters.get(&(server_id, mode)) else {
            return false;
        };
        let healthy = adapter.is_connected();
        if !healthy {
            if let Some(mut state) = self.states.get_mut(&server_id) {
                state.state = ModeState::Degraded;
            }
        }
        healthy
    }

    pub fn state_of(&self, server_id: ServerId) -> ModeState {
        self.states
            .get(&server_id)
            .map(|s| s.state)
            .unwrap_or(ModeState::None)
    }

    pub fn active_mode(&self, server_id: ServerId) -> Option<Mode> {
        self.states.get(&server_id).and_then(|s| s.active_mode)
    }

    /// Re-enters `connecting` from a non-absorbing `error` state.
    pub fn reconnect(&self, server_id: ServerId) {
        if let Some(mut state) = self.states.get_mut(&server_id) {
            state.state = ModeState::Connecting;
        }
    }

    pub fn close(&self, server_id: ServerId) {
        if let Some(mut state) = self.states.get_mut(&server_id) {
            state.state = ModeState::Closed;
            state.active_mode = None;
        }
    }
}

impl Default for ConnectionModeManager {
    fn default() -> Self {
        Self::new()
    }
}
