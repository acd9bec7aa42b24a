//! Connection-security gate (C4, spec §4.4): admits or rejects new sockets
//! by consulting four ordered counters, with an IP whitelist bypass and
//! cooldown-gated security alerts.

pub mod backoff;

use backoff::{ipv4_in_cidr, AuthBackoff, BackoffConfig};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;
use wbp_protocol::ServerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    ConnectionLimitExceeded,
    AuthFailureRate,
    ConnectionFlood,
}

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub max_total: usize,
    pub max_per_ip: usize,
    pub max_per_server: usize,
    pub alert_cooldown_secs: u64,
    pub whitelist: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_total: 10_000,
            max_per_ip: 10,
            max_per_server: 1,
            alert_cooldown_secs: 60,
            whitelist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Rejection {
    pub retry_after_secs: u64,
}

pub struct SecurityGate {
    config: AdmissionConfig,
    total_sessions: AtomicUsize,
    per_ip: DashMap<IpAddr, usize>,
    per_server: DashMap<ServerId, usize>,
    auth_backoff: AuthBackoff,
    last_alert: DashMap<(AlertKind, IpAddr, Option<ServerId>), u64>,
}

impl SecurityGate {
    pub fn new(config: AdmissionConfig, backoff_config: BackoffConfig) -> Self {
        Self {
            config,
            total_sessions: AtomicUsize::new(0),
            per_ip: DashMap::new(),
            per_server: DashMap::new(),
            auth_backoff: AuthBackoff::new(backoff_config),
            last_alert: DashMap::new(),
        }
    }

    fn is_whitelisted(&self, ip: IpAddr) -> bool {
        self.config.whitelist.iter().any(|cidr| ipv4_in_cidr(ip, cidr))
    }

    /// Runs the four ordered admission checks. Returns `Ok(())` if admitted,
    /// or the first failing check's `Rejection`.
    pub fn admit(&self, ip: IpAddr, server_id: ServerId, now: u64) -> Result<(), Rejection> {
        if self.is_whitelisted(ip) {
            return Ok(());
        }

        if self.total_sessions.load(Ordering::SeqCst) >= self.config.max_total {
            self.maybe_alert(AlertKind::ConnectionLimitExceeded, ip, None, now);
            return Err(Rejection { retry_after_secs: 5 });
        }
        if self.per_ip.get(&ip).map(|v| *v).unwrap_or(0) >= self.config.max_per_ip {
            self.maybe_alert(AlertKind::ConnectionFlood, ip, None, now);
            return Err(Rejection { retry_after_secs: 5 });
        }
        if self.per_server.get(&server_id).map(|v| *v).unwrap_or(0) >= self.config.max_per_server {
            return Err(Rejection { retry_after_secs: 1 });
        }
        if let Some(retry_after_secs) = self.auth_backoff.check(ip, server_id, now) {
            self.maybe_alert(AlertKind::AuthFailureRate, ip, Some(server_id), now);
            return Err(Rejection { retry_after_secs });
        }
        Ok(())
    }

    pub fn record_admitted(&self, ip: IpAddr, server_id: ServerId) {
        self.total_sessions.fetch_add(1, Ordering::SeqCst);
        *self.per_ip.entry(ip).or_insert(0) += 1;
        *self.per_server.entry(server_id).or_insert(0) += 1;
    }

    pub fn record_closed(&self, ip: IpAddr, server_id: ServerId) {
        self.total_sessions.fetch_sub(1, Ordering::SeqCst);
        if let Some(mut count) = self.per_ip.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        if let Some(mut count) = self.per_server.get_mut(&server_id) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn record_auth_failure(&self, ip: IpAddr, server_id: ServerId, now: u64) {
        self.auth_backoff.record_failure(ip, server_id, now);
    }

    pub fn record_auth_success(&self, ip: IpAddr, server_id: ServerId) {
        self.auth_backoff.record_success(ip, server_id);
    }

    fn maybe_alert(&self, kind: AlertKind, ip: IpAddr, server_id: Option<ServerId>, now: u64) {
        let key = (kind, ip, server_id);
        let should_fire = match self.last_alert.get(&key) {
            Some(last) => now.saturating_sub(*last) >= self.config.alert_cooldown_secs,
            None => true,
        };
        if should_fire {
            self.last_alert.insert(key, now);
            warn!(?kind, %ip, ?server_id, "security alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn admission_at_exactly_max_per_ip_succeeds_next_is_rejected() {
        let mut config = AdmissionConfig::default();
        config.max_per_ip = 2;
        let gate = SecurityGate::new(config, BackoffConfig::default());
        let client_ip = ip("1.2.3.4");

        for _ in 0..2 {
            assert!(gate.admit(client_ip, ServerId::new(), 0).is_ok());
            gate.record_admitted(client_ip, ServerId::new());
        }
        let err = gate.admit(client_ip, ServerId::new(), 0).unwrap_err();
        assert!(err.retry_after_secs > 0);
    }

    #[test]
    fn whitelisted_ip_bypasses_all_checks() {
        let mut config = AdmissionConfig::default();
        config.max_per_ip = 0;
        config.whitelist = vec!["1.2.3.0/24".to_string()];
        let gate = SecurityGate::new(config, BackoffConfig::default());
        assert!(gate.admit(ip("1.2.3.4"), ServerId::new(), 0).is_ok());
    }

    #[test]
    fn admission_order_is_total_then_per_ip_then_per_server_then_auth() {
        let mut config = AdmissionConfig::default();
        config.max_total = 0;
        let gate = SecurityGate::new(config, BackoffConfig::default());
        // Total cap fails first even though per-ip/per-server would also fail.
        let err = gate.admit(ip("9.9.9.9"), ServerId::new(), 0).unwrap_err();
        assert_eq!(err.retry_after_secs, 5);
    }

    #[test]
    fn auth_failure_rejection_is_the_last_check() {
        let gate = SecurityGate::new(AdmissionConfig::default(), BackoffConfig::default());
        let server_id = ServerId::new();
        let client_ip = ip("5.5.5.5");
        for i in 0..5 {
            gate.record_auth_failure(client_ip, server_id, i);
        }
        let err = gate.admit(client_ip, server_id, 5).unwrap_err();
        assert!(err.retry_after_secs > 0);
    }

    #[test]
    fn alert_cooldown_suppresses_duplicate_alerts() {
        let mut config = AdmissionConfig::default();
        config.max_total = 0;
        config.alert_cooldown_secs = 60;
        let gate = SecurityGate::new(config, BackoffConfig::default());
        // Both calls would alert; we only assert no panic and rejection both times,
        // the cooldown's effect (single warn) is observed via tracing in production.
        assert!(gate.admit(ip("7.7.7.7"), ServerId::new(), 0).is_err());
        assert!(gate.admit(ip("7.7.7.7"), ServerId::new(), 1).is_err());
    }
}
