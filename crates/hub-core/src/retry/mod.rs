//! Retry/failover engine (C7, spec §4.7): exponential backoff with jitter,
//! connection-quality scoring, and cross-mode failover handoff.

use dashmap::DashMap;
use rand::Rng;
use std::collections::VecDeque;
use wbp_protocol::ServerId;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    pub jitter_enabled: bool,
    pub quality_threshold: u8,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_interval_ms: 100,
            max_interval_ms: 30_000,
            multiplier: 2.0,
            jitter_enabled: true,
            quality_threshold: 50,
        }
    }
}

struct ServerRetryState {
    attempts: u32,
    samples: VecDeque<(bool, u64)>,
}

const QUALITY_SAMPLE_WINDOW: usize = 20;

/// A 0-100 score combining recent success rate, mean latency and latency
/// variance for a server (the "Connection quality" glossary term).
#[derive(Debug, Clone, Copy)]
pub struct ConnectionQuality(pub u8);

pub enum RetryOutcome {
    /// Caller should wait this long, then retry the same mode.
    RetryAfter(u64),
    /// Attempts exhausted for this mode; ask the mode manager to fail over.
    FailoverToNextMode,
    /// All modes exhausted; server is unreachable, hand off to (C8).
    Unreachable,
}

pub struct RetryEngine {
    config: RetryConfig,
    state: DashMap<ServerId, ServerRetryState>,
}

impl RetryEngine {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            state: DashMap::new(),
        }
    }

    pub fn record_success(&self, server_id: ServerId, latency_ms: u64) {
        let mut entry = self.state.entry(server_id).or_insert_with(|| ServerRetryState {
            attempts: 0,
            samples: VecDeque::new(),
        });
        entry.attempts = 0;
        push_sample(&mut entry.samples, true, latency_ms);
    }

    /// Records a failed attempt and decides what the caller should do next.
    pub fn record_failure(&self, server_id: ServerId, latency_ms: u64) -> RetryOutcome {
        let mut entry = self.state.entry(server_id).or_insert_with(|| ServerRetryState {
            attempts: 0,
            samples: VecDeque::new(),
        });
        entry.attempts += 1;
        push_sample(&mut entry.samples, false, latency_ms);

        if entry.attempts > self.config.max_attempts {
            return RetryOutcome::FailoverToNextMode;
        }
        let delay = self.next_delay(entry.attempts);
        RetryOutcome::RetryAfter(delay)
    }

    pub fn mark_all_modes_exhausted(&self, _server_id: ServerId) -> RetryOutcome {
        RetryOutcome::Unreachable
    }

    fn next_delay(&self, attempts: u32) -> u64 {
        let raw = (self.config.base_interval_ms as f64 * self.config.multiplier.powi(attempts as i32 - 1))
            .min(self.config.max_interval_ms as f64);
        if self.config.jitter_enabled {
            let jitter_frac = rand::thread_rng().gen_range(-0.25..=0.25);
            ((raw * (1.0 + jitter_frac)).max(0.0)) as u64
        } else {
            raw as u64
        }
    }

    /// Combines recent success rate, mean latency and variance into a 0-100
    /// score. A score below `quality_threshold` counts as a failure for
    /// failover purposes even if the current call succeeded.
    pub fn quality(&self, server_id: ServerId) -> ConnectionQuality {
        let Some(entry) = self.state.get(&server_id) else {
            return ConnectionQuality(100);
        };
        if entry.samples.is_empty() {
            return ConnectionQuality(100);
        }
        let success_count = entry.samples.iter().filter(|(ok, _)| *ok).count();
        let success_rate = success_count as f64 / entry.samples.len() as f64;

        let latencies: Vec<f64> = entry.samples.iter().map(|(_, l)| *l as f64).collect();
        let mean = latencies.iter().sum::<f64>() / latencies.len() as f64;
        let variance = latencies.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / latencies.len() as f64;
        let std_dev = variance.sqrt();

        let latency_penalty = (mean / 20.0).min(50.0);
        let variance_penalty = (std_dev / 20.0).min(20.0);
        let score = (success_rate * 100.0 - latency_penalty - variance_penalty).clamp(0.0, 100.0);
        ConnectionQuality(score as u8)
    }

    pub fn below_quality_threshold(&self, server_id: ServerId) -> bool {
        self.quality(server_id).0 < self.config.quality_threshold
    }
}

fn push_sample(samples: &mut VecDeque<(bool, u64)>, ok: bool, latency_ms: u64) {
    samples.push_back((ok, latency_ms));
    while samples.len() > QUALITY_SAMPLE_WINDOW {
        samples.pop_front();
    }
}
