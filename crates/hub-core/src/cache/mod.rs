//! Bounded cache/preload layer (C10, spec §4.10).

use base64::Engine;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const COMPRESSION_THRESHOLD_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Lru,
    Lfu,
    Ttl,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Vec<u8>,
    pub created_at: u64,
    pub last_accessed: u64,
    pub access_count: u64,
    pub size: usize,
    pub ttl: Option<u64>,
    pub compressed: bool,
}

impl CacheEntry {
    fn is_expired(&self, now: u64) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_sub(self.created_at) > ttl,
            None => false,
        }
    }
}

pub struct CacheLayer {
    entries: DashMap<String, CacheEntry>,
    max_bytes: usize,
    total_bytes: AtomicU64,
    policy: EvictionPolicy,
    compression_enabled: bool,
    default_ttl: Option<u64>,
}

impl CacheLayer {
    pub fn new(max_bytes: usize, policy: EvictionPolicy, compression_enabled: bool, default_ttl: Option<u64>) -> Self {
        Self {
            entries: DashMap::new(),
            max_bytes,
            total_bytes: AtomicU64::new(0),
            policy,
            compression_enabled,
            default_ttl,
        }
    }

    pub fn get(&self, key: &str, now: u64) -> Option<Vec<u8>> {
        let mut entry = self.entries.get_mut(key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.delete(key);
            return None;
        }
        entry.last_accessed = now;
        entry.access_count += 1;
        Some(self.materialize(&entry))
    }

    pub fn has(&self, key: &str, now: u64) -> bool {
        self.entries
            .get(key)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false)
    }

    pub fn set(&self, key: impl Into<String>, value: &serde_json::Value, ttl: Option<u64>, now: u64) {
        let key = key.into();
        let serialized = serde_json::to_vec(value).unwrap_or_default();
        let (stored, compressed) = if self.compression_enabled && serialized.len() > COMPRESSION_THRESHOLD_BYTES {
            (compress(&serialized), true)
        } else {
            (serialized, false)
        };
        let size = stored.len();

        self.ensure_capacity(size as u64, now);

        if let Some(old) = self.entries.get(&key) {
            self.total_bytes.fetch_sub(old.size as u64, Ordering::SeqCst);
        }
        self.entries.insert(
            key,
            CacheEntry {
                value: stored,
                created_at: now,
                last_accessed: now,
                access_count: 0,
                size,
                ttl: ttl.or(self.default_ttl),
                compressed,
            },
        );
        self.total_bytes.fetch_add(size as u64, Ordering::SeqCst);
    }

    pub fn delete(&self, key: &str) -> bool {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.total_bytes.fetch_sub(entry.size as u64, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Keys matching a `*`-glob pattern (single wildcard segment support).
    pub fn keys_matching(&self, pattern: &str) -> Vec<String> {
        if !pattern.contains('*') {
            return self
                .entries
                .iter()
                .map(|e| e.key().clone())
                .filter(|k| k == pattern)
                .collect();
        }
        let (prefix, suffix) = pattern.split_once('*').unwrap();
        self.entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix) && k.ends_with(suffix))
            .collect()
    }

    /// Evicts entries until headroom reaches 80% capacity, per `policy`.
    pub fn ensure_capacity(&self, required_bytes: u64, now: u64) {
        let target = (self.max_bytes as f64 * 0.8) as u64;
        while self.total_bytes.load(Ordering::SeqCst) + required_bytes > self.max_bytes as u64
            && self.total_bytes.load(Ordering::SeqCst) > 0
        {
            let victim = match self.policy {
                EvictionPolicy::Lru => self
                    .entries
                    .iter()
                    .min_by_key(|e| e.last_accessed)
                    .map(|e| e.key().clone()),
                EvictionPolicy::Lfu => self
                    .entries
                    .iter()
                    .min_by_key(|e| e.access_count)
                    .map(|e| e.key().clone()),
                EvictionPolicy::Ttl => self
                    .entries
                    .iter()
                    .min_by_key(|e| e.ttl.unwrap_or(u64::MAX))
                    .map(|e| e.key().clone()),
            };
            match victim {
                Some(key) => {
                    self.delete(&key);
                }
                None => break,
            }
            if self.total_bytes.load(Ordering::SeqCst) <= target {
                break;
            }
        }
        let _ = now;
    }

    /// Periodic sweep removing expired entries.
    pub fn sweep_expired(&self, now: u64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        let count = expired.len();
        for key in expired {
            self.delete(&key);
        }
        if count > 0 {
            debug!(count, "cache sweep removed expired entries");
        }
        count
    }

    pub fn render_metrics(&self) -> String {
        format!(
            "# TYPE hub_cache_bytes gauge\nhub_cache_bytes {}\n# TYPE hub_cache_entries gauge\nhub_cache_entries {}\n",
            self.total_bytes(),
            self.entries.len()
        )
    }

    fn materialize(&self, entry: &CacheEntry) -> Vec<u8> {
        if entry.compressed {
            decompress(&entry.value)
        } else {
            entry.value.clone()
        }
    }
}

fn compress(data: &[u8]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

fn decompress(data: &[u8]) -> Vec<u8> {
    use flate2::read::GzDecoder;
    use std::io::Read;
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    let _ = decoder.read_to_end(&mut out);
    out
}

/// Pure helper for tests and debugging; unused by the hot path.
pub fn base64_preview(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_after_set_round_trips() {
        let cache = CacheLayer::new(1024 * 1024, EvictionPolicy::Lru, false, None);
        cache.set("k1", &serde_json::json!({"a": 1}), None, 0);
        let v = cache.get("k1", 1).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&v).unwrap();
        assert_eq!(parsed["a"], 1);
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = CacheLayer::new(1024 * 1024, EvictionPolicy::Ttl, false, None);
        cache.set("k1", &serde_json::json!(1), Some(10), 0);
        assert!(cache.get("k1", 5).is_some());
        assert!(cache.get("k1", 20).is_none());
    }

    #[test]
    fn total_bytes_stays_within_max_after_set() {
        let cache = CacheLayer::new(200, EvictionPolicy::Lru, false, None);
        for i in 0..50 {
            cache.set(format!("k{i}"), &serde_json::json!("x".repeat(20)), None, i as u64);
        }
        assert!(cache.total_bytes() as usize <= 200);
    }

    #[test]
    fn large_values_are_compressed_when_enabled() {
        let cache = CacheLayer::new(10 * 1024 * 1024, EvictionPolicy::Lru, true, None);
        let big = "x".repeat(2000);
        cache.set("big", &serde_json::json!(big), None, 0);
        let entry = cache.entries.get("big").unwrap();
        assert!(entry.compressed);
        drop(entry);
        let fetched = cache.get("big", 1).unwrap();
        let parsed: String = serde_json::from_slice(&fetched).unwrap();
        assert_eq!(parsed, big);
    }

    #[test]
    fn glob_pattern_matches_prefix_and_suffix() {
        let cache = CacheLayer::new(1024 * 1024, EvictionPolicy::Lru, false, None);
        cache.set("server:1:info", &serde_json::json!(1), None, 0);
        cache.set("server:2:info", &serde_json::json!(1), None, 0);
        cache.set("player:1:info", &serde_json::json!(1), None, 0);
        let matches = cache.keys_matching("server:*:info");
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn sweep_expired_removes_only_expired_entries() {
        let cache = CacheLayer::new(1024 * 1024, EvictionPolicy::Ttl, false, None);
        cache.set("fresh", &serde_json::json!(1), Some(1000), 0);
        cache.set("stale", &serde_json::json!(1), Some(1), 0);
        let removed = cache.sweep_expired(50);
        assert_eq!(removed, 1);
        assert!(cache.has("fresh", 50));
        assert!(!cache.has("stale", 50));
    }
}
