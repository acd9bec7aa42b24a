//! Configuration management for the hub binary.
//!
//! Loads, validates, and holds the hub's TOML configuration, covering the
//! security, retry, degradation, cache, and protocol-timing keys the core
//! components are parameterized by.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

fn default_max_connections() -> usize {
    10_000
}
fn default_connection_timeout() -> u64 {
    60
}
fn default_max_per_ip() -> usize {
    50
}
fn default_max_per_server() -> usize {
    1
}

fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_reset_window_secs() -> u64 {
    300
}
fn default_max_failures_before_block() -> u32 {
    5
}
fn default_block_duration_secs() -> u64 {
    900
}

fn default_max_retry_attempts() -> u32 {
    5
}
fn default_base_retry_interval_ms() -> u64 {
    500
}
fn default_max_retry_interval_ms() -> u64 {
    30_000
}
fn default_exponential_backoff_multiplier() -> f64 {
    2.0
}
fn default_jitter_enabled() -> bool {
    true
}
fn default_connection_quality_threshold() -> u8 {
    50
}

fn default_max_cached_operations() -> usize {
    1_000
}
fn default_cache_expiration_secs() -> u64 {
    600
}
fn default_conflict_resolution_strategy() -> String {
    "newest_wins".to_string()
}
fn default_enable_graceful_degradation() -> bool {
    true
}

fn default_cache_max_bytes() -> u64 {
    64 * 1024 * 1024
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_eviction_policy() -> String {
    "lru".to_string()
}
fn default_compression_enabled() -> bool {
    true
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_heartbeat_timeout_secs() -> u64 {
    30
}
fn default_request_timeout_secs() -> u64 {
    15
}

/// Root configuration loaded from a TOML file at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub degradation: DegradationSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub protocol: ProtocolSettings,
    pub logging: LoggingSettings,
}

/// Network binding and connection-pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub bind_address: String,
    #[serde(default = "default_max_connections")]
    pub max_total_connections: usize,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
}

/// Connection admission and auth-backoff settings (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    #[serde(default = "default_max_connections")]
    pub max_total_connections: usize,
    #[serde(default = "default_max_per_ip")]
    pub max_connections_per_ip: usize,
    #[serde(default = "default_max_per_server")]
    pub max_connections_per_server: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_reset_window_secs")]
    pub reset_window_secs: u64,
    #[serde(default = "default_max_failures_before_block")]
    pub max_failures_before_block: u32,
    #[serde(default = "default_block_duration_secs")]
    pub block_duration_secs: u64,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            max_total_connections: default_max_connections(),
            max_connections_per_ip: default_max_per_ip(),
            max_connections_per_server: default_max_per_server(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            reset_window_secs: default_reset_window_secs(),
            max_failures_before_block: default_max_failures_before_block(),
            block_duration_secs: default_block_duration_secs(),
            ip_whitelist: Vec::new(),
        }
    }
}

/// Retry/failover engine settings (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_base_retry_interval_ms")]
    pub base_retry_interval_ms: u64,
    #[serde(default = "default_max_retry_interval_ms")]
    pub max_retry_interval_ms: u64,
    #[serde(default = "default_exponential_backoff_multiplier")]
    pub exponential_backoff_multiplier: f64,
    #[serde(default = "default_jitter_enabled")]
    pub jitter_enabled: bool,
    #[serde(default)]
    pub enable_failover: bool,
    #[serde(default = "default_connection_quality_threshold")]
    pub connection_quality_threshold: u8,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            base_retry_interval_ms: default_base_retry_interval_ms(),
            max_retry_interval_ms: default_max_retry_interval_ms(),
            exponential_backoff_multiplier: default_exponential_backoff_multiplier(),
            jitter_enabled: default_jitter_enabled(),
            enable_failover: true,
            connection_quality_threshold: default_connection_quality_threshold(),
        }
    }
}

/// Business-error degrader settings (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationSettings {
    #[serde(default = "default_max_cached_operations")]
    pub max_cached_operations: usize,
    #[serde(default = "default_cache_expiration_secs")]
    pub cache_expiration_secs: u64,
    #[serde(default = "default_conflict_resolution_strategy")]
    pub conflict_resolution_strategy: String,
    #[serde(default = "default_enable_graceful_degradation")]
    pub enable_graceful_degradation: bool,
}

impl Default for DegradationSettings {
    fn default() -> Self {
        Self {
            max_cached_operations: default_max_cached_operations(),
            cache_expiration_secs: default_cache_expiration_secs(),
            conflict_resolution_strategy: default_conflict_resolution_strategy(),
            enable_graceful_degradation: default_enable_graceful_degradation(),
        }
    }
}

/// Cache/preload layer settings (C10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_eviction_policy")]
    pub eviction_policy: String,
    #[serde(default = "default_compression_enabled")]
    pub compression_enabled: bool,
    #[serde(default)]
    pub preload_enabled: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub preload_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_bytes: default_cache_max_bytes(),
            default_ttl_secs: default_cache_ttl_secs(),
            eviction_policy: default_eviction_policy(),
            compression_enabled: default_compression_enabled(),
            preload_enabled: false,
            preload_interval_secs: default_cache_ttl_secs(),
        }
    }
}

/// Protocol timing settings shared by the session manager and router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSettings {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    pub json_format: bool,
    pub file_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "0.0.0.0:9000".to_string(),
                max_total_connections: default_max_connections(),
                connection_timeout_secs: default_connection_timeout(),
            },
            security: SecuritySettings::default(),
            retry: RetrySettings::default(),
            degradation: DegradationSettings::default(),
            cache: CacheSettings::default(),
            protocol: ProtocolSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
                file_path: None,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, creating a default one if it
    /// doesn't exist yet.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("invalid bind address: {}", &self.server.bind_address));
        }

        if self.security.max_connections_per_ip == 0 {
            return Err("security.max_connections_per_ip must be greater than 0".to_string());
        }
        if self.security.max_connections_per_server == 0 {
            return Err("security.max_connections_per_server must be greater than 0".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "invalid log level: {}. must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        let valid_policies = ["lru", "lfu", "ttl"];
        if !valid_policies.contains(&self.cache.eviction_policy.as_str()) {
            return Err(format!(
                "invalid cache.eviction_policy: {}. must be one of: {valid_policies:?}",
                &self.cache.eviction_policy
            ));
        }

        if self.protocol.heartbeat_timeout_secs == 0 {
            return Err("protocol.heartbeat_timeout_secs must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;
    use tokio::fs;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
        assert_eq!(config.security.max_connections_per_ip, 50);
        assert_eq!(config.retry.max_retry_attempts, 5);
        assert!(config.retry.jitter_enabled);
        assert_eq!(config.cache.eviction_policy, "lru");
    }

    #[tokio::test]
    async fn load_from_nonexistent_file_creates_default() {
        let temp_path = PathBuf::from("nonexistent_hub_config.toml");
        if temp_path.exists() {
            fs::remove_file(&temp_path).await.ok();
        }

        let result = AppConfig::load_from_file(&temp_path).await;
        assert!(result.is_ok());
        assert!(temp_path.exists());

        fs::remove_file(&temp_path).await.ok();
    }

    #[tokio::test]
    async fn load_from_existing_file_round_trips_custom_values() {
        let toml_content = r#"
[server]
bind_address = "127.0.0.1:9100"
max_total_connections = 500
connection_timeout_secs = 30

[security]
max_connections_per_ip = 10
max_connections_per_server = 2

[logging]
level = "debug"
json_format = true
"#;
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&temp_file.path().to_path_buf())
            .await
            .unwrap();

        assert_eq!(config.server.bind_address, "127.0.0.1:9100");
        assert_eq!(config.server.max_total_connections, 500);
        assert_eq!(config.security.max_connections_per_ip, 10);
        assert_eq!(config.security.max_connections_per_server, 2);
        assert_eq!(config.retry.max_retry_attempts, 5);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[test]
    fn validation_rejects_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.server.bind_address = "not-an-address".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("invalid bind address"));
    }

    #[test]
    fn validation_rejects_zero_per_ip_cap() {
        let mut config = AppConfig::default();
        config.security.max_connections_per_ip = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_invalid_log_level() {
        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("invalid log level"));
    }

    #[test]
    fn validation_rejects_invalid_eviction_policy() {
        let mut config = AppConfig::default();
        config.cache.eviction_policy = "random".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_accepts_all_eviction_policies() {
        for policy in ["lru", "lfu", "ttl"] {
            let mut config = AppConfig::default();
            config.cache.eviction_policy = policy.to_string();
            assert!(config.validate().is_ok(), "policy {policy} should be valid");
        }
    }

    #[test]
    fn config_is_cloneable_and_debug_printable() {
        let config = AppConfig::default();
        let cloned = config.clone();
        assert_eq!(config.server.bind_address, cloned.server.bind_address);
        let debug_str = format!("{config:?}");
        assert!(debug_str.contains("bind_address"));
        assert!(debug_str.contains("security"));
    }
}
