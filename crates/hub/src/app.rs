//! Main application lifecycle: builds the hub's components, wires them
//! into the service coordinator, and drives startup/shutdown.

use crate::config::AppConfig;
use crate::coordinator::{Component, Health, ServiceCoordinator};
use crate::logging::display_banner;
use crate::signals::{setup_signal_handlers, setup_signal_handlers_silent};
use crate::{CliArgs, ShutdownState};
use async_trait::async_trait;
use hub_core::cache::{CacheLayer, EvictionPolicy};
use hub_core::collaborators::{
    AuditEntry, AuditLog, AuditResult, ChatPlatformAdapter, InMemoryStore, LoggingChatAdapter, PersistentStore,
    StoreBackedAuditLog,
};
use hub_core::connection::{ConnectionAdapter, ConnectionModeManager, PluginAdapter, RconAdapter, SessionManager, TerminalAdapter};
use hub_core::degrader::{BusinessErrorDegrader, DegraderConfig};
use hub_core::handlers::{register_core_handlers, HandlerContext};
use hub_core::messaging::{MessageRouter, RouterHealth};
use hub_core::model::{ConnectionConfig, Mode, ResolutionStrategy, SessionStatus};
use hub_core::retry::{RetryConfig, RetryEngine};
use hub_core::router::{EventBus, RequestRouter};
use hub_core::security::backoff::BackoffConfig;
use hub_core::security::{AdmissionConfig, SecurityGate};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const EVENT_FLOOD_THRESHOLD: u32 = 120;
const COMPONENT_STOP_TIMEOUT_SECS: u64 = 8;
const MONITORING_INTERVAL_SECS: u64 = 60;
/// No inbound listener is wired up yet (spec §1's external transport
/// boundary), so startup admission for pre-registered servers has no real
/// client IP to consult. Loopback is a placeholder until a transport layer
/// supplies one.
const STARTUP_ADMISSION_IP: &str = "127.0.0.1";

fn eviction_policy_from_str(value: &str) -> EvictionPolicy {
    match value {
        "lfu" => EvictionPolicy::Lfu,
        "ttl" => EvictionPolicy::Ttl,
        _ => EvictionPolicy::Lru,
    }
}

fn build_adapter(mode: Mode, config: &ConnectionConfig) -> Arc<dyn ConnectionAdapter> {
    match mode {
        Mode::Plugin => Arc::new(PluginAdapter::new()),
        Mode::Rcon => Arc::new(RconAdapter::new()),
        Mode::Terminal => {
            let working_directory = config
                .get("workingDirectory")
                .and_then(|v| v.as_str())
                .unwrap_or(".")
                .to_string();
            Arc::new(TerminalAdapter::new(working_directory))
        }
    }
}

struct ServicesComponent {
    cache: Arc<CacheLayer>,
}

#[async_trait]
impl Component for ServicesComponent {
    fn name(&self) -> &str {
        "services"
    }
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
    async fn health_check(&self) -> Health {
        let used = self.cache.total_bytes();
        let max = self.cache.max_bytes() as u64;
        if max > 0 && used as f64 / max as f64 > 0.95 {
            Health::Degraded
        } else {
            Health::Healthy
        }
    }
}

struct SessionsComponent {
    sessions: Arc<SessionManager>,
}

#[async_trait]
impl Component for SessionsComponent {
    fn name(&self) -> &str {
        "sessions"
    }
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
    async fn health_check(&self) -> Health {
        let _ = self.sessions.connected_count().await;
        Health::Healthy
    }
}

/// Drives admission -> adapter registration -> mode-manager connection ->
/// session-open -> audit for every server already known to the store at
/// start-up (spec §8 scenarios 1 and 2). Servers registered later than
/// start-up are connected the same way by whatever transport accepts their
/// first frame; that acceptance path is out of scope here (spec §1).
struct ConnectivityComponent {
    store: Arc<dyn PersistentStore>,
    security: Arc<SecurityGate>,
    retry: Arc<RetryEngine>,
    mode_manager: Arc<ConnectionModeManager>,
    sessions: Arc<SessionManager>,
    audit: Arc<dyn AuditLog>,
}

#[async_trait]
impl Component for ConnectivityComponent {
    fn name(&self) -> &str {
        "connectivity"
    }

    async fn start(&self) -> anyhow::Result<()> {
        let now = hub_core_now();
        let ip: IpAddr = STARTUP_ADMISSION_IP.parse().expect("loopback address parses");

        for descriptor in self.store.list_servers().await? {
            let server_id = descriptor.server_id;

            if let Err(rejection) = self.security.admit(ip, server_id, now) {
                warn!(%server_id, retry_after_secs = rejection.retry_after_secs, "startup connection admission rejected");
                continue;
            }
            self.security.record_admitted(ip, server_id);

            let mut candidate_modes = vec![descriptor.preferred_mode];
            for mode in &descriptor.mode_preference {
                if !candidate_modes.contains(mode) {
                    candidate_modes.push(*mode);
                }
            }
            for mode in &candidate_modes {
                let mode_config = descriptor.connection_config.get(mode).cloned().unwrap_or_default();
                self.mode_manager.register_adapter(server_id, *mode, build_adapter(*mode, &mode_config));
            }

            let events = self
                .mode_manager
                .establish_connection(server_id, &candidate_modes, &self.retry)
                .await;
            for event in &events {
                info!(?event, %server_id, "connection mode event at startup");
            }

            match self.mode_manager.active_mode(server_id) {
                Some(mode) => {
                    let session_id = self.sessions.open(server_id, mode, now).await;
                    self.sessions.set_status(session_id, SessionStatus::Connected).await;
                    self.append_audit(Some(server_id), "connection.admit", AuditResult::Success, None, ip, now)
                        .await;
                }
                None => {
                    self.append_audit(
                        Some(server_id),
                        "connection.admit",
                        AuditResult::Error,
                        Some("no candidate mode connected".to_string()),
                        ip,
                        now,
                    )
                    .await;
                }
            }
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Health {
        Health::Healthy
    }
}

impl ConnectivityComponent {
    async fn append_audit(
        &self,
        server_id: Option<wbp_protocol::ServerId>,
        op: &str,
        result: AuditResult,
        error_message: Option<String>,
        ip: IpAddr,
        now: u64,
    ) {
        let entry = AuditEntry {
            user_id: None,
            server_id,
            op: op.to_string(),
            payload: serde_json::Value::Null,
            result,
            error_message,
            ip: Some(ip.to_string()),
            user_agent: None,
            at: now,
        };
        if let Err(err) = self.audit.append(entry).await {
            warn!(%err, op, "failed to append audit entry");
        }
    }
}

struct MessageRouterComponent {
    router: Arc<MessageRouter>,
}

#[async_trait]
impl Component for MessageRouterComponent {
    fn name(&self) -> &str {
        "message-router"
    }
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
    async fn health_check(&self) -> Health {
        match self.router.health() {
            RouterHealth::Healthy => Health::Healthy,
            RouterHealth::Degraded => Health::Degraded,
        }
    }
}

/// All long-lived hub components, shared with whatever transport layer
/// ends up driving frames into the request router and adapters (out of
/// scope here — see spec §1's external-collaborator boundary).
pub struct HubComponents {
    pub cache: Arc<CacheLayer>,
    pub security: Arc<SecurityGate>,
    pub retry: Arc<RetryEngine>,
    pub degrader: Arc<BusinessErrorDegrader>,
    pub sessions: Arc<SessionManager>,
    pub mode_manager: Arc<ConnectionModeManager>,
    pub event_bus: Arc<EventBus>,
    pub request_router: Arc<RequestRouter>,
    pub message_router: Arc<MessageRouter>,
    pub store: Arc<dyn PersistentStore>,
    pub audit: Arc<dyn AuditLog>,
    pub chat: Arc<dyn ChatPlatformAdapter>,
}

pub struct Application {
    config: AppConfig,
    components: HubComponents,
    coordinator: ServiceCoordinator,
}

impl Application {
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        info!("configuration loaded from {}", args.config_path.display());

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("configuration validation failed: {e}").into());
        }
        info!("configuration validated successfully");

        display_banner();

        let cache = Arc::new(CacheLayer::new(
            config.cache.max_bytes as usize,
            eviction_policy_from_str(&config.cache.eviction_policy),
            config.cache.compression_enabled,
            Some(config.cache.default_ttl_secs),
        ));

        let security = Arc::new(SecurityGate::new(
            AdmissionConfig {
                max_total: config.security.max_total_connections,
                max_per_ip: config.security.max_connections_per_ip,
                max_per_server: config.security.max_connections_per_server,
                alert_cooldown_secs: 60,
                whitelist: config.security.ip_whitelist.clone(),
            },
            BackoffConfig {
                base_delay_ms: config.security.base_delay_ms,
                max_delay_ms: config.security.max_delay_ms,
                multiplier: config.security.backoff_multiplier,
                reset_window_secs: config.security.reset_window_secs,
                max_failures_before_block: config.security.max_failures_before_block,
                block_duration_secs: config.security.block_duration_secs,
            },
        ));

        let retry = Arc::new(RetryEngine::new(RetryConfig {
            max_attempts: config.retry.max_retry_attempts,
            base_interval_ms: config.retry.base_retry_interval_ms,
            max_interval_ms: config.retry.max_retry_interval_ms,
            multiplier: config.retry.exponential_backoff_multiplier,
            jitter_enabled: config.retry.jitter_enabled,
            quality_threshold: config.retry.connection_quality_threshold,
        }));

        let conflict_strategy = match config.degradation.conflict_resolution_strategy.as_str() {
            "manual" => ResolutionStrategy::Manual,
            "server_wins" => ResolutionStrategy::ServerWins,
            "client_wins" => ResolutionStrategy::ClientWins,
            _ => ResolutionStrategy::Merge,
        };
        let degrader = Arc::new(BusinessErrorDegrader::new(DegraderConfig {
            max_permission_retries: 3,
            max_cached_operations: config.degradation.max_cached_operations,
            cache_expiration_secs: config.degradation.cache_expiration_secs,
            whitelist_conflict_strategy: conflict_strategy,
            data_version_strategy: ResolutionStrategy::Manual,
        }));

        let sessions = Arc::new(SessionManager::new());
        let mode_manager = Arc::new(ConnectionModeManager::new());
        let event_bus = Arc::new(EventBus::new(EVENT_FLOOD_THRESHOLD));
        let message_router = Arc::new(MessageRouter::new());

        let store: Arc<dyn PersistentStore> = Arc::new(InMemoryStore::default());
        let audit: Arc<dyn AuditLog> = Arc::new(StoreBackedAuditLog::new(store.clone()));
        let chat: Arc<dyn ChatPlatformAdapter> = Arc::new(LoggingChatAdapter);

        let handler_ctx = Arc::new(HandlerContext {
            sessions: sessions.clone(),
            mode_manager: mode_manager.clone(),
            event_bus: event_bus.clone(),
            degrader: degrader.clone(),
            retry: retry.clone(),
            store: store.clone(),
            audit: audit.clone(),
            request_timeout_ms: config.protocol.request_timeout_secs * 1000,
        });
        let mut request_router = RequestRouter::new();
        register_core_handlers(&mut request_router, handler_ctx);
        let request_router = Arc::new(request_router);

        let coordinator = ServiceCoordinator::new(
            vec![
                Arc::new(ServicesComponent { cache: cache.clone() }),
                Arc::new(SessionsComponent {
                    sessions: sessions.clone(),
                }),
                Arc::new(ConnectivityComponent {
                    store: store.clone(),
                    security: security.clone(),
                    retry: retry.clone(),
                    mode_manager: mode_manager.clone(),
                    sessions: sessions.clone(),
                    audit: audit.clone(),
                }),
                Arc::new(MessageRouterComponent {
                    router: message_router.clone(),
                }),
            ],
            Duration::from_secs(COMPONENT_STOP_TIMEOUT_SECS),
        );

        info!(
            bind_address = %config.server.bind_address,
            "hub ready to start"
        );

        Ok(Self {
            config,
            components: HubComponents {
                cache,
                security,
                retry,
                degrader,
                sessions,
                mode_manager,
                event_bus,
                request_router,
                message_router,
                store,
                audit,
                chat,
            },
            coordinator,
        })
    }

    pub fn components(&self) -> &HubComponents {
        &self.components
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("starting U-WBP hub");
        self.log_configuration_summary();

        self.coordinator.start_all().await?;

        let shutdown_state = ShutdownState::new();
        let cache_for_sweep = self.components.cache.clone();
        let sessions_for_sweep = self.components.sessions.clone();
        let degrader_for_sweep = self.components.degrader.clone();
        let store_for_sweep = self.components.store.clone();
        let heartbeat_interval_secs = self.config.protocol.heartbeat_interval_secs;
        let heartbeat_timeout_secs = self.config.protocol.heartbeat_timeout_secs;

        let monitoring_handle = {
            let coordinator_health = self.coordinator_handle();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(MONITORING_INTERVAL_SECS));
                loop {
                    interval.tick().await;
                    let health = coordinator_health.health_check().await;
                    info!(?health, "periodic health check");
                    let now = hub_core_now();

                    let swept = cache_for_sweep.sweep_expired(now);
                    if swept > 0 {
                        info!(swept, "cache sweep removed expired entries");
                    }

                    let timed_out = sessions_for_sweep.sweep_request_deadlines(now).await;
                    if !timed_out.is_empty() {
                        info!(count = timed_out.len(), "request deadline sweep timed out overdue requests");
                    }
                    let degraded_or_closed = sessions_for_sweep
                        .sweep_heartbeats(now, heartbeat_interval_secs, heartbeat_timeout_secs)
                        .await;
                    if !degraded_or_closed.is_empty() {
                        info!(count = degraded_or_closed.len(), "heartbeat sweep closed stale sessions");
                    }

                    if let Ok(servers) = store_for_sweep.list_servers().await {
                        for descriptor in servers {
                            degrader_for_sweep.sweep_expired(descriptor.server_id, now);
                        }
                    }
                }
            })
        };

        let event_routing_handle = {
            let mut tap = self.components.event_bus.tap();
            let message_router = self.components.message_router.clone();
            let chat = self.components.chat.clone();
            tokio::spawn(async move {
                loop {
                    match tap.recv().await {
                        Ok(event) => {
                            let now = hub_core_now();
                            for outgoing in message_router.route_event(&event, now) {
                                if let Err(err) = chat.deliver_outbound(&outgoing.group_id, &outgoing.content).await {
                                    warn!(%err, group_id = %outgoing.group_id, "failed to deliver outbound group message");
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event tap lagged behind publishers, dropped events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        info!("hub is now running");
        info!("listening on {}", self.config.server.bind_address);
        info!("press ctrl+c to gracefully shut down");

        let signal_shutdown_state = setup_signal_handlers().await?;

        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("failed to set up forced-shutdown signal handler: {e}");
                return;
            }
            warn!("second shutdown signal received, forcing immediate exit");
            std::process::exit(1);
        });

        if signal_shutdown_state.is_shutdown_initiated() {
            shutdown_state.initiate_shutdown();
        }

        info!("shutdown signal received, beginning graceful shutdown");
        monitoring_handle.abort();
        event_routing_handle.abort();

        self.coordinator.stop_all().await;
        shutdown_state.complete_shutdown();

        info!("hub shutdown complete");
        Ok(())
    }

    fn coordinator_handle(&self) -> CoordinatorHealthHandle {
        CoordinatorHealthHandle {
            cache: self.components.cache.clone(),
            message_router: self.components.message_router.clone(),
            sessions: self.components.sessions.clone(),
        }
    }

    fn log_configuration_summary(&self) {
        info!("configuration summary:");
        info!("  bind address: {}", self.config.server.bind_address);
        info!("  max total connections: {}", self.config.security.max_total_connections);
        info!("  cache max bytes: {}", self.config.cache.max_bytes);
        info!("  retry max attempts: {}", self.config.retry.max_retry_attempts);
    }
}

/// A cheap read-only view over the components the monitoring loop polls,
/// so the loop doesn't need to hold the coordinator (which owns the
/// components by value) across an `.abort()`-able spawned task.
struct CoordinatorHealthHandle {
    cache: Arc<CacheLayer>,
    message_router: Arc<MessageRouter>,
    sessions: Arc<SessionManager>,
}

impl CoordinatorHealthHandle {
    async fn health_check(&self) -> Health {
        let _ = self.sessions.connected_count().await;
        let cache_health = {
            let used = self.cache.total_bytes();
            let max = self.cache.max_bytes() as u64;
            max > 0 && used as f64 / max as f64 > 0.95
        };
        match self.message_router.health() {
            RouterHealth::Degraded => Health::Degraded,
            RouterHealth::Healthy if cache_health => Health::Degraded,
            RouterHealth::Healthy => Health::Healthy,
        }
    }
}

fn hub_core_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
