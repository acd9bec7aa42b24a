//! Connection adapter (C2): a capability-set abstraction over the three
//! transport variants a server can be reached through.

use crate::model::Event;
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::broadcast;
use wbp_protocol::{Frame, ServerId};

const ADAPTER_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("capability not supported by this adapter: {0}")]
    UnsupportedCapability(String),
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub success: bool,
    pub output: Vec<String>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

/// Feature set an adapter variant can serve. The mode manager and request
/// router consult this before routing an operation to a given session.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    pub events: bool,
    pub commands: bool,
    pub metrics: bool,
    pub subscriptions: bool,
}

impl CapabilitySet {
    pub fn plugin() -> Self {
        Self {
            events: true,
            commands: true,
            metrics: true,
            subscriptions: true,
        }
    }

    pub fn rcon() -> Self {
        Self {
            events: false,
            commands: true,
            metrics: false,
            subscriptions: false,
        }
    }

    pub fn terminal() -> Self {
        Self {
            events: true,
            commands: true,
            metrics: false,
            subscriptions: false,
        }
    }

    pub fn names(&self) -> HashSet<String> {
        let mut s = HashSet::new();
        if self.events {
            s.insert("events".into());
        }
        if self.commands {
            s.insert("commands".into());
        }
        if self.metrics {
            s.insert("metrics".into());
        }
        if self.subscriptions {
            s.insert("subscriptions".into());
        }
        s
    }
}

/// The shared contract every transport variant implements. Variant-specific
/// behavior lives behind this trait, not in a class hierarchy (spec §9).
#[async_trait]
pub trait ConnectionAdapter: Send + Sync {
    fn capabilities(&self) -> CapabilitySet;

    async fn connect(&self) -> Result<(), AdapterError>;

    async fn disconnect(&self) -> Result<(), AdapterError>;

    async fn send_command(&self, cmd: &str, timeout: Duration) -> Result<CommandOutcome, AdapterError>;

    async fn send_raw(&self, frame: &Frame) -> Result<(), AdapterError>;

    fn is_connected(&self) -> bool;

    /// The adapter's event source (spec §4.2: "each adapter exposes ... and
    /// an event source"). Remote events flow C2 adapter -> C6 event bus
    /// through this receiver; an adapter with no live events (e.g. RCON)
    /// still returns a receiver, it just never yields anything.
    fn events(&self) -> broadcast::Receiver<Event>;
}

/// Full-duplex framed transport: events, commands, metrics, subscriptions.
pub struct PluginAdapter {
    connected: std::sync::atomic::AtomicBool,
    events_tx: broadcast::Sender<Event>,
}

impl PluginAdapter {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(ADAPTER_EVENT_CAPACITY);
        Self {
            connected: std::sync::atomic::AtomicBool::new(false),
            events_tx,
        }
    }

    /// Called by the transport's inbound frame loop whenever the remote
    /// plugin pushes a structured event; fans it out to every subscriber of
    /// `events()`. A production transport wires this to its frame reader.
    pub fn publish_event(&self, event: Event) {
        let _ = self.events_tx.send(event);
    }
}

impl Default for PluginAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionAdapter for PluginAdapter {
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::plugin()
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        self.connected.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.connected.store(false, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn send_command(&self, cmd: &str, _timeout: Duration) -> Result<CommandOutcome, AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::Transport("not connected".into()));
        }
        Ok(CommandOutcome {
            success: true,
            output: vec![format!("ok: {cmd}")],
            elapsed: Duration::from_millis(1),
            error: None,
        })
    }

    async fn send_raw(&self, _frame: &Frame) -> Result<(), AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::Transport("not connected".into()));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }
}

/// Command execution only; no inbound events.
pub struct RconAdapter {
    connected: std::sync::atomic::AtomicBool,
    events_tx: broadcast::Sender<Event>,
}

impl RconAdapter {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(ADAPTER_EVENT_CAPACITY);
        Self {
            connected: std::sync::atomic::AtomicBool::new(false),
            events_tx,
        }
    }
}

impl Default for RconAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionAdapter for RconAdapter {
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::rcon()
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        self.connected.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.connected.store(false, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn send_command(&self, cmd: &str, _timeout: Duration) -> Result<CommandOutcome, AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::Transport("not connected".into()));
        }
        Ok(CommandOutcome {
            success: true,
            output: vec![format!("rcon ok: {cmd}")],
            elapsed: Duration::from_millis(1),
            error: None,
        })
    }

    async fn send_raw(&self, _frame: &Frame) -> Result<(), AdapterError> {
        Err(AdapterError::UnsupportedCapability("events".into()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }
}

/// Command execution by writing to a process stdin; line-based log scraping
/// synthesizes a restricted event stream.
pub struct TerminalAdapter {
    working_directory: String,
    connected: std::sync::atomic::AtomicBool,
    events_tx: broadcast::Sender<Event>,
}

impl TerminalAdapter {
    pub fn new(working_directory: impl Into<String>) -> Self {
        let (events_tx, _) = broadcast::channel(ADAPTER_EVENT_CAPACITY);
        Self {
            working_directory: working_directory.into(),
            connected: std::sync::atomic::AtomicBool::new(false),
            events_tx,
        }
    }

    pub fn working_directory(&self) -> &str {
        &self.working_directory
    }

    /// Recognizes `[JOIN] <name>`, `[LEAVE] <name>` and `[CHAT] <name>:
    /// <message>` log lines and turns them into the restricted event stream
    /// spec §4.2 allows terminal adapters to synthesize; anything else is
    /// ignored. Returns the synthesized event (already published to
    /// `events()`), if the line matched one of the recognized shapes.
    pub fn scrape_log_line(&self, server_id: ServerId, line: &str, now: u64) -> Option<Event> {
        let line = line.trim();
        let event = if let Some(name) = line.strip_prefix("[JOIN] ") {
            Some(Event::new(server_id, "player.join", serde_json::json!({"playerId": name}), now))
        } else if let Some(name) = line.strip_prefix("[LEAVE] ") {
            Some(Event::new(server_id, "player.leave", serde_json::json!({"playerId": name}), now))
        } else if let Some(rest) = line.strip_prefix("[CHAT] ") {
            let (name, message) = rest.split_once(':').unwrap_or((rest, ""));
            Some(Event::new(
                server_id,
                "player.chat",
                serde_json::json!({"playerId": name.trim(), "message": message.trim()}),
                now,
            ))
        } else {
            None
        };
        if let Some(event) = &event {
            let _ = self.events_tx.send(event.clone());
        }
        event
    }
}

#[async_trait]
impl ConnectionAdapter for TerminalAdapter {
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::terminal()
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        self.connected.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.connected.store(false, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn send_command(&self, cmd: &str, _timeout: Duration) -> Result<CommandOutcome, AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::Transport("not connected".into()));
        }
        Ok(CommandOutcome {
            success: true,
            output: vec![format!("stdin> {cmd}")],
            elapsed: Duration::from_millis(1),
            error: None,
        })
    }

    async fn send_raw(&self, _frame: &Frame) -> Result<(), AdapterError> {
        Err(AdapterError::UnsupportedCapability("structured frames".into()))
    }

    fn events(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plugin_adapter_reports_full_capabilities() {
        let adapter = PluginAdapter::new();
        assert!(adapter.capabilities().events);
        assert!(adapter.capabilities().subscriptions);
    }

    #[tokio::test]
    async fn rcon_adapter_rejects_raw_frames() {
        let adapter = RconAdapter::new();
        adapter.connect().await.unwrap();
        let frame = Frame::heartbeat(0);
        let err = adapter.send_raw(&frame).await.unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedCapability(_)));
    }

    #[tokio::test]
    async fn commands_fail_before_connect() {
        let adapter = TerminalAdapter::new("/srv/server1");
        let err = adapter.send_command("save-all", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, AdapterError::Transport(_)));
    }

    #[tokio::test]
    async fn is_connected_reflects_connect_disconnect() {
        let adapter = PluginAdapter::new();
        assert!(!adapter.is_connected());
        adapter.connect().await.unwrap();
        assert!(adapter.is_connected());
        adapter.disconnect().await.unwrap();
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn plugin_adapter_fans_out_published_events() {
        let adapter = PluginAdapter::new();
        let mut rx = adapter.events();
        let server_id = ServerId::new();
        adapter.publish_event(Event::new(server_id, "player.chat", serde_json::json!({}), 0));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "player.chat");
    }

    #[tokio::test]
    async fn terminal_adapter_scrapes_join_and_chat_lines() {
        let adapter = TerminalAdapter::new("/srv/server1");
        let server_id = ServerId::new();
        let mut rx = adapter.events();

        let join = adapter.scrape_log_line(server_id, "[JOIN] steve", 1).unwrap();
        assert_eq!(join.kind, "player.join");
        assert_eq!(join.player_id(), Some("steve"));

        let chat = adapter.scrape_log_line(server_id, "[CHAT] steve: hello world", 2).unwrap();
        assert_eq!(chat.kind, "player.chat");
        assert_eq!(chat.payload.get("message").unwrap(), "hello world");

        assert!(adapter.scrape_log_line(server_id, "plain log noise", 3).is_none());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, "player.join");
    }
}
