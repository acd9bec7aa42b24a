//! External collaborator contracts (spec §6). The core depends on these
//! traits only; concrete storage engines, the chat-platform's own format,
//! and HTTP/telemetry surfaces are out of scope and live in their own
//! crates elsewhere.

use crate::model::{Binding, ServerDescriptor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use wbp_protocol::ServerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub user_id: Option<String>,
    pub server_id: Option<ServerId>,
    pub op: String,
    pub payload: serde_json::Value,
    pub result: AuditResult,
    pub error_message: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub at: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub server_id: Option<ServerId>,
    pub op: Option<String>,
    pub since: Option<u64>,
    pub until: Option<u64>,
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get_server(&self, server_id: ServerId) -> anyhow::Result<Option<ServerDescriptor>>;
    async fn list_servers(&self) -> anyhow::Result<Vec<ServerDescriptor>>;
    async fn create_server(&self, descriptor: ServerDescriptor) -> anyhow::Result<()>;
    async fn update_server(&self, descriptor: ServerDescriptor) -> anyhow::Result<()>;
    async fn delete_server(&self, server_id: ServerId) -> anyhow::Result<()>;

    async fn list_acl_entries(&self, user_id: &str) -> anyhow::Result<Vec<String>>;

    async fn list_bindings(&self, server_id: ServerId) -> anyhow::Result<Vec<Binding>>;
    async fn create_binding(&self, binding: Binding) -> anyhow::Result<()>;
    async fn update_binding(&self, binding: Binding) -> anyhow::Result<()>;
    async fn delete_binding(&self, binding_id: wbp_protocol::BindingId) -> anyhow::Result<()>;

    async fn upsert_token(&self, token: &str, server_id: ServerId, expires_at: u64) -> anyhow::Result<()>;
    async fn revoke_token(&self, token: &str) -> anyhow::Result<()>;

    async fn append_audit(&self, entry: AuditEntry) -> anyhow::Result<()>;
    async fn query_audit(&self, query: AuditQuery) -> anyhow::Result<Vec<AuditEntry>>;
    async fn cleanup_old_audit(&self, before: u64) -> anyhow::Result<u64>;

    /// Optional: real stores may persist `Binding::last_activity` so it
    /// survives a restart. A no-op default is acceptable — see the
    /// cold-start note on the `lastActivity` design decision.
    async fn touch_binding_activity(&self, _binding_id: wbp_protocol::BindingId, _at: u64) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Append-only audit stream. In most deployments this is the same backing
/// store as `PersistentStore::append_audit`, but the core only depends on
/// the narrower contract so an independent audit sink (e.g. a SIEM) can be
/// substituted.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct TokenDecision {
    pub valid: bool,
    pub server_id: Option<ServerId>,
    pub expired: bool,
    pub ip_allowed: bool,
}

#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str, client_ip: std::net::IpAddr) -> anyhow::Result<TokenDecision>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMessageEnvelope {
    pub group_id: String,
    pub user_id: String,
    pub user_name: String,
    pub content: String,
    pub at: u64,
    pub message_id: Option<String>,
    pub reply_to: Option<String>,
}

#[async_trait]
pub trait ChatPlatformAdapter: Send + Sync {
    async fn deliver_outbound(&self, group_id: &str, content: &str) -> anyhow::Result<()>;
}

/// In-process `PersistentStore`. A real deployment swaps this for a
/// database-backed store via the trait; nothing in the core depends on
/// which one is plugged in — this is the default the `hub` binary wires up
/// out of the box.
#[derive(Default)]
pub struct InMemoryStore {
    servers: Mutex<HashMap<ServerId, ServerDescriptor>>,
    bindings: Mutex<HashMap<wbp_protocol::BindingId, Binding>>,
    audit: Mutex<Vec<AuditEntry>>,
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn get_server(&self, server_id: ServerId) -> anyhow::Result<Option<ServerDescriptor>> {
        Ok(self.servers.lock().await.get(&server_id).cloned())
    }
    async fn list_servers(&self) -> anyhow::Result<Vec<ServerDescriptor>> {
        Ok(self.servers.lock().await.values().cloned().collect())
    }
    async fn create_server(&self, descriptor: ServerDescriptor) -> anyhow::Result<()> {
        self.servers.lock().await.insert(descriptor.server_id, descriptor);
        Ok(())
    }
    async fn update_server(&self, descriptor: ServerDescriptor) -> anyhow::Result<()> {
        self.servers.lock().await.insert(descriptor.server_id, descriptor);
        Ok(())
    }
    async fn delete_server(&self, server_id: ServerId) -> anyhow::Result<()> {
        self.servers.lock().await.remove(&server_id);
        self.bindings.lock().await.retain(|_, b| b.server_id != server_id);
        Ok(())
    }
    async fn list_acl_entries(&self, _user_id: &str) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
    async fn list_bindings(&self, server_id: ServerId) -> anyhow::Result<Vec<Binding>> {
        Ok(self
            .bindings
            .lock()
            .await
            .values()
            .filter(|b| b.server_id == server_id)
            .cloned()
            .collect())
    }
    async fn create_binding(&self, binding: Binding) -> anyhow::Result<()> {
        self.bindings.lock().await.insert(binding.binding_id, binding);
        Ok(())
    }
    async fn update_binding(&self, binding: Binding) -> anyhow::Result<()> {
        self.bindings.lock().await.insert(binding.binding_id, binding);
        Ok(())
    }
    async fn delete_binding(&self, binding_id: wbp_protocol::BindingId) -> anyhow::Result<()> {
        self.bindings.lock().await.remove(&binding_id);
        Ok(())
    }
    async fn upsert_token(&self, _token: &str, _server_id: ServerId, _expires_at: u64) -> anyhow::Result<()> {
        Ok(())
    }
    async fn revoke_token(&self, _token: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn append_audit(&self, entry: AuditEntry) -> anyhow::Result<()> {
        self.audit.lock().await.push(entry);
        Ok(())
    }
    async fn query_audit(&self, query: AuditQuery) -> anyhow::Result<Vec<AuditEntry>> {
        Ok(self
            .audit
            .lock()
            .await
            .iter()
            .filter(|e| query.op.as_ref().map(|op| &e.op == op).unwrap_or(true))
            .cloned()
            .collect())
    }
    async fn cleanup_old_audit(&self, before: u64) -> anyhow::Result<u64> {
        let mut audit = self.audit.lock().await;
        let before_len = audit.len();
        audit.retain(|e| e.at >= before);
        Ok((before_len - audit.len()) as u64)
    }
}

/// Forwards `AuditLog::append` to the same store's `append_audit`, so the
/// default deployment has one audit trail instead of two. An independent
/// sink (e.g. a SIEM) can still implement `AuditLog` directly.
pub struct StoreBackedAuditLog {
    store: Arc<dyn PersistentStore>,
}

impl StoreBackedAuditLog {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditLog for StoreBackedAuditLog {
    async fn append(&self, entry: AuditEntry) -> anyhow::Result<()> {
        self.store.append_audit(entry).await
    }
}

/// Logs outbound group messages instead of delivering them to a real chat
/// platform; the `hub` binary's default until a concrete platform adapter
/// is configured.
#[derive(Default)]
pub struct LoggingChatAdapter;

#[async_trait]
impl ChatPlatformAdapter for LoggingChatAdapter {
    async fn deliver_outbound(&self, group_id: &str, content: &str) -> anyhow::Result<()> {
        tracing::info!(group_id, content, "outbound group message");
        Ok(())
    }
}

#[cfg(test)]
pub mod test_doubles {
    //! Test doubles for the collaborator contracts not yet backed by a
    //! production default.

    use super::*;

    #[derive(Default)]
    pub struct AlwaysValidToken;

    #[async_trait]
    impl TokenValidator for AlwaysValidToken {
        async fn validate(&self, _token: &str, _client_ip: std::net::IpAddr) -> anyhow::Result<TokenDecision> {
            Ok(TokenDecision {
                valid: true,
                server_id: None,
                expired: false,
                ip_allowed: true,
            })
        }
    }

    #[derive(Default)]
    pub struct RecordingChatAdapter {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChatPlatformAdapter for RecordingChatAdapter {
        async fn deliver_outbound(&self, group_id: &str, content: &str) -> anyhow::Result<()> {
            self.sent.lock().await.push((group_id.to_string(), content.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_a_server() {
        let store = InMemoryStore::default();
        let descriptor = ServerDescriptor::new(ServerId::new(), "vanilla", "owner-1");
        store.create_server(descriptor.clone()).await.unwrap();
        let fetched = store.get_server(descriptor.server_id).await.unwrap();
        assert_eq!(fetched.unwrap().server_id, descriptor.server_id);
    }

    #[tokio::test]
    async fn deleting_a_server_cascades_to_its_bindings() {
        let store = InMemoryStore::default();
        let server_id = ServerId::new();
        let binding = Binding::new("g1", server_id, crate::model::BindingKind::Chat, 0);
        store.create_binding(binding).await.unwrap();
        store.delete_server(server_id).await.unwrap();
        assert!(store.list_bindings(server_id).await.unwrap().is_empty());
    }
}
