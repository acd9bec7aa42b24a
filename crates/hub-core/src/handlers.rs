//! Core operation handlers (spec §6): wires the request router's handler
//! table to the session, connection, degradation and audit machinery so
//! dispatching a frame actually drives admission -> session -> adapter ->
//! retry/degrade -> audit, instead of leaving that to a caller.

use crate::collaborators::{AuditEntry, AuditLog, AuditResult, PersistentStore};
use crate::connection::{ConnectionModeManager, SessionManager};
use crate::degrader::BusinessErrorDegrader;
use crate::error::HubError;
use crate::model::{is_cacheable, EventFilter, PendingRequestOutcome, Subscription};
use crate::retry::RetryEngine;
use crate::router::event_bus::EventBus;
use crate::router::request_router::{HandlerFn, HandlerFuture, RequestRouter};
use std::str::FromStr;
use std::sync::Arc;
use wbp_protocol::{RequestId, ServerId, SessionId, SubscriptionId};

pub struct HandlerContext {
    pub sessions: Arc<SessionManager>,
    pub mode_manager: Arc<ConnectionModeManager>,
    pub event_bus: Arc<EventBus>,
    pub degrader: Arc<BusinessErrorDegrader>,
    pub retry: Arc<RetryEngine>,
    pub store: Arc<dyn PersistentStore>,
    pub audit: Arc<dyn AuditLog>,
    pub request_timeout_ms: u64,
}

impl HandlerContext {
    async fn record_audit(&self, op: &str, server_id: Option<ServerId>, result: AuditResult, error_message: Option<String>, now: u64) {
        let entry = AuditEntry {
            user_id: None,
            server_id,
            op: op.to_string(),
            payload: serde_json::Value::Null,
            result,
            error_message,
            ip: None,
            user_agent: None,
            at: now,
        };
        if let Err(err) = self.audit.append(entry).await {
            tracing::warn!(%err, op, "failed to append audit entry");
        }
    }
}

fn field<'a>(payload: &'a serde_json::Value, key: &str) -> Result<&'a serde_json::Value, HubError> {
    payload.get(key).ok_or_else(|| HubError::InvalidRequest(format!("missing field {key}")))
}

fn field_str<'a>(payload: &'a serde_json::Value, key: &str) -> Result<&'a str, HubError> {
    field(payload, key)?
        .as_str()
        .ok_or_else(|| HubError::InvalidRequest(format!("field {key} must be a string")))
}

fn field_id<T>(payload: &serde_json::Value, key: &str) -> Result<T, HubError>
where
    T: FromStr,
{
    field_str(payload, key)?
        .parse()
        .map_err(|_| HubError::InvalidRequest(format!("field {key} is not a valid id")))
}

/// Registers every op in spec §6's core namespace against `ctx`.
pub fn register_core_handlers(router: &mut RequestRouter, ctx: Arc<HandlerContext>) {
    macro_rules! register {
        ($op:literal, $f:expr) => {
            let ctx = ctx.clone();
            let handler: HandlerFn = Arc::new(move |payload, now| {
                let ctx = ctx.clone();
                let fut: HandlerFuture = Box::pin($f(ctx, payload, now));
                fut
            });
            router.register($op, handler);
        };
    }

    register!("system.ping", handle_system_ping);
    register!("event.subscribe", handle_event_subscribe);
    register!("event.unsubscribe", handle_event_unsubscribe);
    register!("event.list", handle_event_list);
    register!("server.get_info", handle_server_get_info);
    register!("server.get_status", handle_server_get_status);
    register!("server.get_metrics", handle_server_get_metrics);
    register!("server.save", handle_server_save);
    register!("server.restart", handle_server_restart);
    register!("server.shutdown", handle_server_shutdown);
    register!("player.list", handle_player_list);
    register!("player.get_info", handle_player_get_info);
    register!("player.kick", handle_player_kick);
    register!("player.message", handle_player_message);
    register!("whitelist.get", handle_whitelist_get);
    register!("whitelist.add", handle_whitelist_add);
    register!("whitelist.remove", handle_whitelist_remove);
    register!("command.execute", handle_command_execute);
}

async fn handle_system_ping(_ctx: Arc<HandlerContext>, _payload: serde_json::Value, now: u64) -> Result<serde_json::Value, HubError> {
    Ok(serde_json::json!({"pong": now}))
}

async fn handle_event_subscribe(ctx: Arc<HandlerContext>, payload: serde_json::Value, now: u64) -> Result<serde_json::Value, HubError> {
    let session_id: SessionId = field_id(&payload, "sessionId")?;
    let server_id: Option<ServerId> = payload.get("serverId").and_then(|v| v.as_str()).and_then(|s| s.parse().ok());
    let filter = match payload.get("preset").and_then(|v| v.as_str()) {
        Some("extended") => EventFilter::extended(),
        _ => EventFilter::basic(),
    };
    let subscription = Subscription::new(session_id, server_id, filter, now);
    let id = ctx.event_bus.subscribe(subscription).await;
    Ok(serde_json::json!({"subscriptionId": id.to_string()}))
}

async fn handle_event_unsubscribe(ctx: Arc<HandlerContext>, payload: serde_json::Value, _now: u64) -> Result<serde_json::Value, HubError> {
    let subscription_id: SubscriptionId = field_id(&payload, "subscriptionId")?;
    let removed = ctx.event_bus.unsubscribe(subscription_id).await;
    Ok(serde_json::json!({"success": removed}))
}

async fn handle_event_list(ctx: Arc<HandlerContext>, payload: serde_json::Value, _now: u64) -> Result<serde_json::Value, HubError> {
    let session_id: SessionId = field_id(&payload, "sessionId")?;
    let ids = ctx.event_bus.subscriptions_for_session(session_id).await;
    Ok(serde_json::json!({"subscriptions": ids.iter().map(|id| id.to_string()).collect::<Vec<_>>()}))
}

async fn handle_server_get_info(ctx: Arc<HandlerContext>, payload: serde_json::Value, _now: u64) -> Result<serde_json::Value, HubError> {
    let server_id: ServerId = field_id(&payload, "serverId")?;
    let descriptor = ctx
        .store
        .get_server(server_id)
        .await
        .map_err(|e| HubError::Internal(e.to_string()))?
        .ok_or_else(|| HubError::InvalidRequest("unknown serverId".into()))?;
    serde_json::to_value(descriptor).map_err(|e| HubError::Internal(e.to_string()))
}

async fn handle_server_get_status(ctx: Arc<HandlerContext>, payload: serde_json::Value, _now: u64) -> Result<serde_json::Value, HubError> {
    let server_id: ServerId = field_id(&payload, "serverId")?;
    let state = ctx.mode_manager.state_of(server_id);
    let mode = ctx.mode_manager.active_mode(server_id);
    Ok(serde_json::json!({
        "state": format!("{state:?}"),
        "mode": mode.map(|m| format!("{m:?}")),
    }))
}

async fn handle_server_get_metrics(ctx: Arc<HandlerContext>, payload: serde_json::Value, _now: u64) -> Result<serde_json::Value, HubError> {
    let server_id: ServerId = field_id(&payload, "serverId")?;
    let quality = ctx.retry.quality(server_id);
    Ok(serde_json::json!({"connectionQuality": quality.0}))
}

async fn run_command(
    ctx: &Arc<HandlerContext>,
    server_id: ServerId,
    command: &str,
    session_id: Option<SessionId>,
    op: &str,
    now: u64,
) -> Result<serde_json::Value, HubError> {
    let Some(adapter) = ctx.mode_manager.active_adapter(server_id) else {
        return match ctx.degrader.handle_unavailable(server_id, op, serde_json::json!({"command": command}), now) {
            Ok(op_id) => Ok(serde_json::json!({"queued": true, "pendingOperationId": op_id.to_string()})),
            Err(err) => {
                ctx.record_audit(op, Some(server_id), AuditResult::Failure, Some(err.to_string()), now).await;
                Err(err)
            }
        };
    };

    let timeout = std::time::Duration::from_millis(ctx.request_timeout_ms.max(1));
    let request_id = RequestId::new();
    let deadline = now + timeout.as_secs().max(1);
    let _rx = if let Some(session_id) = session_id {
        ctx.sessions.begin_request(session_id, request_id, op, deadline).await.ok()
    } else {
        None
    };

    let outcome = tokio::time::timeout(timeout, adapter.send_command(command, timeout)).await;
    match outcome {
        Ok(Ok(outcome)) => {
            if let Some(session_id) = session_id {
                ctx.sessions
                    .resolve_request(session_id, request_id, PendingRequestOutcome::Response(serde_json::json!({"success": outcome.success})))
                    .await;
            }
            ctx.record_audit(op, Some(server_id), AuditResult::Success, None, now).await;
            Ok(serde_json::json!({
                "success": outcome.success,
                "output": outcome.output,
                "elapsedMs": outcome.elapsed.as_millis() as u64,
                "error": outcome.error,
            }))
        }
        Ok(Err(err)) => {
            if let Some(session_id) = session_id {
                ctx.sessions
                    .resolve_request(session_id, request_id, PendingRequestOutcome::Timeout)
                    .await;
            }
            ctx.record_audit(op, Some(server_id), AuditResult::Error, Some(err.to_string()), now).await;
            Err(HubError::ConnectionFailed(err.to_string()))
        }
        Err(_elapsed) => {
            if let Some(session_id) = session_id {
                ctx.sessions.resolve_request(session_id, request_id, PendingRequestOutcome::Timeout).await;
            }
            ctx.record_audit(op, Some(server_id), AuditResult::Error, Some("timed out".into()), now).await;
            Err(HubError::Timeout)
        }
    }
}

async fn handle_server_save(ctx: Arc<HandlerContext>, payload: serde_json::Value, now: u64) -> Result<serde_json::Value, HubError> {
    let server_id: ServerId = field_id(&payload, "serverId")?;
    run_command(&ctx, server_id, "save-all", None, "server.save", now).await
}

async fn handle_server_restart(ctx: Arc<HandlerContext>, payload: serde_json::Value, now: u64) -> Result<serde_json::Value, HubError> {
    let server_id: ServerId = field_id(&payload, "serverId")?;
    run_command(&ctx, server_id, "restart", None, "server.restart", now).await
}

async fn handle_server_shutdown(ctx: Arc<HandlerContext>, payload: serde_json::Value, now: u64) -> Result<serde_json::Value, HubError> {
    let server_id: ServerId = field_id(&payload, "serverId")?;
    run_command(&ctx, server_id, "stop", None, "server.shutdown", now).await
}

async fn handle_player_list(ctx: Arc<HandlerContext>, payload: serde_json::Value, now: u64) -> Result<serde_json::Value, HubError> {
    let server_id: ServerId = field_id(&payload, "serverId")?;
    run_command(&ctx, server_id, "list", None, "player.list", now).await
}

async fn handle_player_get_info(ctx: Arc<HandlerContext>, payload: serde_json::Value, now: u64) -> Result<serde_json::Value, HubError> {
    let server_id: ServerId = field_id(&payload, "serverId")?;
    let player = field_str(&payload, "playerId")?;
    run_command(&ctx, server_id, &format!("player-info {player}"), None, "player.get_info", now).await
}

async fn handle_player_kick(ctx: Arc<HandlerContext>, payload: serde_json::Value, now: u64) -> Result<serde_json::Value, HubError> {
    let server_id: ServerId = field_id(&payload, "serverId")?;
    let player = field_str(&payload, "playerId")?;
    let reason = payload.get("reason").and_then(|v| v.as_str()).unwrap_or("kicked");
    run_command(&ctx, server_id, &format!("kick {player} {reason}"), None, "player.kick", now).await
}

async fn handle_player_message(ctx: Arc<HandlerContext>, payload: serde_json::Value, now: u64) -> Result<serde_json::Value, HubError> {
    let server_id: ServerId = field_id(&payload, "serverId")?;
    let player = field_str(&payload, "playerId")?;
    let message = field_str(&payload, "message")?;
    run_command(&ctx, server_id, &format!("tell {player} {message}"), None, "player.message", now).await
}

async fn handle_whitelist_get(ctx: Arc<HandlerContext>, payload: serde_json::Value, now: u64) -> Result<serde_json::Value, HubError> {
    let server_id: ServerId = field_id(&payload, "serverId")?;
    run_command(&ctx, server_id, "whitelist list", None, "whitelist.get", now).await
}

async fn handle_whitelist_add(ctx: Arc<HandlerContext>, payload: serde_json::Value, now: u64) -> Result<serde_json::Value, HubError> {
    let server_id: ServerId = field_id(&payload, "serverId")?;
    let player = field_str(&payload, "playerId")?;
    run_command(&ctx, server_id, &format!("whitelist add {player}"), None, "whitelist.add", now).await
}

async fn handle_whitelist_remove(ctx: Arc<HandlerContext>, payload: serde_json::Value, now: u64) -> Result<serde_json::Value, HubError> {
    let server_id: ServerId = field_id(&payload, "serverId")?;
    let player = field_str(&payload, "playerId")?;
    run_command(&ctx, server_id, &format!("whitelist remove {player}"), None, "whitelist.remove", now).await
}

async fn handle_command_execute(ctx: Arc<HandlerContext>, payload: serde_json::Value, now: u64) -> Result<serde_json::Value, HubError> {
    let server_id: ServerId = field_id(&payload, "serverId")?;
    let session_id: Option<SessionId> = payload.get("sessionId").and_then(|v| v.as_str()).and_then(|s| s.parse().ok());
    let command = field_str(&payload, "command")?;
    run_command(&ctx, server_id, command, session_id, "command.execute", now).await
}
