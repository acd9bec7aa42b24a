//! Request router (C5, spec §4.5): a flat dotted-tag handler table built at
//! start-up, mirroring the registration-time lookup table called for in
//! spec §9 ("dynamic operation dispatch by string tag becomes a
//! registration-time lookup table").

use crate::error::HubError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use wbp_protocol::{Frame, FrameType, Op};

/// A handler's return future, boxed so the table can hold handlers that
/// each close over a different set of collaborators.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, HubError>> + Send>>;

/// Handlers receive the request payload and the dispatch timestamp — most
/// of them need `now` for audit entries, request deadlines, and degrader
/// bookkeeping.
pub type HandlerFn = Arc<dyn Fn(serde_json::Value, u64) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
pub struct RequestRouter {
    handlers: HashMap<String, HandlerFn>,
}

impl RequestRouter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, op: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(op.into(), handler);
    }

    pub fn is_registered(&self, op: &str) -> bool {
        self.handlers.contains_key(op)
    }

    /// Dispatches `frame` (which MUST be a request) to its handler and
    /// builds the correlated response, guaranteeing the invariants in §4.5:
    /// response id equals request id, unknown op maps to `UNKNOWN_OPERATION`,
    /// handler panics/errors map to `REQUEST_FAILED` with a redacted cause.
    pub async fn dispatch(&self, frame: &Frame, now: u64) -> Frame {
        debug_assert!(matches!(frame.frame_type, FrameType::Request));
        let id = frame.id.clone().unwrap_or_default();
        let op = frame.op.clone().unwrap_or_else(|| Op::new(""));

        let result = match self.handlers.get(&op.0) {
            None => Err(HubError::UnknownOperation(op.0.clone())),
            Some(handler) => handler(frame.data.clone().unwrap_or(serde_json::Value::Null), now).await,
        };

        match result {
            Ok(data) => Frame::response(id, op, data, now),
            Err(err) => Frame::error_response(id, op, err.to_frame_error(), now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_handler<F>(f: F) -> HandlerFn
    where
        F: Fn(serde_json::Value) -> Result<serde_json::Value, HubError> + Send + Sync + 'static,
    {
        Arc::new(move |data, _now| {
            let result = f(data);
            Box::pin(async move { result })
        })
    }

    #[tokio::test]
    async fn response_echoes_request_id_and_op() {
        let mut router = RequestRouter::new();
        router.register("system.ping", sync_handler(|_| Ok(serde_json::json!({"success": true}))));
        let req = Frame::request("r1", Op::new("system.ping"), serde_json::json!({}), 1);
        let resp = router.dispatch(&req, 2).await;
        assert_eq!(resp.id, req.id);
        assert_eq!(resp.op, req.op);
    }

    #[tokio::test]
    async fn unknown_op_maps_to_unknown_operation_error() {
        let router = RequestRouter::new();
        let req = Frame::request("r1", Op::new("server.teleport"), serde_json::json!({}), 1);
        let resp = router.dispatch(&req, 2).await;
        assert_eq!(resp.error.unwrap().code, "UNKNOWN_OPERATION");
    }

    #[tokio::test]
    async fn handler_error_maps_to_request_failed_with_redacted_cause() {
        let mut router = RequestRouter::new();
        router.register(
            "command.execute",
            sync_handler(|_| Err(HubError::Internal("db password leaked".into()))),
        );
        let req = Frame::request("r1", Op::new("command.execute"), serde_json::json!({}), 1);
        let resp = router.dispatch(&req, 2).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, "REQUEST_FAILED");
        assert!(!err.message.contains("password"));
    }
}
