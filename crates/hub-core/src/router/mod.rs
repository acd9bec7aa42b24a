//! Request router (C5) and event bus (C6).

pub mod event_bus;
pub mod request_router;

pub use event_bus::EventBus;
pub use request_router::{HandlerFn, HandlerFuture, RequestRouter};
