//! Core session, routing and resilience engine for the U-WBP v2 hub.
//!
//! This crate holds every component that does not depend on a process
//! boundary: the data model (§3), the connection/session machinery (C2-C3),
//! the security gate (C4), request and event routing (C5-C6), retry and
//! degradation logic (C7-C8), the chat message router (C9), and the cache
//! layer (C10). The service coordinator (C11) and everything that touches
//! a config file, a socket listener, or signal handling lives in the `hub`
//! binary crate, which depends on this one.

pub mod cache;
pub mod collaborators;
pub mod connection;
pub mod degrader;
pub mod error;
pub mod handlers;
pub mod model;
pub mod retry;
pub mod router;
pub mod security;
pub mod messaging;

pub use error::HubError;
