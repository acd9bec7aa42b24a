//! Message router (C9).

pub mod filters;
pub mod router;
pub mod template;

pub use router::{IncomingGroupMessage, MessageRouter, OutgoingGroupMessage, OutgoingMessage, RouterHealth};
