//! # wbp_protocol
//!
//! The U-WBP v2 wire protocol: frame shapes, operation tags, the abstract
//! error taxonomy, and the identifier newtypes shared between a hub and its
//! remote server connectors.
//!
//! This crate has no knowledge of sessions, adapters, or routing — it only
//! describes what goes on the wire and how to name things. `hub_core` builds
//! the session/routing/resilience engine on top of it.
//!
//! ## Modules
//!
//! - [`frame`] — `Frame`, `FrameType`, `Op`, encode/decode, version/size checks.
//! - [`error`] — the error-code taxonomy from the error handling design.
//! - [`ids`] — newtype identifiers (`ServerId`, `SessionId`, ...).
//! - [`shutdown`] — shared graceful-shutdown flags.
//! - [`utils`] — timestamp helpers.

pub mod error;
pub mod frame;
pub mod ids;
pub mod shutdown;
pub mod utils;

pub use error::{ErrorCode, LogLevel};
pub use frame::{Frame, FrameCodecError, FrameError, FrameType, Op, CURRENT_VERSION, DEFAULT_MAX_FRAME_SIZE};
pub use ids::{BindingId, EventId, PendingOperationId, RequestId, ServerId, SessionId, SubscriptionId};
pub use shutdown::ShutdownState;
pub use utils::{current_timestamp, current_timestamp_ms};
