//! Core data entities (spec §3). Each submodule owns one entity and the
//! invariants that apply to it; no entity reaches into another's fields
//! directly — components that need cross-entity behavior call methods.

mod auth_failure;
mod binding;
mod event;
mod operation;
mod server;
mod session;
mod subscription;
mod sync_conflict;

pub use auth_failure::AuthFailureRecord;
pub use binding::{Binding, BindingKind, FilterAction, FilterRule, RateLimitWindow};
pub use event::Event;
pub use operation::{is_cacheable, PendingOperation, PendingOperationStatus};
pub use server::{ConnectionConfig, CoreKind, Mode, ServerDescriptor};
pub use session::{DuplicateRequestId, PendingRequest, PendingRequestOutcome, Session, SessionStatus};
pub use subscription::{EventFilter, Subscription};
pub use sync_conflict::{ConflictKind, ResolutionStrategy, SyncConflict};
