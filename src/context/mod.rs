//! Request-scoped context propagation.
//!
//! # Data Flow
//! ```text
//! request enters        → empty scope (scope::restore)
//! handler code          → put / get / is_empty on the current scope
//! offload hop (bridge)  → capture() on the source task
//!                       → restore(snapshot) on the worker thread
//!                       → final snapshot carried back to the caller
//! request completes     → scope dropped, thread holds no request state
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable; only `Arc` clones cross threads
//! - Scopes are task-local, never process-global
//! - A snapshot captured by one hop is unaffected by later writes

pub mod scope;
pub mod snapshot;

pub use scope::{capture, get, in_scope, is_empty, put, remove, restore, restore_sync, ContextError};
pub use snapshot::{ContextKey, ContextSnapshot};

/// Slot holding the correlation identifier of the current request.
pub const REQUEST_ID: ContextKey<String> = ContextKey::new("request-id");
