//! The current context of a logical execution unit.
//!
//! Each unit (a request's future, or an offloaded hop) runs inside a
//! task-local scope holding one [`ContextSnapshot`]. `put` swaps that scope's
//! snapshot for a new one; snapshots captured earlier are never modified.
//! When the scope ends, normally or by unwinding, whatever the thread held
//! before becomes current again.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;

use super::snapshot::{ContextKey, ContextSnapshot};

tokio::task_local! {
    static CURRENT: RefCell<ContextSnapshot>;
}

/// Error type for context writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// There is no context scope on the current task.
    #[error("no request context is in scope")]
    NoScope,
}

/// Capture the current context. Returns the empty snapshot outside a scope.
pub fn capture() -> ContextSnapshot {
    CURRENT
        .try_with(|current| current.borrow().clone())
        .unwrap_or_default()
}

/// Run `fut` with `snapshot` as its context.
///
/// The snapshot replaces whatever context the caller had for the duration of
/// `fut` only.
pub fn restore<F>(snapshot: ContextSnapshot, fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    CURRENT.scope(RefCell::new(snapshot), fut)
}

/// Synchronous variant of [`restore`].
pub fn restore_sync<R>(snapshot: ContextSnapshot, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(RefCell::new(snapshot), f)
}

/// Returns `true` when a context scope is active on this task.
pub fn in_scope() -> bool {
    CURRENT.try_with(|_| ()).is_ok()
}

/// Set `key` in the current context.
pub fn put<T>(key: &ContextKey<T>, value: T) -> Result<(), ContextError>
where
    T: Any + fmt::Debug + Send + Sync,
{
    CURRENT
        .try_with(|current| {
            let next = current.borrow().with(key, value);
            *current.borrow_mut() = next;
        })
        .map_err(|_| ContextError::NoScope)
}

/// Remove `key` from the current context.
pub fn remove<T>(key: &ContextKey<T>) -> Result<(), ContextError> {
    CURRENT
        .try_with(|current| {
            let next = current.borrow().without(key);
            *current.borrow_mut() = next;
        })
        .map_err(|_| ContextError::NoScope)
}

/// Look up `key` in the current context.
pub fn get<T>(key: &ContextKey<T>) -> Option<T>
where
    T: Any + fmt::Debug + Send + Sync + Clone,
{
    CURRENT
        .try_with(|current| current.borrow().get(key).cloned())
        .ok()
        .flatten()
}

/// Returns `true` if the current context holds no entries.
pub fn is_empty() -> bool {
    CURRENT
        .try_with(|current| current.borrow().is_empty())
        .unwrap_or(true)
}

/// Replace the current context wholesale.
///
/// Used by the offload bridge to carry a hop's final state back into the
/// caller's scope.
pub(crate) fn replace(snapshot: ContextSnapshot) -> Result<(), ContextError> {
    CURRENT
        .try_with(|current| {
            *current.borrow_mut() = snapshot;
        })
        .map_err(|_| ContextError::NoScope)
}
