//! Immutable, copy-on-write context snapshots.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed slot in the request context.
///
/// The slot name identifies the entry; two keys with the same name address
/// the same slot. Declare keys as constants:
///
/// ```
/// use conduit::context::ContextKey;
///
/// const REQUEST_ID: ContextKey<String> = ContextKey::new("request-id");
/// ```
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    /// Create a key for the named slot.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// The slot name.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

/// Values stored in a snapshot.
trait ContextValue: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug + Send + Sync> ContextValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An immutable set of request-scoped entries, ordered by slot name.
///
/// Cloning is an `Arc` bump. Writing produces a new snapshot and leaves every
/// previously captured snapshot untouched.
#[derive(Clone, Default)]
pub struct ContextSnapshot {
    entries: Arc<BTreeMap<&'static str, Arc<dyn ContextValue>>>,
}

impl ContextSnapshot {
    /// The empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns `true` if the snapshot holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Look up a slot. A value of a different type than the key yields `None`.
    pub fn get<T>(&self, key: &ContextKey<T>) -> Option<&T>
    where
        T: Any + fmt::Debug + Send + Sync,
    {
        self.entries
            .get(key.name)
            .and_then(|v| (**v).as_any().downcast_ref::<T>())
    }

    /// Returns `true` if the slot is present, regardless of value type.
    pub fn contains<T>(&self, key: &ContextKey<T>) -> bool {
        self.entries.contains_key(key.name)
    }

    /// Return a new snapshot with `key` set to `value`.
    #[must_use]
    pub fn with<T>(&self, key: &ContextKey<T>, value: T) -> Self
    where
        T: Any + fmt::Debug + Send + Sync,
    {
        let mut entries = (*self.entries).clone();
        entries.insert(key.name, Arc::new(value));
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Return a new snapshot without `key`.
    #[must_use]
    pub fn without<T>(&self, key: &ContextKey<T>) -> Self {
        if !self.entries.contains_key(key.name) {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        entries.remove(key.name);
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Slot names in order.
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    /// Run `fut` with this snapshot as its current context.
    ///
    /// Used when handler code spawns a nested task that should inherit the
    /// request's context.
    pub fn scope<F>(self, fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        super::scope::restore(self, fut)
    }

    /// Returns `true` if both snapshots share the same storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl fmt::Debug for ContextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

impl PartialEq for ContextSnapshot {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        // Values are opaque; compare slot sets and rendered values.
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((k1, v1), (k2, v2))| k1 == k2 && format!("{v1:?}") == format!("{v2:?}"))
    }
}
