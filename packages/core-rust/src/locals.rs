//! The public request-locals facade and request lifecycle hooks.
//!
//! [`RequestLocals`] resolves every call through the calling thread's current
//! [`StoreId`] to a [`RequestStore`] in its [`StoreRegistry`]. The registry is
//! injected at construction rather than living in a global, so tests and
//! independent applications each get their own.

use std::any::Any;
use std::sync::Arc;

use tracing::debug;

use crate::context::{self, StoreScope};
use crate::error::{FetchError, LocalsError};
use crate::id::StoreId;
use crate::registry::StoreRegistry;
use crate::store::{LocalValue, RequestStore};

/// Map-like access to the current request's local variables.
///
/// Cloning is cheap; clones share the same registry. Reads (`get`, `exists`,
/// `is_empty`, `delete`) never create a store. Writes and fetches create one
/// lazily.
///
/// Without a current id every call addresses the shared store of the absent
/// id. That is not reported as an error.
#[derive(Debug, Clone, Default)]
pub struct RequestLocals {
    registry: Arc<StoreRegistry>,
}

impl RequestLocals {
    /// Creates a facade over a fresh, private registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a facade over an existing registry.
    #[must_use]
    pub fn with_registry(registry: Arc<StoreRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    /// The id of the store this thread currently addresses.
    #[must_use]
    pub fn current_store_id(&self) -> StoreId {
        context::current_store_id()
    }

    /// Changes the store the calling thread reads from and writes to.
    ///
    /// Returns the previously current id.
    pub fn set_current_store_id(id: impl Into<StoreId>) -> StoreId {
        context::set_current_store_id(id)
    }

    /// The current request's store, created if needed.
    #[must_use]
    pub fn store(&self) -> Arc<RequestStore> {
        self.registry.store_for(&context::current_store_id())
    }

    fn existing_store(&self) -> Option<Arc<RequestStore>> {
        self.registry.peek(&context::current_store_id())
    }

    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.existing_store()?.get(key)
    }

    pub fn get_raw(&self, key: &str) -> Option<LocalValue> {
        self.existing_store()?.get_raw(key)
    }

    pub fn set<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.store().set(key, value);
    }

    pub fn delete(&self, key: &str) -> Option<LocalValue> {
        self.existing_store()?.delete(key)
    }

    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.existing_store().is_some_and(|store| store.exists(key))
    }

    /// Alias of [`exists`](Self::exists).
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.exists(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.existing_store().map_or(true, |store| store.is_empty())
    }

    /// Returns the value for `key`, storing the result of `compute` if absent.
    ///
    /// `compute` runs at most once per key even under concurrent callers, and
    /// may itself call back into these request locals.
    ///
    /// # Errors
    ///
    /// Returns [`LocalsError::TypeMismatch`] if the key holds another type.
    pub fn fetch<T, F>(&self, key: impl Into<String>, compute: F) -> Result<Arc<T>, LocalsError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        self.store().fetch(key, compute)
    }

    /// Fallible [`fetch`](Self::fetch). A failed computation stores nothing.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Compute`] when `compute` fails, or
    /// [`FetchError::Locals`] on a type mismatch.
    pub fn try_fetch<T, E, F>(
        &self,
        key: impl Into<String>,
        compute: F,
    ) -> Result<Arc<T>, FetchError<E>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, E>,
    {
        self.store().try_fetch(key, compute)
    }

    /// Removes every local variable of the current request.
    pub fn clear_current(&self) {
        self.registry.clear(&context::current_store_id());
    }

    /// Removes the local variables of every request.
    pub fn clear_all(&self) {
        self.registry.reset_all();
    }

    /// Makes `id` current on this thread for the lifetime of the returned
    /// guard. Dropping the guard ends the request.
    pub fn on_request_start(&self, id: impl Into<StoreId>) -> RequestGuard {
        let id = id.into();
        debug!(store_id = %id, "request started");
        RequestGuard {
            clear: self.clear_on_drop(id.clone()),
            _scope: StoreScope::enter(id),
        }
    }

    /// Returns a guard that clears the store for `id` when dropped, on
    /// whichever thread that happens. Does not touch any thread's current id.
    pub fn clear_on_drop(&self, id: impl Into<StoreId>) -> ClearOnDrop {
        ClearOnDrop {
            registry: Arc::clone(&self.registry),
            id: id.into(),
        }
    }

    /// Clears the current store and resets this thread to the absent id.
    pub fn on_request_end(&self) {
        self.clear_current();
        context::set_current_store_id(StoreId::absent());
    }

    /// Discards all request stores, e.g. on application reload.
    pub fn on_application_reset(&self) {
        debug!("application reset, clearing all request locals");
        self.clear_all();
    }
}

/// Clears one request's store when dropped.
#[derive(Debug)]
#[must_use = "the store is cleared as soon as the guard is dropped"]
pub struct ClearOnDrop {
    registry: Arc<StoreRegistry>,
    id: StoreId,
}

impl ClearOnDrop {
    #[must_use]
    pub fn store_id(&self) -> &StoreId {
        &self.id
    }
}

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        self.registry.clear(&self.id);
        debug!(store_id = %self.id, "request ended");
    }
}

/// Ends a request when dropped: clears its store and restores the thread's
/// previous id.
///
/// On a thread with no id set, the usual case for a worker, this matches
/// [`RequestLocals::on_request_end`] and leaves the thread on the absent id.
/// When requests are nested the outer id comes back instead; call
/// `on_request_end` to reset the thread to absent unconditionally.
///
/// Runs on normal return, on an early `?`, and during panic unwinding. Must
/// be dropped on the thread that created it.
#[derive(Debug)]
#[must_use = "the request ends as soon as the guard is dropped"]
pub struct RequestGuard {
    clear: ClearOnDrop,
    _scope: StoreScope,
}

impl RequestGuard {
    #[must_use]
    pub fn store_id(&self) -> &StoreId {
        self.clear.store_id()
    }
}
