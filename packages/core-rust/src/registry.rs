//! Process-wide registry of per-request stores.
//!
//! Holds the root map behind an [`ArcSwap`] so [`StoreRegistry::reset_all`]
//! can install a fresh map in one pointer swap. Stores handed out before a
//! reset stay usable; they are simply no longer reachable from the registry.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::id::StoreId;
use crate::map::ConcurrentMap;
use crate::store::RequestStore;

type Stores = ConcurrentMap<StoreId, Arc<RequestStore>>;

/// Maps each [`StoreId`] to its [`RequestStore`], creating stores lazily.
///
/// At most one store exists per id at any time. A cleared id behaves exactly
/// like one that was never seen.
#[derive(Debug)]
pub struct StoreRegistry {
    stores: ArcSwap<Stores>,
}

impl StoreRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stores: ArcSwap::from_pointee(Stores::new()),
        }
    }

    /// Returns the store for `id`, creating an empty one on first access.
    pub fn store_for(&self, id: &StoreId) -> Arc<RequestStore> {
        self.stores.load().fetch_or_compute(id.clone(), || {
            debug!(store_id = %id, "creating request store");
            Arc::new(RequestStore::new())
        })
    }

    /// Returns the store for `id` without creating it.
    pub fn peek(&self, id: &StoreId) -> Option<Arc<RequestStore>> {
        self.stores.load().get(id)
    }

    /// Drops the store for `id`. No-op if the id has no store.
    pub fn clear(&self, id: &StoreId) {
        if self.stores.load().remove(id).is_some() {
            debug!(store_id = %id, "cleared request store");
        }
    }

    /// Discards every store by swapping in a new, empty root map.
    ///
    /// Operations in flight against previously obtained stores keep running
    /// against those orphaned stores.
    pub fn reset_all(&self) {
        let previous = self.stores.swap(Arc::new(Stores::new()));
        debug!(discarded = previous.len(), "reset request store registry");
    }

    #[must_use]
    pub fn contains(&self, id: &StoreId) -> bool {
        self.stores.load().contains_key(id)
    }

    /// Number of live stores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stores.load().is_empty()
    }

    /// Snapshot of the ids that currently own a store.
    #[must_use]
    pub fn store_ids(&self) -> Vec<StoreId> {
        self.stores.load().keys()
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}
