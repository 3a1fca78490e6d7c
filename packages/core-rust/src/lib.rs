//! Request-scoped key/value storage shared across the threads of one logical
//! request.
//!
//! A [`StoreRegistry`] owns one [`RequestStore`] per [`StoreId`]. Each thread
//! carries the id of the request it works for in a thread-local slot, and the
//! [`RequestLocals`] facade resolves every map operation through that slot.
//! Work handed to other threads or tasks must forward the id explicitly, see
//! [`context`].

pub mod context;
pub mod error;
pub mod id;
pub mod locals;
pub mod map;
pub mod registry;
pub mod store;

pub use context::{
    current_store_id, set_current_store_id, spawn_with_store_id, StoreIdExt, StoreScope,
    WithStoreId,
};
pub use error::{FetchError, LocalsError};
pub use id::StoreId;
pub use locals::{ClearOnDrop, RequestGuard, RequestLocals};
pub use map::ConcurrentMap;
pub use registry::StoreRegistry;
pub use store::{LocalValue, RequestStore};
