//! The key/value container holding one request's local variables.

use std::any::{type_name, Any};
use std::sync::Arc;

use crate::error::{FetchError, LocalsError};
use crate::map::ConcurrentMap;

/// A type-erased request-local value.
pub type LocalValue = Arc<dyn Any + Send + Sync>;

/// Local variables for a single request.
///
/// Values of any `Send + Sync + 'static` type are stored behind an `Arc` and
/// handed back typed. Reading a key under a type other than the one it was
/// stored with yields `None` from [`get`](Self::get) and
/// [`LocalsError::TypeMismatch`] from [`fetch`](Self::fetch).
///
/// Keys are strings. Lookups borrow (`&str`) and writes take anything
/// `Into<String>`, so owned and borrowed keys address the same entry. Callers
/// with structured keys format them into a string first.
#[derive(Debug, Default)]
pub struct RequestStore {
    locals: ConcurrentMap<String, LocalValue>,
}

impl RequestStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key` if it exists and has type `T`.
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.get_raw(key)?.downcast::<T>().ok()
    }

    /// Returns the type-erased value stored under `key`.
    pub fn get_raw(&self, key: &str) -> Option<LocalValue> {
        self.locals.get(key)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.locals.insert(key.into(), Arc::new(value));
    }

    /// Removes `key`, returning its previous value.
    pub fn delete(&self, key: &str) -> Option<LocalValue> {
        self.locals.remove(key)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.locals.contains_key(key)
    }

    /// Alias of [`exists`](Self::exists).
    pub fn contains_key(&self, key: &str) -> bool {
        self.exists(key)
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.locals.len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.locals.keys()
    }

    /// Returns the value under `key`, computing and storing it first if absent.
    ///
    /// `compute` may itself read or fetch other keys of this store.
    ///
    /// # Errors
    ///
    /// Returns [`LocalsError::TypeMismatch`] if the key already holds a value
    /// of a different type.
    pub fn fetch<T, F>(&self, key: impl Into<String>, compute: F) -> Result<Arc<T>, LocalsError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let key = key.into();
        let value = self
            .locals
            .fetch_or_compute(key.clone(), || Arc::new(compute()) as LocalValue);
        downcast(key, value)
    }

    /// Like [`fetch`](Self::fetch), for computations that can fail.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Compute`] with the callback's error, leaving the
    /// key absent, or [`FetchError::Locals`] on a type mismatch.
    pub fn try_fetch<T, E, F>(
        &self,
        key: impl Into<String>,
        compute: F,
    ) -> Result<Arc<T>, FetchError<E>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, E>,
    {
        let key = key.into();
        let value = self
            .locals
            .fetch_or_try_compute(key.clone(), || {
                compute().map(|value| Arc::new(value) as LocalValue)
            })
            .map_err(FetchError::Compute)?;
        Ok(downcast(key, value)?)
    }
}

fn downcast<T>(key: String, value: LocalValue) -> Result<Arc<T>, LocalsError>
where
    T: Any + Send + Sync,
{
    value.downcast::<T>().map_err(|_| LocalsError::TypeMismatch {
        key,
        expected: type_name::<T>(),
    })
}
