//! Store identifiers naming one logical request's scope.

use std::fmt;
use std::sync::Arc;

/// Opaque identifier of a request-local store.
///
/// Cloning is cheap (`Arc<str>` inside). The absent id is a legal, distinct
/// key: every thread that never set an id shares the store it names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(Option<Arc<str>>);

impl StoreId {
    /// Creates an id from any string-like value (request id, trace id, token).
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(Some(id.into()))
    }

    /// The id used by threads that have not been assigned a request.
    #[must_use]
    pub const fn absent() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.0.is_none()
    }

    /// Returns the underlying string, or `None` for the absent id.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(id) => f.write_str(id),
            None => f.write_str("<absent>"),
        }
    }
}

impl From<&str> for StoreId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StoreId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl<T: Into<Arc<str>>> From<Option<T>> for StoreId {
    fn from(id: Option<T>) -> Self {
        Self(id.map(Into::into))
    }
}
