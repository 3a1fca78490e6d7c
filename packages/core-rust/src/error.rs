//! Error types surfaced by request-local reads and fetches.

use thiserror::Error;

/// Misuse of a typed accessor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalsError {
    /// The key holds a value of another type than the one requested.
    #[error("request local `{key}` is not a `{expected}`")]
    TypeMismatch { key: String, expected: &'static str },
}

/// Failure of a fallible fetch-or-compute.
#[derive(Debug, Error)]
pub enum FetchError<E> {
    /// The compute callback failed; nothing was stored for the key.
    #[error("computing request local failed: {0}")]
    Compute(E),
    #[error(transparent)]
    Locals(#[from] LocalsError),
}
