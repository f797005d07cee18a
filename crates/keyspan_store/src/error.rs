//! Error types for document store operations.

use crate::types::Cas;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in document store operations.
///
/// Callers depend on `DocumentNotFound`, `CasMismatch`, and `Transient`
/// being distinguishable; the transactions engine classifies retries on
/// exactly this split.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The document does not exist.
    #[error("document not found")]
    DocumentNotFound,

    /// An atomic create found the document already present.
    #[error("document already exists")]
    DocumentExists,

    /// The supplied version token no longer matches the live document.
    #[error("cas mismatch: expected {expected}, found {actual}")]
    CasMismatch {
        /// Token the caller supplied.
        expected: Cas,
        /// Token the store currently holds.
        actual: Cas,
    },

    /// A temporary infrastructure fault; the operation may be retried.
    #[error("transient store failure: {message}")]
    Transient {
        /// Description of the fault.
        message: String,
    },

    /// A non-retryable backend fault.
    #[error("backend failure: {message}")]
    Backend {
        /// Description of the fault.
        message: String,
    },
}

impl StoreError {
    /// Creates a transient (retryable) failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a non-retryable backend failure.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}
