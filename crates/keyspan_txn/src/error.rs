//! Error taxonomy for the transactions engine.
//!
//! Two levels exist. Operation-level errors ([`TxnError`]) are what
//! `get`/`insert`/`replace`/`remove` and the commit protocol produce;
//! the retry loop classifies them into retry vs terminal. The
//! transaction-level outcome ([`TxnFailure`] inside [`ErrorContext`])
//! is what a caller sees on the final result, with the operation-level
//! cause preserved so "transaction failed" and "why" stay separate.

use keyspan_store::{DocumentId, StoreError};
use thiserror::Error;

/// Result type for engine operations.
pub type TxnResult<T> = Result<T, TxnError>;

/// Cause code preserved on a failed transaction result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpErrorKind {
    /// The document does not exist.
    DocumentNotFound,
    /// The document (committed or staged) already exists.
    DocumentExists,
    /// A different, live attempt has staged a change to the document.
    DocumentAlreadyStaged,
    /// The document changed since it was read (version mismatch).
    WriteWriteConflict,
    /// A retryable infrastructure fault from the store.
    TransientStore,
    /// A caller-originated fault with no transaction-aware classification.
    Unknown,
}

/// Errors produced while executing an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxnError {
    /// The document does not exist.
    #[error("document not found: {id}")]
    DocumentNotFound {
        /// Identity that was looked up.
        id: DocumentId,
    },

    /// The document (committed or staged) already exists.
    #[error("document already exists: {id}")]
    DocumentExists {
        /// Identity that collided.
        id: DocumentId,
    },

    /// A different attempt currently owns the document and is still live.
    #[error("document staged by another attempt: {id}")]
    DocumentAlreadyStaged {
        /// Identity of the contended document.
        id: DocumentId,
    },

    /// The document's live version token no longer matches the one read.
    #[error("write-write conflict on {id}")]
    WriteWriteConflict {
        /// Identity of the conflicted document.
        id: DocumentId,
    },

    /// A retryable infrastructure fault.
    #[error("transient store failure: {message}")]
    TransientStore {
        /// Description of the fault.
        message: String,
    },

    /// The transaction's expiry deadline has passed.
    #[error("transaction expired")]
    Expired,

    /// An operation was used outside its contract.
    #[error("invalid operation: {message}")]
    IllegalState {
        /// What was violated.
        message: String,
    },

    /// An arbitrary fault raised by caller logic.
    #[error("caller fault: {message}")]
    Fault {
        /// Description supplied by the caller.
        message: String,
    },
}

impl TxnError {
    /// Creates a caller-originated fault.
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
        }
    }

    /// Creates an invalid-operation error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Maps a store-level failure observed while operating on `id`.
    pub(crate) fn from_store(id: &DocumentId, err: StoreError) -> Self {
        match err {
            StoreError::DocumentNotFound => Self::DocumentNotFound { id: id.clone() },
            StoreError::DocumentExists => Self::DocumentExists { id: id.clone() },
            StoreError::CasMismatch { .. } => Self::WriteWriteConflict { id: id.clone() },
            StoreError::Transient { message } => Self::TransientStore { message },
            StoreError::Backend { message } => Self::Fault { message },
        }
    }

    /// Returns true if a fresh attempt may succeed where this one failed.
    ///
    /// Conflicts and transient faults are recoverable; everything else
    /// is terminal for the transaction (though caller logic may catch
    /// and handle op errors like `DocumentNotFound` itself).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TxnError::DocumentAlreadyStaged { .. }
                | TxnError::WriteWriteConflict { .. }
                | TxnError::TransientStore { .. }
        )
    }

    /// The cause code recorded on a terminal result.
    #[must_use]
    pub fn kind(&self) -> OpErrorKind {
        match self {
            TxnError::DocumentNotFound { .. } => OpErrorKind::DocumentNotFound,
            TxnError::DocumentExists { .. } => OpErrorKind::DocumentExists,
            TxnError::DocumentAlreadyStaged { .. } => OpErrorKind::DocumentAlreadyStaged,
            TxnError::WriteWriteConflict { .. } => OpErrorKind::WriteWriteConflict,
            TxnError::TransientStore { .. } => OpErrorKind::TransientStore,
            TxnError::Expired | TxnError::IllegalState { .. } | TxnError::Fault { .. } => {
                OpErrorKind::Unknown
            }
        }
    }
}

/// Transaction-level outcome code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnFailure {
    /// The transaction failed and was rolled back.
    Failed,
    /// The transaction ran out of time before it could commit.
    Expired,
}

/// Error context attached to a transaction result.
///
/// Carries the outer outcome code and, for `Failed`, the inner cause so
/// callers can distinguish "transaction failed" from "why".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorContext {
    error: Option<TxnFailure>,
    cause: Option<OpErrorKind>,
}

impl ErrorContext {
    /// A context reporting success.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// A context reporting a terminal failure with its cause.
    #[must_use]
    pub fn failed(cause: OpErrorKind) -> Self {
        Self {
            error: Some(TxnFailure::Failed),
            cause: Some(cause),
        }
    }

    /// A context reporting expiry.
    #[must_use]
    pub fn expired(cause: Option<OpErrorKind>) -> Self {
        Self {
            error: Some(TxnFailure::Expired),
            cause,
        }
    }

    /// Returns the transaction-level outcome, `None` on success.
    #[must_use]
    pub fn ec(&self) -> Option<TxnFailure> {
        self.error
    }

    /// Returns the underlying cause code, if any.
    #[must_use]
    pub fn cause(&self) -> Option<OpErrorKind> {
        self.cause
    }

    /// Returns true if no failure was recorded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
