//! Transaction results.

use crate::error::ErrorContext;
use crate::types::TransactionId;

/// The outcome of running a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    transaction_id: TransactionId,
    unstaging_complete: bool,
    ctx: ErrorContext,
}

impl TransactionResult {
    pub(crate) fn new(
        transaction_id: TransactionId,
        unstaging_complete: bool,
        ctx: ErrorContext,
    ) -> Self {
        Self {
            transaction_id,
            unstaging_complete,
            ctx,
        }
    }

    /// The transaction's identifier.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// True once every staged document became visible final state.
    ///
    /// A committed transaction whose unstaging was interrupted reports
    /// `false` here while still having committed; the cleanup subsystem
    /// finishes making the changes visible.
    #[must_use]
    pub fn unstaging_complete(&self) -> bool {
        self.unstaging_complete
    }

    /// Error context: outcome code and underlying cause.
    #[must_use]
    pub fn ctx(&self) -> &ErrorContext {
        &self.ctx
    }

    /// True if the transaction committed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.ctx.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OpErrorKind, TxnFailure};

    #[test]
    fn success_result() {
        let result = TransactionResult::new(TransactionId::generate(), true, ErrorContext::ok());
        assert!(result.is_success());
        assert!(result.unstaging_complete());
        assert_eq!(result.ctx().ec(), None);
    }

    #[test]
    fn failed_result_keeps_cause() {
        let result = TransactionResult::new(
            TransactionId::generate(),
            false,
            ErrorContext::failed(OpErrorKind::DocumentExists),
        );
        assert!(!result.is_success());
        assert_eq!(result.ctx().ec(), Some(TxnFailure::Failed));
        assert_eq!(result.ctx().cause(), Some(OpErrorKind::DocumentExists));
    }
}
