//! Snapshot of a document as observed during an attempt.

use crate::types::AttemptId;
use keyspan_store::{Cas, DocumentId, StagedOp};

/// A document as read by an attempt.
///
/// Holds the identity, the content visible to this attempt (the staged
/// view for the attempt's own writes, the committed view otherwise),
/// and the version token proving when the read happened. Mutation calls
/// take this back to detect intervening changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionGetResult {
    id: DocumentId,
    content: Vec<u8>,
    cas: Cas,
    attempt_id: AttemptId,
    staged_op: Option<StagedOp>,
}

impl TransactionGetResult {
    pub(crate) fn new(
        id: DocumentId,
        content: Vec<u8>,
        cas: Cas,
        attempt_id: AttemptId,
        staged_op: Option<StagedOp>,
    ) -> Self {
        Self {
            id,
            content,
            cas,
            attempt_id,
            staged_op,
        }
    }

    /// Identity of the document.
    #[must_use]
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Key of the document within its collection.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.id.key
    }

    /// Content visible to this attempt at read time.
    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Version token captured at read time.
    #[must_use]
    pub fn cas(&self) -> Cas {
        self.cas
    }

    /// The staged operation, when this view is the attempt's own
    /// staged write.
    #[must_use]
    pub fn staged_op(&self) -> Option<StagedOp> {
        self.staged_op
    }

    pub(crate) fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }
}
