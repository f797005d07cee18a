//! Document envelope with colocated staging metadata.

use crate::types::{DocumentId, StagedOp};
use uuid::Uuid;

/// Staging metadata attached to a document by an in-progress attempt.
///
/// While a document is staged, its committed content stays visible to
/// other readers; the staged content only becomes visible once the
/// owning attempt unstages it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingInfo {
    /// Transaction that owns the staged change.
    pub txn_id: Uuid,
    /// Attempt that owns the staged change.
    pub attempt_id: Uuid,
    /// Kind of staged change.
    pub op: StagedOp,
    /// Content to install on unstage. `None` for a staged remove.
    pub staged_content: Option<Vec<u8>>,
    /// Identity of the atomicity record governing this attempt.
    pub record_id: DocumentId,
}

/// Ownership state of a document.
///
/// Every transition between these states is a CAS-guarded envelope
/// replace; there is no partial update of staging metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staging {
    /// No attempt owns the document.
    Clean,
    /// An attempt has staged a change to the document.
    StagedBy(StagingInfo),
}

impl Staging {
    /// Returns true if no attempt owns the document.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        matches!(self, Staging::Clean)
    }

    /// Returns the staging metadata, if any.
    #[must_use]
    pub fn info(&self) -> Option<&StagingInfo> {
        match self {
            Staging::Clean => None,
            Staging::StagedBy(info) => Some(info),
        }
    }

    /// Returns true if the given attempt owns the staged change.
    #[must_use]
    pub fn is_owned_by(&self, attempt_id: Uuid) -> bool {
        self.info().is_some_and(|info| info.attempt_id == attempt_id)
    }
}

/// What the store persists for one document: committed content plus
/// staging state.
///
/// `content` is `None` for a staged insert, which has no committed
/// pre-image; such a document reads as absent to everyone except the
/// owning attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEnvelope {
    /// Committed, visible content. `None` when only a staged insert exists.
    pub content: Option<Vec<u8>>,
    /// Staging state.
    pub staging: Staging,
}

impl DocumentEnvelope {
    /// An envelope holding committed content and no staging.
    #[must_use]
    pub fn committed(content: Vec<u8>) -> Self {
        Self {
            content: Some(content),
            staging: Staging::Clean,
        }
    }

    /// An envelope for a staged insert: no committed content yet.
    #[must_use]
    pub fn staged_insert(info: StagingInfo) -> Self {
        Self {
            content: None,
            staging: Staging::StagedBy(info),
        }
    }

    /// This envelope with staging metadata attached, committed content kept.
    #[must_use]
    pub fn with_staging(mut self, info: StagingInfo) -> Self {
        self.staging = Staging::StagedBy(info);
        self
    }

    /// This envelope with staging cleared, committed content kept.
    #[must_use]
    pub fn into_clean(mut self) -> Self {
        self.staging = Staging::Clean;
        self
    }

    /// Returns true if the document has committed content.
    #[must_use]
    pub fn has_committed_content(&self) -> bool {
        self.content.is_some()
    }
}
