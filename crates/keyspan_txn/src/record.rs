//! Atomicity records: the durable source of truth for attempt outcomes.

use crate::error::{TxnError, TxnResult};
use keyspan_store::{CollectionAddress, DocumentId, StagedOp};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since the epoch; the wall-clock basis for record expiry.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// State of one attempt.
///
/// Transitions:
/// - `NotStarted` → `Staged` on the first staged mutation
/// - `Staged` → `Committing` at the commit point (the durable decision)
/// - `Committing` → `Committed` once every document is unstaged
/// - `NotStarted`/`Staged` → `Aborting` → `RolledBack` on the abort path
///
/// `Committed` and `RolledBack` are terminal. Any participant reading a
/// record can determine the outcome unambiguously: `Committing` means
/// committed-but-unstaging, `Aborting` means rolling back, everything
/// before the decision point rolls back on expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptState {
    /// No mutation staged yet.
    NotStarted,
    /// At least one mutation is staged.
    Staged,
    /// Commit decision is durable; unstaging in progress.
    Committing,
    /// All staged changes are visible. Terminal.
    Committed,
    /// Abort decision is durable; reverting in progress.
    Aborting,
    /// All staged changes are reverted. Terminal.
    RolledBack,
}

impl AttemptState {
    /// Returns true for states no participant may move out of.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptState::Committed | AttemptState::RolledBack)
    }
}

/// A staged document as listed in an atomicity record.
///
/// Enough for any participant to finish or revert the staged change
/// without the attempt that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedDocRef {
    /// Identity of the staged document.
    pub id: DocumentId,
    /// Kind of staged change.
    pub op: StagedOp,
}

/// The store-resident record of one attempt's outcome.
///
/// Persisted as a JSON document in the metadata collection, keyed by
/// the attempt ID; every update is a CAS-guarded replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicityRecord {
    /// Parent transaction.
    pub txn_id: Uuid,
    /// Attempt this record governs.
    pub attempt_id: Uuid,
    /// Current attempt state.
    pub state: AttemptState,
    /// Documents with staged changes, in staging order.
    pub staged_docs: Vec<StagedDocRef>,
    /// When the attempt started (epoch milliseconds).
    pub started_at_ms: u64,
    /// When the attempt expires (epoch milliseconds).
    pub expires_at_ms: u64,
}

impl AtomicityRecord {
    /// Creates a record for a newly staging attempt.
    #[must_use]
    pub fn new(txn_id: Uuid, attempt_id: Uuid, expires_at_ms: u64) -> Self {
        Self {
            txn_id,
            attempt_id,
            state: AttemptState::Staged,
            staged_docs: Vec::new(),
            started_at_ms: now_ms(),
            expires_at_ms,
        }
    }

    /// Identity of the record document for `attempt_id`.
    #[must_use]
    pub fn id_for(collection: &CollectionAddress, attempt_id: Uuid) -> DocumentId {
        collection.doc(format!("atr::{}", attempt_id.simple()))
    }

    /// Returns true once the expiry deadline has passed.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Adds a staged document, keeping the list free of duplicates.
    pub fn upsert_doc(&mut self, doc: StagedDocRef) {
        if let Some(existing) = self.staged_docs.iter_mut().find(|d| d.id == doc.id) {
            existing.op = doc.op;
        } else {
            self.staged_docs.push(doc);
        }
    }

    /// Drops a staged document from the list.
    pub fn remove_doc(&mut self, id: &DocumentId) {
        self.staged_docs.retain(|d| &d.id != id);
    }

    /// Serializes the record for storage.
    pub fn encode(&self) -> TxnResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| TxnError::fault(format!("record encode: {e}")))
    }

    /// Deserializes a record from stored content.
    pub fn decode(content: &[u8]) -> TxnResult<Self> {
        serde_json::from_slice(content).map_err(|e| TxnError::fault(format!("record decode: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record() -> AtomicityRecord {
        AtomicityRecord::new(Uuid::new_v4(), Uuid::new_v4(), now_ms() + 15_000)
    }

    fn doc_ref(key: &str, op: StagedOp) -> StagedDocRef {
        StagedDocRef {
            id: DocumentId::new("default", "_default", "things", key),
            op,
        }
    }

    #[test]
    fn terminal_states() {
        assert!(AttemptState::Committed.is_terminal());
        assert!(AttemptState::RolledBack.is_terminal());
        assert!(!AttemptState::Committing.is_terminal());
        assert!(!AttemptState::Aborting.is_terminal());
        assert!(!AttemptState::Staged.is_terminal());
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut record = make_record();
        record.upsert_doc(doc_ref("a", StagedOp::Insert));
        record.state = AttemptState::Committing;

        let decoded = AtomicityRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn upsert_doc_dedupes_by_identity() {
        let mut record = make_record();
        record.upsert_doc(doc_ref("a", StagedOp::Insert));
        record.upsert_doc(doc_ref("a", StagedOp::Remove));
        record.upsert_doc(doc_ref("b", StagedOp::Replace));

        assert_eq!(record.staged_docs.len(), 2);
        assert_eq!(record.staged_docs[0].op, StagedOp::Remove);
    }

    #[test]
    fn expiry_check() {
        let record = make_record();
        assert!(!record.is_expired(now_ms()));
        assert!(record.is_expired(record.expires_at_ms));
        assert!(record.is_expired(record.expires_at_ms + 1));
    }

    #[test]
    fn record_id_keyed_by_attempt() {
        let collection = CollectionAddress::new("txn", "meta", "records");
        let attempt = Uuid::new_v4();
        let id = AtomicityRecord::id_for(&collection, attempt);
        assert_eq!(id.collection_address(), collection);
        assert!(id.key.starts_with("atr::"));
        assert_eq!(AtomicityRecord::id_for(&collection, attempt), id);
    }
}
