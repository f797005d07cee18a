//! Idempotent per-document unstage and rollback steps.
//!
//! Both the live attempt and the cleanup subsystem drive documents
//! through these functions, possibly concurrently. Each step re-reads
//! the document, no-ops if the staged change is already resolved or
//! owned by someone else, and applies its write under the current
//! version token. A lost CAS race means another actor moved the
//! document; the step re-reads and re-decides.

use keyspan_store::{
    DocumentEnvelope, DocumentId, DocumentStore, Durability, StagedOp, StoreError, StoreResult,
};
use tracing::warn;
use uuid::Uuid;

/// Bound on CAS-race re-reads before giving up on a document.
const MAX_RESOLVE_ATTEMPTS: usize = 8;

/// Makes an attempt's staged change the visible, final document state.
///
/// No-op if the document is gone, clean, or staged by a different
/// attempt (already resolved, or never staged).
pub(crate) fn unstage_doc(
    store: &dyn DocumentStore,
    id: &DocumentId,
    attempt_id: Uuid,
    durability: Durability,
) -> StoreResult<()> {
    for _ in 0..MAX_RESOLVE_ATTEMPTS {
        let (envelope, cas) = match store.get(id) {
            Ok(found) => found,
            Err(StoreError::DocumentNotFound) => return Ok(()),
            Err(e) => return Err(e),
        };
        let Some(info) = envelope.staging.info() else {
            return Ok(());
        };
        if info.attempt_id != attempt_id {
            return Ok(());
        }
        let result = match info.op {
            StagedOp::Insert | StagedOp::Replace => {
                let content = info.staged_content.clone().unwrap_or_default();
                store
                    .replace(id, cas, DocumentEnvelope::committed(content), durability)
                    .map(|_| ())
            }
            StagedOp::Remove => store.remove(id, cas, durability),
        };
        match result {
            Ok(()) => return Ok(()),
            Err(StoreError::CasMismatch { .. }) => continue,
            Err(StoreError::DocumentNotFound) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
    warn!(doc = %id, "document kept moving during unstage");
    Err(StoreError::transient("document kept moving during unstage"))
}

/// Reverts an attempt's staged change, restoring the pre-image.
///
/// A staged insert is physically removed; a staged replace or remove
/// has its staging cleared, leaving the committed content in place.
/// No-op under the same conditions as [`unstage_doc`].
pub(crate) fn rollback_doc(
    store: &dyn DocumentStore,
    id: &DocumentId,
    attempt_id: Uuid,
    durability: Durability,
) -> StoreResult<()> {
    for _ in 0..MAX_RESOLVE_ATTEMPTS {
        let (envelope, cas) = match store.get(id) {
            Ok(found) => found,
            Err(StoreError::DocumentNotFound) => return Ok(()),
            Err(e) => return Err(e),
        };
        let Some(info) = envelope.staging.info() else {
            return Ok(());
        };
        if info.attempt_id != attempt_id {
            return Ok(());
        }
        let result = match &envelope.content {
            // No committed pre-image: the document only exists as a
            // staged insert, so reverting removes it.
            None => store.remove(id, cas, durability),
            Some(pre_image) => store
                .replace(
                    id,
                    cas,
                    DocumentEnvelope::committed(pre_image.clone()),
                    durability,
                )
                .map(|_| ()),
        };
        match result {
            Ok(()) => return Ok(()),
            Err(StoreError::CasMismatch { .. }) => continue,
            Err(StoreError::DocumentNotFound) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
    warn!(doc = %id, "document kept moving during rollback");
    Err(StoreError::transient("document kept moving during rollback"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyspan_store::{MemoryStore, Staging, StagingInfo};

    fn make_id(key: &str) -> DocumentId {
        DocumentId::new("default", "_default", "things", key)
    }

    fn record_id() -> DocumentId {
        DocumentId::new("txn", "meta", "records", "atr::test")
    }

    fn stage(
        store: &MemoryStore,
        id: &DocumentId,
        attempt_id: Uuid,
        op: StagedOp,
        staged: Option<Vec<u8>>,
    ) {
        let info = StagingInfo {
            txn_id: Uuid::new_v4(),
            attempt_id,
            op,
            staged_content: staged,
            record_id: record_id(),
        };
        match store.get(id) {
            Ok((envelope, cas)) => {
                store
                    .replace(id, cas, envelope.with_staging(info), Durability::None)
                    .unwrap();
            }
            Err(StoreError::DocumentNotFound) => {
                store
                    .insert(id, DocumentEnvelope::staged_insert(info), Durability::None)
                    .unwrap();
            }
            Err(e) => panic!("unexpected: {e}"),
        }
    }

    #[test]
    fn unstage_installs_staged_content() {
        let store = MemoryStore::new();
        let id = make_id("a");
        let attempt = Uuid::new_v4();
        store.put_committed(&id, vec![1]);
        stage(&store, &id, attempt, StagedOp::Replace, Some(vec![2]));

        unstage_doc(&store, &id, attempt, Durability::None).unwrap();

        let (envelope, _) = store.get(&id).unwrap();
        assert!(envelope.staging.is_clean());
        assert_eq!(envelope.content, Some(vec![2]));
    }

    #[test]
    fn unstage_remove_deletes_document() {
        let store = MemoryStore::new();
        let id = make_id("a");
        let attempt = Uuid::new_v4();
        store.put_committed(&id, vec![1]);
        stage(&store, &id, attempt, StagedOp::Remove, None);

        unstage_doc(&store, &id, attempt, Durability::None).unwrap();
        assert!(!store.contains(&id));
    }

    #[test]
    fn unstage_is_idempotent() {
        let store = MemoryStore::new();
        let id = make_id("a");
        let attempt = Uuid::new_v4();
        store.put_committed(&id, vec![1]);
        stage(&store, &id, attempt, StagedOp::Replace, Some(vec![2]));

        unstage_doc(&store, &id, attempt, Durability::None).unwrap();
        // replaying must not double-apply or error
        unstage_doc(&store, &id, attempt, Durability::None).unwrap();

        let (envelope, _) = store.get(&id).unwrap();
        assert_eq!(envelope.content, Some(vec![2]));
    }

    #[test]
    fn unstage_ignores_foreign_staging() {
        let store = MemoryStore::new();
        let id = make_id("a");
        let other = Uuid::new_v4();
        store.put_committed(&id, vec![1]);
        stage(&store, &id, other, StagedOp::Replace, Some(vec![2]));

        unstage_doc(&store, &id, Uuid::new_v4(), Durability::None).unwrap();

        // untouched: still staged by the other attempt
        let (envelope, _) = store.get(&id).unwrap();
        assert!(envelope.staging.is_owned_by(other));
        assert_eq!(envelope.content, Some(vec![1]));
    }

    #[test]
    fn rollback_restores_pre_image() {
        let store = MemoryStore::new();
        let id = make_id("a");
        let attempt = Uuid::new_v4();
        store.put_committed(&id, vec![1]);
        stage(&store, &id, attempt, StagedOp::Replace, Some(vec![2]));

        rollback_doc(&store, &id, attempt, Durability::None).unwrap();

        let (envelope, _) = store.get(&id).unwrap();
        assert!(envelope.staging.is_clean());
        assert_eq!(envelope.content, Some(vec![1]));
    }

    #[test]
    fn rollback_removes_staged_insert() {
        let store = MemoryStore::new();
        let id = make_id("a");
        let attempt = Uuid::new_v4();
        stage(&store, &id, attempt, StagedOp::Insert, Some(vec![2]));

        rollback_doc(&store, &id, attempt, Durability::None).unwrap();
        assert!(!store.contains(&id));
    }

    #[test]
    fn rollback_of_missing_document_is_a_no_op() {
        let store = MemoryStore::new();
        rollback_doc(&store, &make_id("gone"), Uuid::new_v4(), Durability::None).unwrap();
    }

    #[test]
    fn unstage_retries_through_cas_race() {
        let store = MemoryStore::new();
        let id = make_id("a");
        let attempt = Uuid::new_v4();
        store.put_committed(&id, vec![1]);
        stage(&store, &id, attempt, StagedOp::Replace, Some(vec![2]));

        // a racing actor bumps the CAS between our read and write once
        store.fail_next(
            keyspan_store::OpKind::Replace,
            StoreError::CasMismatch {
                expected: keyspan_store::Cas::new(1),
                actual: keyspan_store::Cas::new(2),
            },
        );

        unstage_doc(&store, &id, attempt, Durability::None).unwrap();
        let (envelope, _) = store.get(&id).unwrap();
        assert_eq!(envelope.content, Some(vec![2]));
    }
}
