//! In-memory document store.

use crate::envelope::DocumentEnvelope;
use crate::error::{StoreError, StoreResult};
use crate::store::DocumentStore;
use crate::types::{Cas, CollectionAddress, DocumentId, Durability};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of store operation, used for fault injection and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Document read.
    Get,
    /// Atomic create.
    Insert,
    /// CAS-guarded replace.
    Replace,
    /// CAS-guarded remove.
    Remove,
    /// Collection scan.
    Scan,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    envelope: DocumentEnvelope,
    cas: Cas,
}

/// An in-memory [`DocumentStore`] for testing.
///
/// Supports scripted fault injection: errors queued with
/// [`MemoryStore::fail_next`] are returned by the next operations of
/// that kind, in queue order, before the real operation runs.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<DocumentId, StoredDocument>>,
    next_cas: AtomicU64,
    faults: Mutex<HashMap<OpKind, VecDeque<StoreError>>>,
    counters: Mutex<HashMap<OpKind, u64>>,
    last_durability: Mutex<Option<Durability>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error to be returned by the next operation of `kind`.
    pub fn fail_next(&self, kind: OpKind, error: StoreError) {
        self.faults.lock().entry(kind).or_default().push_back(error);
    }

    /// Returns how many operations of `kind` have been attempted.
    #[must_use]
    pub fn op_count(&self, kind: OpKind) -> u64 {
        self.counters.lock().get(&kind).copied().unwrap_or(0)
    }

    /// Returns the durability level of the most recent mutation.
    #[must_use]
    pub fn last_durability(&self) -> Option<Durability> {
        *self.last_durability.lock()
    }

    /// Returns the number of documents currently stored.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.docs.read().len()
    }

    /// Seeds a committed document outside any transaction.
    ///
    /// Overwrites whatever is there. Test setup helper.
    pub fn put_committed(&self, id: &DocumentId, content: Vec<u8>) -> Cas {
        let cas = self.bump_cas();
        self.docs.write().insert(
            id.clone(),
            StoredDocument {
                envelope: DocumentEnvelope::committed(content),
                cas,
            },
        );
        cas
    }

    /// Returns a document's committed content, ignoring staging.
    #[must_use]
    pub fn committed_content(&self, id: &DocumentId) -> Option<Vec<u8>> {
        self.docs
            .read()
            .get(id)
            .and_then(|doc| doc.envelope.content.clone())
    }

    /// Returns true if a document (committed or staged) exists.
    #[must_use]
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.docs.read().contains_key(id)
    }

    fn bump_cas(&self) -> Cas {
        Cas::new(self.next_cas.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn enter(&self, kind: OpKind) -> StoreResult<()> {
        *self.counters.lock().entry(kind).or_insert(0) += 1;
        if let Some(err) = self
            .faults
            .lock()
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        Ok(())
    }

    fn record_durability(&self, durability: Durability) {
        *self.last_durability.lock() = Some(durability);
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, id: &DocumentId) -> StoreResult<(DocumentEnvelope, Cas)> {
        self.enter(OpKind::Get)?;
        self.docs
            .read()
            .get(id)
            .map(|doc| (doc.envelope.clone(), doc.cas))
            .ok_or(StoreError::DocumentNotFound)
    }

    fn insert(
        &self,
        id: &DocumentId,
        envelope: DocumentEnvelope,
        durability: Durability,
    ) -> StoreResult<Cas> {
        self.enter(OpKind::Insert)?;
        self.record_durability(durability);
        let mut docs = self.docs.write();
        if docs.contains_key(id) {
            return Err(StoreError::DocumentExists);
        }
        let cas = self.bump_cas();
        docs.insert(id.clone(), StoredDocument { envelope, cas });
        Ok(cas)
    }

    fn replace(
        &self,
        id: &DocumentId,
        cas: Cas,
        envelope: DocumentEnvelope,
        durability: Durability,
    ) -> StoreResult<Cas> {
        self.enter(OpKind::Replace)?;
        self.record_durability(durability);
        let mut docs = self.docs.write();
        let doc = docs.get_mut(id).ok_or(StoreError::DocumentNotFound)?;
        if doc.cas != cas {
            return Err(StoreError::CasMismatch {
                expected: cas,
                actual: doc.cas,
            });
        }
        let new_cas = self.bump_cas();
        doc.envelope = envelope;
        doc.cas = new_cas;
        Ok(new_cas)
    }

    fn remove(&self, id: &DocumentId, cas: Cas, durability: Durability) -> StoreResult<()> {
        self.enter(OpKind::Remove)?;
        self.record_durability(durability);
        let mut docs = self.docs.write();
        let doc = docs.get(id).ok_or(StoreError::DocumentNotFound)?;
        if doc.cas != cas {
            return Err(StoreError::CasMismatch {
                expected: cas,
                actual: doc.cas,
            });
        }
        docs.remove(id);
        Ok(())
    }

    fn scan_collection(&self, collection: &CollectionAddress) -> StoreResult<Vec<DocumentId>> {
        self.enter(OpKind::Scan)?;
        let mut ids: Vec<DocumentId> = self
            .docs
            .read()
            .keys()
            .filter(|id| {
                id.bucket == collection.bucket
                    && id.scope == collection.scope
                    && id.collection == collection.collection
            })
            .cloned()
            .collect();
        ids.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_id(key: &str) -> DocumentId {
        DocumentId::new("default", "_default", "things", key)
    }

    #[test]
    fn insert_then_get() {
        let store = MemoryStore::new();
        let id = make_id("a");
        let cas = store
            .insert(&id, DocumentEnvelope::committed(vec![1]), Durability::None)
            .unwrap();
        let (env, got_cas) = store.get(&id).unwrap();
        assert_eq!(env.content, Some(vec![1]));
        assert_eq!(got_cas, cas);
    }

    #[test]
    fn insert_existing_fails() {
        let store = MemoryStore::new();
        let id = make_id("a");
        store.put_committed(&id, vec![1]);
        let result = store.insert(&id, DocumentEnvelope::committed(vec![2]), Durability::None);
        assert_eq!(result, Err(StoreError::DocumentExists));
        assert_eq!(store.committed_content(&id), Some(vec![1]));
    }

    #[test]
    fn replace_with_stale_cas_fails() {
        let store = MemoryStore::new();
        let id = make_id("a");
        let cas = store.put_committed(&id, vec![1]);
        // another writer moves the document on
        let live = store
            .replace(&id, cas, DocumentEnvelope::committed(vec![2]), Durability::None)
            .unwrap();
        let result = store.replace(&id, cas, DocumentEnvelope::committed(vec![3]), Durability::None);
        assert_eq!(
            result,
            Err(StoreError::CasMismatch {
                expected: cas,
                actual: live,
            })
        );
        assert_eq!(store.committed_content(&id), Some(vec![2]));
    }

    #[test]
    fn remove_with_matching_cas() {
        let store = MemoryStore::new();
        let id = make_id("a");
        let cas = store.put_committed(&id, vec![1]);
        store.remove(&id, cas, Durability::None).unwrap();
        assert!(!store.contains(&id));
        assert_eq!(store.get(&id), Err(StoreError::DocumentNotFound));
    }

    #[test]
    fn remove_missing_fails() {
        let store = MemoryStore::new();
        let result = store.remove(&make_id("nope"), Cas::new(1), Durability::None);
        assert_eq!(result, Err(StoreError::DocumentNotFound));
    }

    #[test]
    fn scan_filters_by_collection() {
        let store = MemoryStore::new();
        store.put_committed(&make_id("b"), vec![1]);
        store.put_committed(&make_id("a"), vec![2]);
        store.put_committed(
            &DocumentId::new("default", "_default", "other", "c"),
            vec![3],
        );

        let ids = store
            .scan_collection(&CollectionAddress::new("default", "_default", "things"))
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].key, "a");
        assert_eq!(ids[1].key, "b");
    }

    #[test]
    fn fault_injection_fires_once_in_order() {
        let store = MemoryStore::new();
        let id = make_id("a");
        let cas = store.put_committed(&id, vec![1]);

        store.fail_next(OpKind::Replace, StoreError::transient("blip"));
        let result = store.replace(&id, cas, DocumentEnvelope::committed(vec![2]), Durability::None);
        assert_eq!(result, Err(StoreError::transient("blip")));

        // next call goes through
        store
            .replace(&id, cas, DocumentEnvelope::committed(vec![2]), Durability::None)
            .unwrap();
        assert_eq!(store.op_count(OpKind::Replace), 2);
    }

    #[test]
    fn cas_values_never_repeat() {
        let store = MemoryStore::new();
        let a = store.put_committed(&make_id("a"), vec![1]);
        let b = store.put_committed(&make_id("b"), vec![2]);
        assert!(b > a);
    }
}
