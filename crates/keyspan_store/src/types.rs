//! Core type definitions for the document store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Addresses a collection within a bucket and scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionAddress {
    /// Bucket name.
    pub bucket: String,
    /// Scope name.
    pub scope: String,
    /// Collection name.
    pub collection: String,
}

impl CollectionAddress {
    /// Creates a new collection address.
    pub fn new(
        bucket: impl Into<String>,
        scope: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            scope: scope.into(),
            collection: collection.into(),
        }
    }

    /// Returns the identity of a document with `key` in this collection.
    pub fn doc(&self, key: impl Into<String>) -> DocumentId {
        DocumentId {
            bucket: self.bucket.clone(),
            scope: self.scope.clone(),
            collection: self.collection.clone(),
            key: key.into(),
        }
    }
}

impl fmt::Display for CollectionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.bucket, self.scope, self.collection)
    }
}

/// Uniquely addresses one document in the store.
///
/// Identity is immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId {
    /// Bucket name.
    pub bucket: String,
    /// Scope name.
    pub scope: String,
    /// Collection name.
    pub collection: String,
    /// Document key within the collection.
    pub key: String,
}

impl DocumentId {
    /// Creates a new document identity.
    pub fn new(
        bucket: impl Into<String>,
        scope: impl Into<String>,
        collection: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            scope: scope.into(),
            collection: collection.into(),
            key: key.into(),
        }
    }

    /// Returns the address of the collection this document lives in.
    #[must_use]
    pub fn collection_address(&self) -> CollectionAddress {
        CollectionAddress {
            bucket: self.bucket.clone(),
            scope: self.scope.clone(),
            collection: self.collection.clone(),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}/{}",
            self.bucket, self.scope, self.collection, self.key
        )
    }
}

/// Opaque version token identifying a document revision.
///
/// A mutation guarded by a CAS succeeds only if the document's current
/// token equals the one supplied. Tokens are compared for equality and
/// never interpreted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Cas(pub u64);

impl Cas {
    /// The token of a document that does not exist yet.
    pub const ZERO: Cas = Cas(0);

    /// Creates a version token from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for the absent-document token.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cas:{}", self.0)
    }
}

/// Durability level requested for a mutation.
///
/// The store acknowledges a write only once the requested level is met.
/// A single-replica store treats all levels the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Acknowledge as soon as the active copy is updated.
    None,
    /// Acknowledge once a majority of replicas hold the write in memory.
    #[default]
    Majority,
    /// Majority in memory, persisted on the active node.
    MajorityAndPersist,
    /// Persisted on a majority of replicas.
    PersistToMajority,
}

/// Operation type recorded in staging metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StagedOp {
    /// Document is being created by the owning attempt.
    Insert,
    /// Document content is being replaced by the owning attempt.
    Replace,
    /// Document is being removed by the owning attempt.
    Remove,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_display() {
        let id = DocumentId::new("travel", "_default", "hotels", "hotel_17");
        assert_eq!(format!("{id}"), "travel._default.hotels/hotel_17");
    }

    #[test]
    fn collection_address_builds_ids() {
        let coll = CollectionAddress::new("travel", "_default", "hotels");
        let id = coll.doc("hotel_17");
        assert_eq!(id.collection_address(), coll);
        assert_eq!(id.key, "hotel_17");
    }

    #[test]
    fn cas_zero_is_absent() {
        assert!(Cas::ZERO.is_zero());
        assert!(!Cas::new(7).is_zero());
        assert!(Cas::new(1) < Cas::new(2));
    }

    #[test]
    fn durability_defaults_to_majority() {
        assert_eq!(Durability::default(), Durability::Majority);
    }

    proptest::proptest! {
        #[test]
        fn cas_ordering_matches_raw_values(a in proptest::prelude::any::<u64>(),
                                           b in proptest::prelude::any::<u64>()) {
            proptest::prop_assert_eq!(Cas::new(a) < Cas::new(b), a < b);
            proptest::prop_assert_eq!(Cas::new(a) == Cas::new(b), a == b);
        }
    }
}
