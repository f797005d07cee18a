//! Document store trait definition.

use crate::envelope::DocumentEnvelope;
use crate::error::StoreResult;
use crate::types::{Cas, CollectionAddress, DocumentId, Durability};

/// A key-value document store offering single-document atomicity.
///
/// Every mutation is an atomic read-modify-write of one document,
/// guarded by a version token. Implementations do not interpret
/// envelope contents; the transactions engine owns all staging
/// semantics.
///
/// # Invariants
///
/// - `insert` fails with `DocumentExists` rather than overwriting
/// - `replace`/`remove` fail with `CasMismatch` when the live token
///   differs from the one supplied, and never partially apply
/// - A successful mutation returns the document's new token
/// - Implementations must be `Send + Sync`; the engine and the cleanup
///   subsystem call them from different threads concurrently
pub trait DocumentStore: Send + Sync {
    /// Reads a document's envelope and current version token.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the document is absent, or a
    /// transient/backend error.
    fn get(&self, id: &DocumentId) -> StoreResult<(DocumentEnvelope, Cas)>;

    /// Atomically creates a document.
    ///
    /// Returns the new document's version token.
    ///
    /// # Errors
    ///
    /// Returns `DocumentExists` if any document (committed or staged)
    /// already holds this identity.
    fn insert(
        &self,
        id: &DocumentId,
        envelope: DocumentEnvelope,
        durability: Durability,
    ) -> StoreResult<Cas>;

    /// Replaces a document's envelope, guarded by its version token.
    ///
    /// Returns the new version token.
    ///
    /// # Errors
    ///
    /// Returns `CasMismatch` if the live token differs from `cas`, or
    /// `DocumentNotFound` if the document is absent.
    fn replace(
        &self,
        id: &DocumentId,
        cas: Cas,
        envelope: DocumentEnvelope,
        durability: Durability,
    ) -> StoreResult<Cas>;

    /// Removes a document, guarded by its version token.
    ///
    /// # Errors
    ///
    /// Returns `CasMismatch` if the live token differs from `cas`, or
    /// `DocumentNotFound` if the document is absent.
    fn remove(&self, id: &DocumentId, cas: Cas, durability: Durability) -> StoreResult<()>;

    /// Lists the identities of all documents in a collection.
    ///
    /// Stand-in for a secondary-index scan; the engine uses it only to
    /// enumerate atomicity records in the metadata collection.
    ///
    /// # Errors
    ///
    /// Returns a transient/backend error if the scan cannot complete.
    fn scan_collection(&self, collection: &CollectionAddress) -> StoreResult<Vec<DocumentId>>;
}
