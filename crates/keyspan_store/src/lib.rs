//! # Keyspan Store
//!
//! Document store interface for the keyspan transactions engine.
//!
//! This crate provides:
//! - Document identity and version tokens (CAS)
//! - The document envelope with colocated staging metadata
//! - The [`DocumentStore`] trait: atomic single-document CRUD guarded
//!   by version tokens, plus a metadata-collection scan
//! - [`MemoryStore`], an in-memory store with fault injection for tests
//!
//! Stores are **single-document atomic**. Every mutation replaces one
//! document under a version-token guard; there is no cross-document
//! operation anywhere in this interface. Multi-document semantics are
//! built on top by `keyspan_txn`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod error;
mod memory;
mod store;
mod types;

pub use envelope::{DocumentEnvelope, Staging, StagingInfo};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, OpKind};
pub use store::DocumentStore;
pub use types::{Cas, CollectionAddress, DocumentId, Durability, StagedOp};
