//! # Keyspan Transactions
//!
//! Client-side multi-document transactions over a key-value document
//! store that only offers single-document atomicity.
//!
//! This crate provides:
//! - Attempt contexts staging `get`/`insert`/`replace`/`remove`/`query`
//!   operations with optimistic, version-token conflict detection
//! - A retry loop with exponential backoff bounded by a per-transaction
//!   expiry deadline
//! - A commit/rollback protocol built around a durable atomicity record,
//!   split into a single decision write plus idempotent per-document
//!   unstaging so any participant can resume after a crash
//! - A background cleanup subsystem that finishes or reverts abandoned
//!   attempts
//!
//! ## Key invariants
//!
//! - Only one document is ever mutated at a time; mutual exclusion per
//!   document is purely optimistic compare-and-swap
//! - The atomicity record is the single source of truth for an
//!   attempt's outcome; no participant can read an ambiguous state
//! - Every unstage/rollback step is idempotent and safe to replay by
//!   the attempt or by cleanup, concurrently
//! - Isolation is read-committed with write-write conflict detection,
//!   not serializable
//!
//! ## Example
//!
//! ```
//! use keyspan_store::{CollectionAddress, MemoryStore};
//! use keyspan_txn::{Transactions, TransactionsConfig};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let coll = CollectionAddress::new("default", "_default", "accounts");
//! store.put_committed(&coll.doc("alice"), b"100".to_vec());
//!
//! let txns = Transactions::new(store, TransactionsConfig::default());
//! let result = txns.run(|ctx| {
//!     let alice = ctx.get(&coll, "alice")?;
//!     ctx.replace(&alice, b"90".to_vec())?;
//!     ctx.insert(&coll, "bob", b"10".to_vec())?;
//!     Ok(())
//! });
//! assert!(result.is_success());
//! txns.close();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attempt;
mod cleanup;
mod config;
mod context;
mod error;
mod executor;
mod get_result;
mod hooks;
mod protocol;
mod query;
mod record;
mod result;
mod transactions;
mod types;

pub use attempt::AttemptContext;
pub use cleanup::{CleanupEngine, CleanupState, CleanupStats};
pub use config::{Backoff, SingleQueryOptions, TransactionOptions, TransactionsConfig};
pub use error::{ErrorContext, OpErrorKind, TxnError, TxnFailure, TxnResult};
pub use executor::{completion, CompletionSender, CompletionWaiter, Executor};
pub use get_result::TransactionGetResult;
pub use hooks::{AttemptHooks, CleanupHooks, DocHook, Hook};
pub use query::{
    MockQueryService, QueryMeta, QueryOptions, QueryResult, QueryService, QueryTxnContext,
    UnsupportedQueryService,
};
pub use record::{AtomicityRecord, AttemptState, StagedDocRef};
pub use result::TransactionResult;
pub use transactions::Transactions;
pub use types::{AttemptId, TransactionId};
