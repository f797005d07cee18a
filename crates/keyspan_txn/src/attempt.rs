//! Attempt context: one execution of user transaction logic.
//!
//! Every logical operation stages a change against exactly one
//! document, guarded by the version token captured when the document
//! was read. Nothing becomes visible to other readers until the commit
//! protocol unstages it; until then the committed pre-image stays in
//! place under the staging metadata.

use crate::config::TransactionsConfig;
use crate::error::{TxnError, TxnResult};
use crate::executor::{completion, Executor};
use crate::get_result::TransactionGetResult;
use crate::hooks::AttemptHooks;
use crate::protocol;
use crate::query::{QueryResult, QueryService, QueryTxnContext};
use crate::record::{now_ms, AtomicityRecord, AttemptState, StagedDocRef};
use crate::types::{AttemptId, TransactionId};
use keyspan_store::{
    Cas, CollectionAddress, DocumentEnvelope, DocumentId, DocumentStore, StagedOp, Staging,
    StagingInfo, StoreError, StoreResult,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// A mutation staged by this attempt.
#[derive(Debug, Clone)]
pub(crate) struct StagedMutation {
    pub id: DocumentId,
    pub op: StagedOp,
    pub staged_content: Option<Vec<u8>>,
    pub staged_cas: Cas,
    /// Committed content at staging time, for rollback verification.
    pub pre_image: Option<Vec<u8>>,
}

/// Executes user transaction logic once, staging document mutations.
pub struct AttemptContext {
    txn_id: TransactionId,
    id: AttemptId,
    store: Arc<dyn DocumentStore>,
    query_service: Arc<dyn QueryService>,
    executor: Arc<Executor>,
    config: TransactionsConfig,
    record_id: DocumentId,
    record: Option<AtomicityRecord>,
    record_cas: Cas,
    state: AttemptState,
    mutations: Vec<StagedMutation>,
    deadline: Instant,
    expires_at_ms: u64,
    /// True when this attempt itself runs on a pool worker: all work
    /// stays on the calling thread so no worker ever waits on another
    /// queued task.
    inline_work: bool,
}

impl AttemptContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        txn_id: TransactionId,
        store: Arc<dyn DocumentStore>,
        query_service: Arc<dyn QueryService>,
        executor: Arc<Executor>,
        config: TransactionsConfig,
        deadline: Instant,
        expires_at_ms: u64,
        inline_work: bool,
    ) -> Self {
        let id = AttemptId::generate();
        let record_id = AtomicityRecord::id_for(&config.metadata_collection, id.as_uuid());
        Self {
            txn_id,
            id,
            store,
            query_service,
            executor,
            config,
            record_id,
            record: None,
            record_cas: Cas::ZERO,
            state: AttemptState::NotStarted,
            mutations: Vec::new(),
            deadline,
            expires_at_ms,
            inline_work,
        }
    }

    /// The attempt's identifier.
    #[must_use]
    pub fn attempt_id(&self) -> AttemptId {
        self.id
    }

    /// The owning transaction's identifier.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.txn_id
    }

    /// Current position in the attempt state machine.
    #[must_use]
    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Returns true once this attempt has staged at least one mutation.
    #[must_use]
    pub fn has_staged_mutations(&self) -> bool {
        !self.mutations.is_empty()
    }

    // ------------------------------------------------------------------
    // Logical operations
    // ------------------------------------------------------------------

    /// Reads a document.
    ///
    /// Returns this attempt's own staged view when it has one
    /// (read-your-own-writes); otherwise the committed view. Fails with
    /// `DocumentAlreadyStaged` when a different, live attempt owns the
    /// document.
    ///
    /// # Errors
    ///
    /// `DocumentNotFound` when absent (or staged-removed by this
    /// attempt), `DocumentAlreadyStaged` on a live conflict, or a
    /// store-level failure.
    pub fn get(
        &mut self,
        collection: &CollectionAddress,
        key: &str,
    ) -> TxnResult<TransactionGetResult> {
        self.ensure_active()?;
        self.check_expired()?;
        let id = collection.doc(key);
        let (envelope, cas) = self
            .store
            .get(&id)
            .map_err(|e| TxnError::from_store(&id, e))?;

        match &envelope.staging {
            Staging::Clean => {
                let content = envelope
                    .content
                    .clone()
                    .ok_or(TxnError::DocumentNotFound { id: id.clone() })?;
                Ok(TransactionGetResult::new(id, content, cas, self.id, None))
            }
            Staging::StagedBy(info) if info.attempt_id == self.id.as_uuid() => match info.op {
                StagedOp::Remove => Err(TxnError::DocumentNotFound { id }),
                op => {
                    let content = info
                        .staged_content
                        .clone()
                        .ok_or(TxnError::DocumentNotFound { id: id.clone() })?;
                    Ok(TransactionGetResult::new(
                        id,
                        content,
                        cas,
                        self.id,
                        Some(op),
                    ))
                }
            },
            Staging::StagedBy(info) => {
                if self.owner_is_live(&info.record_id)? {
                    return Err(TxnError::DocumentAlreadyStaged { id });
                }
                // The owner is finished or abandoned; serve the
                // committed pre-image and leave reconciliation to
                // cleanup.
                let content = envelope
                    .content
                    .clone()
                    .ok_or(TxnError::DocumentNotFound { id: id.clone() })?;
                Ok(TransactionGetResult::new(id, content, cas, self.id, None))
            }
        }
    }

    /// Stages creation of a document.
    ///
    /// # Errors
    ///
    /// `DocumentExists` if a committed document holds the identity,
    /// `DocumentAlreadyStaged` if a live foreign attempt has staged an
    /// insert there, or a store-level failure.
    pub fn insert(
        &mut self,
        collection: &CollectionAddress,
        key: &str,
        content: Vec<u8>,
    ) -> TxnResult<TransactionGetResult> {
        self.ensure_active()?;
        self.check_expired()?;
        let id = collection.doc(key);

        if let Some(index) = self.mutation_index(&id) {
            return match self.mutations[index].op {
                // Insert after our own staged remove revives the
                // document as a replace.
                StagedOp::Remove => self.restage(index, StagedOp::Replace, Some(content)),
                _ => Err(TxnError::DocumentExists { id }),
            };
        }

        self.ensure_record()?;
        self.update_record(|record| {
            record.upsert_doc(StagedDocRef {
                id: id.clone(),
                op: StagedOp::Insert,
            });
        })?;

        let envelope = DocumentEnvelope::staged_insert(self.staging_info(StagedOp::Insert, Some(content.clone())));
        match self
            .store
            .insert(&id, envelope, self.config.durability)
        {
            Ok(cas) => self.finish_staging(id, StagedOp::Insert, Some(content), cas, None),
            Err(StoreError::DocumentExists) => self.insert_contended(id, content),
            Err(e) => Err(TxnError::from_store(&id, e)),
        }
    }

    /// Resolves an insert that lost the atomic-create race.
    fn insert_contended(
        &mut self,
        id: DocumentId,
        content: Vec<u8>,
    ) -> TxnResult<TransactionGetResult> {
        let (envelope, cas) = self
            .store
            .get(&id)
            .map_err(|e| TxnError::from_store(&id, e))?;
        if envelope.has_committed_content() {
            return Err(TxnError::DocumentExists { id });
        }
        match &envelope.staging {
            // Contentless and clean cannot be staged by anyone; treat
            // as an existing (if odd) document.
            Staging::Clean => Err(TxnError::DocumentExists { id }),
            Staging::StagedBy(info) => {
                if self.owner_is_live(&info.record_id)? {
                    return Err(TxnError::DocumentAlreadyStaged { id });
                }
                // Abandoned staged insert: take the document over.
                let staged =
                    DocumentEnvelope::staged_insert(self.staging_info(StagedOp::Insert, Some(content.clone())));
                let new_cas = self
                    .store
                    .replace(&id, cas, staged, self.config.durability)
                    .map_err(|e| TxnError::from_store(&id, e))?;
                self.finish_staging(id, StagedOp::Insert, Some(content), new_cas, None)
            }
        }
    }

    /// Stages replacement of a document's content.
    ///
    /// `doc` must come from this attempt's `get` or a prior mutation.
    ///
    /// # Errors
    ///
    /// `WriteWriteConflict` if the document changed since it was read,
    /// or a store-level failure.
    pub fn replace(
        &mut self,
        doc: &TransactionGetResult,
        content: Vec<u8>,
    ) -> TxnResult<TransactionGetResult> {
        self.ensure_active()?;
        self.check_expired()?;
        self.check_provenance(doc)?;
        let id = doc.id().clone();

        if let Some(index) = self.mutation_index(&id) {
            return match self.mutations[index].op {
                StagedOp::Remove => Err(TxnError::illegal_state(
                    "replace after remove in the same attempt",
                )),
                op => self.restage(index, op, Some(content)),
            };
        }

        self.ensure_record()?;
        self.update_record(|record| {
            record.upsert_doc(StagedDocRef {
                id: id.clone(),
                op: StagedOp::Replace,
            });
        })?;

        let pre_image = doc.content().to_vec();
        let envelope = DocumentEnvelope {
            content: Some(pre_image.clone()),
            staging: Staging::StagedBy(self.staging_info(StagedOp::Replace, Some(content.clone()))),
        };
        let cas = self
            .store
            .replace(&id, doc.cas(), envelope, self.config.durability)
            .map_err(|e| TxnError::from_store(&id, e))?;
        self.finish_staging(id, StagedOp::Replace, Some(content), cas, Some(pre_image))
    }

    /// Stages removal of a document.
    ///
    /// Stages a tombstone intent rather than deleting, so rollback can
    /// restore the pre-image.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`AttemptContext::replace`].
    pub fn remove(&mut self, doc: &TransactionGetResult) -> TxnResult<()> {
        self.ensure_active()?;
        self.check_expired()?;
        self.check_provenance(doc)?;
        let id = doc.id().clone();

        if let Some(index) = self.mutation_index(&id) {
            match self.mutations[index].op {
                StagedOp::Remove => {
                    return Err(TxnError::illegal_state(
                        "remove after remove in the same attempt",
                    ))
                }
                // Removing our own staged insert undoes it entirely.
                StagedOp::Insert => {
                    let staged_cas = self.mutations[index].staged_cas;
                    self.store
                        .remove(&id, staged_cas, self.config.durability)
                        .map_err(|e| TxnError::from_store(&id, e))?;
                    self.mutations.remove(index);
                    self.update_record(|record| record.remove_doc(&id))?;
                    return Ok(());
                }
                StagedOp::Replace => {
                    self.restage(index, StagedOp::Remove, None)?;
                    return Ok(());
                }
            }
        }

        self.ensure_record()?;
        self.update_record(|record| {
            record.upsert_doc(StagedDocRef {
                id: id.clone(),
                op: StagedOp::Remove,
            });
        })?;

        let pre_image = doc.content().to_vec();
        let envelope = DocumentEnvelope {
            content: Some(pre_image.clone()),
            staging: Staging::StagedBy(self.staging_info(StagedOp::Remove, None)),
        };
        let cas = self
            .store
            .replace(&id, doc.cas(), envelope, self.config.durability)
            .map_err(|e| TxnError::from_store(&id, e))?;
        self.finish_staging(id, StagedOp::Remove, None, cas, Some(pre_image))?;
        Ok(())
    }

    /// Routes a statement through the query service.
    ///
    /// The statement runs on the worker pool with this attempt's
    /// context token attached; `callback` receives the outcome exactly
    /// once.
    ///
    /// # Errors
    ///
    /// Fails only if the work cannot be scheduled; execution failures
    /// are delivered to the callback.
    pub fn query(
        &mut self,
        statement: impl Into<String>,
        options: crate::query::QueryOptions,
        query_context: Option<String>,
        callback: impl FnOnce(TxnResult<QueryResult>) + Send + 'static,
    ) -> TxnResult<()> {
        self.ensure_active()?;
        self.check_expired()?;
        let statement = statement.into();
        let service = Arc::clone(&self.query_service);
        let ctx = QueryTxnContext {
            txn_id: self.txn_id,
            attempt_id: self.id,
            record_id: self.record_id.clone(),
            query_context,
        };
        let task = move || {
            let mut rows = Vec::new();
            let outcome = service.execute(&statement, &options, &ctx, &mut |row| rows.push(row));
            callback(outcome.map(|meta| QueryResult { rows, meta }));
        };
        if self.inline_work {
            task();
            return Ok(());
        }
        self.executor.spawn(task)
    }

    // ------------------------------------------------------------------
    // Commit / rollback
    // ------------------------------------------------------------------

    /// Drives the attempt through the commit protocol.
    ///
    /// Returns whether unstaging completed. After the commit-point
    /// record write succeeds the transaction is committed regardless of
    /// unstaging failures; an unfinished record is resumed by cleanup.
    ///
    /// # Errors
    ///
    /// Fails only before the commit point; the caller classifies the
    /// error into retry vs terminal.
    pub(crate) fn commit(&mut self) -> TxnResult<bool> {
        match self.state {
            // Read-only attempt: nothing staged, nothing to decide. An
            // attempt that wrote a record but staged nothing still
            // settles the record below.
            AttemptState::NotStarted if self.record.is_none() => {
                self.state = AttemptState::Committed;
                return Ok(true);
            }
            AttemptState::NotStarted | AttemptState::Staged => {}
            other => {
                return Err(TxnError::illegal_state(format!(
                    "commit from state {other:?}"
                )))
            }
        }
        self.check_expired()?;

        AttemptHooks::fire(&self.config.attempt_hooks.before_record_commit)
            .map_err(|e| TxnError::from_store(&self.record_id, e))?;

        // Commit point: once this write lands, the outcome is decided.
        self.update_record(|record| record.state = AttemptState::Committing)?;
        self.state = AttemptState::Committing;
        debug!(txn = %self.txn_id, attempt = %self.id, "commit point reached");

        let failures = self.resolve_staged_docs(DocResolution::Unstage);
        if failures > 0 {
            warn!(
                txn = %self.txn_id,
                attempt = %self.id,
                failures,
                "unstaging incomplete; cleanup will finish the attempt"
            );
            return Ok(false);
        }

        if let Err(e) = self.update_record(|record| record.state = AttemptState::Committed) {
            // Already committed and fully unstaged; cleanup will
            // reconcile the record.
            warn!(attempt = %self.id, error = %e, "failed to finalize record");
        } else {
            self.remove_record();
        }
        self.state = AttemptState::Committed;
        Ok(true)
    }

    /// Reverts every staged mutation and settles the record.
    ///
    /// # Errors
    ///
    /// Reports the first failure; whatever could not be reverted is
    /// left for cleanup behind an `Aborting` record.
    pub(crate) fn rollback(&mut self) -> TxnResult<()> {
        match self.state {
            AttemptState::NotStarted if self.record.is_none() => {
                self.state = AttemptState::RolledBack;
                return Ok(());
            }
            AttemptState::NotStarted | AttemptState::Staged => {}
            AttemptState::RolledBack => return Ok(()),
            other => {
                return Err(TxnError::illegal_state(format!(
                    "rollback from state {other:?}"
                )))
            }
        }

        self.update_record(|record| record.state = AttemptState::Aborting)?;
        self.state = AttemptState::Aborting;
        debug!(txn = %self.txn_id, attempt = %self.id, "rolling back staged mutations");

        let failures = self.resolve_staged_docs(DocResolution::Rollback);
        if failures > 0 {
            warn!(
                txn = %self.txn_id,
                attempt = %self.id,
                failures,
                "rollback incomplete; cleanup will revert the remainder"
            );
            return Err(TxnError::TransientStore {
                message: "rollback incomplete".into(),
            });
        }

        if let Err(e) = self.update_record(|record| record.state = AttemptState::RolledBack) {
            warn!(attempt = %self.id, error = %e, "failed to finalize record");
        } else {
            self.remove_record();
        }
        self.state = AttemptState::RolledBack;
        self.mutations.clear();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_active(&self) -> TxnResult<()> {
        match self.state {
            AttemptState::NotStarted | AttemptState::Staged => Ok(()),
            other => Err(TxnError::illegal_state(format!(
                "operation in state {other:?}"
            ))),
        }
    }

    fn check_expired(&self) -> TxnResult<()> {
        if Instant::now() >= self.deadline {
            return Err(TxnError::Expired);
        }
        Ok(())
    }

    fn check_provenance(&self, doc: &TransactionGetResult) -> TxnResult<()> {
        if doc.attempt_id() != self.id {
            return Err(TxnError::illegal_state(
                "get result belongs to a different attempt",
            ));
        }
        Ok(())
    }

    fn mutation_index(&self, id: &DocumentId) -> Option<usize> {
        self.mutations.iter().position(|m| &m.id == id)
    }

    fn staging_info(&self, op: StagedOp, staged_content: Option<Vec<u8>>) -> StagingInfo {
        StagingInfo {
            txn_id: self.txn_id.as_uuid(),
            attempt_id: self.id.as_uuid(),
            op,
            staged_content,
            record_id: self.record_id.clone(),
        }
    }

    /// Checks whether the attempt owning `record_id` is still in flight.
    fn owner_is_live(&self, record_id: &DocumentId) -> TxnResult<bool> {
        let (envelope, _) = match self.store.get(record_id) {
            Ok(found) => found,
            Err(StoreError::DocumentNotFound) => return Ok(false),
            Err(e) => return Err(TxnError::from_store(record_id, e)),
        };
        let Some(content) = envelope.content else {
            return Ok(false);
        };
        match AtomicityRecord::decode(&content) {
            Ok(record) => Ok(!record.state.is_terminal() && !record.is_expired(now_ms())),
            Err(e) => {
                warn!(record = %record_id, error = %e, "undecodable atomicity record");
                Ok(false)
            }
        }
    }

    /// Creates this attempt's atomicity record if it does not exist.
    fn ensure_record(&mut self) -> TxnResult<()> {
        if self.record.is_some() {
            return Ok(());
        }
        let record =
            AtomicityRecord::new(self.txn_id.as_uuid(), self.id.as_uuid(), self.expires_at_ms);
        let content = record.encode()?;
        let cas = self
            .store
            .insert(
                &self.record_id,
                DocumentEnvelope::committed(content),
                self.config.durability,
            )
            .map_err(|e| TxnError::from_store(&self.record_id, e))?;
        self.record = Some(record);
        self.record_cas = cas;
        Ok(())
    }

    /// Applies `change` to the record and persists it CAS-guarded.
    fn update_record(&mut self, change: impl FnOnce(&mut AtomicityRecord)) -> TxnResult<()> {
        let Some(record) = self.record.as_mut() else {
            return Ok(());
        };
        change(record);
        let content = record.encode()?;
        let cas = self
            .store
            .replace(
                &self.record_id,
                self.record_cas,
                DocumentEnvelope::committed(content),
                self.config.durability,
            )
            .map_err(|e| TxnError::from_store(&self.record_id, e))?;
        self.record_cas = cas;
        Ok(())
    }

    fn remove_record(&mut self) {
        if self.record.take().is_some() {
            if let Err(e) = self
                .store
                .remove(&self.record_id, self.record_cas, self.config.durability)
            {
                debug!(record = %self.record_id, error = %e, "leaving record for cleanup");
            }
        }
    }

    /// Records a freshly staged mutation and fires the staging hook.
    fn finish_staging(
        &mut self,
        id: DocumentId,
        op: StagedOp,
        staged_content: Option<Vec<u8>>,
        cas: Cas,
        pre_image: Option<Vec<u8>>,
    ) -> TxnResult<TransactionGetResult> {
        self.mutations.push(StagedMutation {
            id: id.clone(),
            op,
            staged_content: staged_content.clone(),
            staged_cas: cas,
            pre_image,
        });
        self.state = AttemptState::Staged;
        AttemptHooks::fire_doc(&self.config.attempt_hooks.after_staging, &id)
            .map_err(|e| TxnError::from_store(&id, e))?;
        Ok(TransactionGetResult::new(
            id,
            staged_content.unwrap_or_default(),
            cas,
            self.id,
            Some(op),
        ))
    }

    /// Replaces the staged content of an existing mutation in place.
    fn restage(
        &mut self,
        index: usize,
        op: StagedOp,
        staged_content: Option<Vec<u8>>,
    ) -> TxnResult<TransactionGetResult> {
        let (id, staged_cas, pre_image) = {
            let mutation = &self.mutations[index];
            (
                mutation.id.clone(),
                mutation.staged_cas,
                mutation.pre_image.clone(),
            )
        };
        if self.mutations[index].op != op {
            self.update_record(|record| {
                record.upsert_doc(StagedDocRef {
                    id: id.clone(),
                    op,
                });
            })?;
        }
        let envelope = DocumentEnvelope {
            content: pre_image.clone(),
            staging: Staging::StagedBy(self.staging_info(op, staged_content.clone())),
        };
        let cas = self
            .store
            .replace(&id, staged_cas, envelope, self.config.durability)
            .map_err(|e| TxnError::from_store(&id, e))?;

        let mutation = &mut self.mutations[index];
        mutation.op = op;
        mutation.staged_content = staged_content.clone();
        mutation.staged_cas = cas;
        AttemptHooks::fire_doc(&self.config.attempt_hooks.after_staging, &id)
            .map_err(|e| TxnError::from_store(&id, e))?;
        Ok(TransactionGetResult::new(
            id,
            staged_content.unwrap_or_default(),
            cas,
            self.id,
            Some(op),
        ))
    }

    /// Resolves every staged document concurrently on the worker pool.
    ///
    /// Returns the number of documents that could not be resolved.
    fn resolve_staged_docs(&self, resolution: DocResolution) -> usize {
        let hook = match resolution {
            DocResolution::Unstage => &self.config.attempt_hooks.before_doc_unstaged,
            DocResolution::Rollback => &self.config.attempt_hooks.before_doc_rolled_back,
        };
        let mut failures = 0usize;
        let mut waiters = Vec::with_capacity(self.mutations.len());
        let dispatch = !self.inline_work && self.mutations.len() > 1;
        for mutation in &self.mutations {
            if let Err(e) = AttemptHooks::fire_doc(hook, &mutation.id) {
                warn!(doc = %mutation.id, error = %e, "injected failure before doc resolution");
                failures += 1;
                continue;
            }
            if dispatch {
                let store = Arc::clone(&self.store);
                let id = mutation.id.clone();
                let attempt_id = self.id.as_uuid();
                let durability = self.config.durability;
                let (tx, rx) = completion();
                let task = move || {
                    let outcome: StoreResult<()> = match resolution {
                        DocResolution::Unstage => {
                            protocol::unstage_doc(store.as_ref(), &id, attempt_id, durability)
                        }
                        DocResolution::Rollback => {
                            protocol::rollback_doc(store.as_ref(), &id, attempt_id, durability)
                        }
                    };
                    tx.complete((id, outcome));
                };
                if self.executor.spawn(task).is_ok() {
                    waiters.push(rx);
                    continue;
                }
                // Executor gone (engine closing): fall through inline.
            }
            let outcome = match resolution {
                DocResolution::Unstage => protocol::unstage_doc(
                    self.store.as_ref(),
                    &mutation.id,
                    self.id.as_uuid(),
                    self.config.durability,
                ),
                DocResolution::Rollback => protocol::rollback_doc(
                    self.store.as_ref(),
                    &mutation.id,
                    self.id.as_uuid(),
                    self.config.durability,
                ),
            };
            if let Err(e) = outcome {
                warn!(doc = %mutation.id, error = %e, "document resolution failed");
                failures += 1;
            }
        }
        for waiter in waiters {
            match waiter.wait() {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(e))) => {
                    warn!(doc = %id, error = %e, "document resolution failed");
                    failures += 1;
                }
                Err(_) => failures += 1,
            }
        }
        failures
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocResolution {
    Unstage,
    Rollback,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::UnsupportedQueryService;
    use keyspan_store::MemoryStore;
    use std::time::Duration;

    fn coll() -> CollectionAddress {
        CollectionAddress::new("default", "_default", "things")
    }

    fn make_attempt(store: &Arc<MemoryStore>) -> AttemptContext {
        let config = TransactionsConfig::default().with_durability(keyspan_store::Durability::None);
        AttemptContext::new(
            TransactionId::generate(),
            Arc::clone(store) as Arc<dyn DocumentStore>,
            Arc::new(UnsupportedQueryService),
            Arc::new(Executor::new(1)),
            config,
            Instant::now() + Duration::from_secs(15),
            now_ms() + 15_000,
            true,
        )
    }

    #[test]
    fn insert_stages_document_and_lists_it_in_record() {
        let store = Arc::new(MemoryStore::new());
        let mut attempt = make_attempt(&store);

        attempt.insert(&coll(), "a", vec![1]).unwrap();

        // the document exists only as a staged insert
        let (envelope, _) = store.get(&coll().doc("a")).unwrap();
        assert!(envelope.content.is_none());
        assert!(envelope.staging.is_owned_by(attempt.attempt_id().as_uuid()));

        // the record lists it for cleanup
        let record_id =
            AtomicityRecord::id_for(&attempt.config.metadata_collection, attempt.id.as_uuid());
        let (record_env, _) = store.get(&record_id).unwrap();
        let record = AtomicityRecord::decode(&record_env.content.unwrap()).unwrap();
        assert_eq!(record.staged_docs.len(), 1);
        assert_eq!(record.staged_docs[0].op, StagedOp::Insert);
        assert_eq!(attempt.state(), AttemptState::Staged);
    }

    #[test]
    fn commit_makes_staged_insert_visible_and_drops_record() {
        let store = Arc::new(MemoryStore::new());
        let mut attempt = make_attempt(&store);
        let record_id =
            AtomicityRecord::id_for(&attempt.config.metadata_collection, attempt.id.as_uuid());

        attempt.insert(&coll(), "a", vec![1]).unwrap();
        let complete = attempt.commit().unwrap();

        assert!(complete);
        assert_eq!(store.committed_content(&coll().doc("a")), Some(vec![1]));
        let (envelope, _) = store.get(&coll().doc("a")).unwrap();
        assert!(envelope.staging.is_clean());
        assert!(!store.contains(&record_id));
    }

    #[test]
    fn rollback_restores_replace_pre_image() {
        let store = Arc::new(MemoryStore::new());
        store.put_committed(&coll().doc("a"), vec![1]);
        let mut attempt = make_attempt(&store);

        let doc = attempt.get(&coll(), "a").unwrap();
        attempt.replace(&doc, vec![2]).unwrap();

        // pre-image stays visible under staging
        assert_eq!(store.committed_content(&coll().doc("a")), Some(vec![1]));

        attempt.rollback().unwrap();
        let (envelope, _) = store.get(&coll().doc("a")).unwrap();
        assert!(envelope.staging.is_clean());
        assert_eq!(envelope.content, Some(vec![1]));
        assert_eq!(attempt.state(), AttemptState::RolledBack);
    }

    #[test]
    fn remove_of_own_staged_insert_undoes_it() {
        let store = Arc::new(MemoryStore::new());
        let mut attempt = make_attempt(&store);

        let doc = attempt.insert(&coll(), "a", vec![1]).unwrap();
        attempt.remove(&doc).unwrap();

        assert!(!store.contains(&coll().doc("a")));
        assert!(!attempt.has_staged_mutations());
        assert!(attempt.commit().unwrap());
    }

    #[test]
    fn insert_after_own_remove_revives_as_replace() {
        let store = Arc::new(MemoryStore::new());
        store.put_committed(&coll().doc("a"), vec![1]);
        let mut attempt = make_attempt(&store);

        let doc = attempt.get(&coll(), "a").unwrap();
        attempt.remove(&doc).unwrap();
        attempt.insert(&coll(), "a", vec![9]).unwrap();

        assert!(attempt.commit().unwrap());
        assert_eq!(store.committed_content(&coll().doc("a")), Some(vec![9]));
    }

    #[test]
    fn replace_after_own_remove_is_illegal() {
        let store = Arc::new(MemoryStore::new());
        store.put_committed(&coll().doc("a"), vec![1]);
        let mut attempt = make_attempt(&store);

        let doc = attempt.get(&coll(), "a").unwrap();
        attempt.remove(&doc).unwrap();
        let err = attempt.replace(&doc, vec![2]).unwrap_err();
        assert!(matches!(err, TxnError::IllegalState { .. }));
    }

    #[test]
    fn foreign_get_result_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        store.put_committed(&coll().doc("a"), vec![1]);
        let mut first = make_attempt(&store);
        let doc = first.get(&coll(), "a").unwrap();

        let mut second = make_attempt(&store);
        let err = second.replace(&doc, vec![2]).unwrap_err();
        assert!(matches!(err, TxnError::IllegalState { .. }));
    }

    #[test]
    fn staged_document_blocks_other_live_attempt() {
        let store = Arc::new(MemoryStore::new());
        store.put_committed(&coll().doc("a"), vec![1]);
        let mut first = make_attempt(&store);
        let doc = first.get(&coll(), "a").unwrap();
        first.replace(&doc, vec![2]).unwrap();

        let mut second = make_attempt(&store);
        let err = second.get(&coll(), "a").unwrap_err();
        assert!(matches!(err, TxnError::DocumentAlreadyStaged { .. }));
    }

    #[test]
    fn stale_cas_replace_is_a_conflict() {
        let store = Arc::new(MemoryStore::new());
        store.put_committed(&coll().doc("a"), vec![1]);
        let mut attempt = make_attempt(&store);
        let doc = attempt.get(&coll(), "a").unwrap();

        // another actor moves the document on
        store.put_committed(&coll().doc("a"), vec![7]);

        let err = attempt.replace(&doc, vec![2]).unwrap_err();
        assert!(matches!(err, TxnError::WriteWriteConflict { .. }));
    }

    #[test]
    fn read_only_attempt_commits_without_a_record() {
        let store = Arc::new(MemoryStore::new());
        store.put_committed(&coll().doc("a"), vec![1]);
        let mut attempt = make_attempt(&store);
        attempt.get(&coll(), "a").unwrap();

        assert!(attempt.commit().unwrap());
        // only the seeded document: no record was ever written
        assert_eq!(store.document_count(), 1);
    }

    #[test]
    fn failed_insert_leaves_no_record_behind() {
        let store = Arc::new(MemoryStore::new());
        store.put_committed(&coll().doc("a"), vec![1]);
        let mut attempt = make_attempt(&store);

        let err = attempt.insert(&coll(), "a", vec![2]).unwrap_err();
        assert!(matches!(err, TxnError::DocumentExists { .. }));

        attempt.rollback().unwrap();
        // only the seeded document remains: the record was settled
        assert_eq!(store.document_count(), 1);
    }

    #[test]
    fn expired_attempt_rejects_operations() {
        let store = Arc::new(MemoryStore::new());
        store.put_committed(&coll().doc("a"), vec![1]);
        let config = TransactionsConfig::default().with_durability(keyspan_store::Durability::None);
        let mut attempt = AttemptContext::new(
            TransactionId::generate(),
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::new(UnsupportedQueryService),
            Arc::new(Executor::new(1)),
            config,
            Instant::now() - Duration::from_millis(1),
            now_ms(),
            true,
        );
        assert_eq!(attempt.get(&coll(), "a"), Err(TxnError::Expired));
    }
}
