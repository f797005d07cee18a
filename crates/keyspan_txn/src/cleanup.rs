//! Cleanup subsystem: finishes or reverts abandoned attempts.
//!
//! A background scanner enumerates atomicity records in the metadata
//! collection and drives every expired, non-terminal attempt to a
//! terminal state using only what the record says, so a crashed or
//! abandoned participant never leaves a transaction half-applied. All
//! destructive steps are the same idempotent, CAS-guarded operations
//! the live attempt uses, so a sweep racing a live attempt either
//! no-ops or correctly finishes an abandoned one.

use crate::hooks::CleanupHooks;
use crate::protocol;
use crate::record::{now_ms, AtomicityRecord, AttemptState};
use keyspan_store::{
    CollectionAddress, DocumentEnvelope, DocumentId, DocumentStore, Durability, StoreError,
    StoreResult,
};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Lifecycle of the cleanup scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupState {
    /// Idle between sweeps.
    Started,
    /// A sweep is in progress.
    Scanning,
    /// `close` was requested; the in-flight sweep finishes, no new one starts.
    Draining,
    /// The background loop has exited.
    Stopped,
}

/// Counters for cleanup activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// Records read during sweeps.
    pub records_examined: u64,
    /// Abandoned commits finished (unstaging completed).
    pub attempts_finished: u64,
    /// Abandoned attempts rolled back.
    pub attempts_rolled_back: u64,
    /// Expired terminal records removed.
    pub records_pruned: u64,
    /// Records that could not be processed this sweep.
    pub failures: u64,
}

impl CleanupStats {
    fn merge(&mut self, other: &CleanupStats) {
        self.records_examined += other.records_examined;
        self.attempts_finished += other.attempts_finished;
        self.attempts_rolled_back += other.attempts_rolled_back;
        self.records_pruned += other.records_pruned;
        self.failures += other.failures;
    }
}

/// What a sweep did with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Skipped,
    Finished,
    RolledBack,
    Pruned,
}

struct Lifecycle {
    state: Mutex<CleanupState>,
    cv: Condvar,
}

struct CleanupWorker {
    store: Arc<dyn DocumentStore>,
    metadata_collection: CollectionAddress,
    durability: Durability,
    hooks: CleanupHooks,
    lifecycle: Lifecycle,
    totals: Mutex<CleanupStats>,
}

/// Background scanner over the metadata collection.
///
/// Owns the scan loop; `close` drains an in-flight sweep and blocks
/// until the loop has stopped. `run_once` is public for callers (and
/// tests) that schedule sweeps themselves.
pub struct CleanupEngine {
    worker: Arc<CleanupWorker>,
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupEngine {
    /// Creates an engine; the background loop starts with [`CleanupEngine::start`].
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        metadata_collection: CollectionAddress,
        durability: Durability,
        interval: Duration,
        hooks: CleanupHooks,
    ) -> Self {
        Self {
            worker: Arc::new(CleanupWorker {
                store,
                metadata_collection,
                durability,
                hooks,
                lifecycle: Lifecycle {
                    state: Mutex::new(CleanupState::Started),
                    cv: Condvar::new(),
                },
                totals: Mutex::new(CleanupStats::default()),
            }),
            interval,
            handle: Mutex::new(None),
        }
    }

    /// Current scheduler state.
    #[must_use]
    pub fn state(&self) -> CleanupState {
        *self.worker.lifecycle.state.lock()
    }

    /// Cumulative counters across all sweeps.
    #[must_use]
    pub fn stats(&self) -> CleanupStats {
        self.worker.totals.lock().clone()
    }

    /// Spawns the background scan loop. No-op if already running.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        let worker = Arc::clone(&self.worker);
        let interval = self.interval;
        *handle = Some(std::thread::spawn(move || worker.scan_loop(interval)));
    }

    /// Runs one sweep on the calling thread and returns its counters.
    pub fn run_once(&self) -> CleanupStats {
        self.worker.run_once()
    }

    /// Stops the loop: no new sweeps start, an in-flight sweep is
    /// completed, and this call blocks until the loop has quiesced.
    pub fn close(&self) {
        {
            let mut state = self.worker.lifecycle.state.lock();
            if *state == CleanupState::Stopped {
                return;
            }
            *state = CleanupState::Draining;
            self.worker.lifecycle.cv.notify_all();
        }
        match self.handle.lock().take() {
            Some(handle) => {
                let _ = handle.join();
            }
            None => {
                // Loop never started; nothing to drain.
                *self.worker.lifecycle.state.lock() = CleanupState::Stopped;
            }
        }
    }
}

impl Drop for CleanupEngine {
    fn drop(&mut self) {
        self.close();
    }
}

impl CleanupWorker {
    fn scan_loop(&self, interval: Duration) {
        loop {
            {
                let mut state = self.lifecycle.state.lock();
                if *state == CleanupState::Draining {
                    break;
                }
                *state = CleanupState::Scanning;
            }
            self.run_once();
            {
                let mut state = self.lifecycle.state.lock();
                if *state == CleanupState::Draining {
                    break;
                }
                *state = CleanupState::Started;
                let _ = self.lifecycle.cv.wait_for(&mut state, interval);
                if *state == CleanupState::Draining {
                    break;
                }
            }
        }
        let mut state = self.lifecycle.state.lock();
        *state = CleanupState::Stopped;
        self.lifecycle.cv.notify_all();
        debug!("cleanup loop stopped");
    }

    fn run_once(&self) -> CleanupStats {
        let mut stats = CleanupStats::default();
        let ids = match self.store.scan_collection(&self.metadata_collection) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "metadata collection scan failed");
                stats.failures += 1;
                self.totals.lock().merge(&stats);
                return stats;
            }
        };
        for id in ids {
            stats.records_examined += 1;
            if let Err(e) = CleanupHooks::fire_doc(&self.hooks.before_record_cleanup, &id) {
                warn!(record = %id, error = %e, "injected failure before record cleanup");
                stats.failures += 1;
                continue;
            }
            match self.process_record(&id) {
                Ok(RecordOutcome::Skipped) => {}
                Ok(RecordOutcome::Finished) => stats.attempts_finished += 1,
                Ok(RecordOutcome::RolledBack) => stats.attempts_rolled_back += 1,
                Ok(RecordOutcome::Pruned) => stats.records_pruned += 1,
                Err(e) => {
                    warn!(record = %id, error = %e, "record cleanup failed; will retry next sweep");
                    stats.failures += 1;
                }
            }
        }
        self.totals.lock().merge(&stats);
        stats
    }

    /// Drives one record toward a terminal state, using only what the
    /// record itself says.
    fn process_record(&self, id: &DocumentId) -> StoreResult<RecordOutcome> {
        let (envelope, cas) = match self.store.get(id) {
            Ok(found) => found,
            Err(StoreError::DocumentNotFound) => return Ok(RecordOutcome::Skipped),
            Err(e) => return Err(e),
        };
        let Some(content) = envelope.content else {
            return Ok(RecordOutcome::Skipped);
        };
        let mut record = match AtomicityRecord::decode(&content) {
            Ok(record) => record,
            Err(e) => {
                warn!(record = %id, error = %e, "undecodable record; pruning");
                self.store.remove(id, cas, self.durability)?;
                return Ok(RecordOutcome::Pruned);
            }
        };

        let now = now_ms();
        if record.state.is_terminal() {
            if record.is_expired(now) {
                // Leftover from a crash between the terminal-state
                // write and record removal.
                self.store.remove(id, cas, self.durability)?;
                return Ok(RecordOutcome::Pruned);
            }
            return Ok(RecordOutcome::Skipped);
        }
        if !record.is_expired(now) {
            return Ok(RecordOutcome::Skipped);
        }

        match record.state {
            AttemptState::Committing => {
                debug!(record = %id, "adopting abandoned commit");
                self.resolve_docs(&record, DocAction::Unstage)?;
                record.state = AttemptState::Committed;
                self.write_record(id, &record, cas)?;
                Ok(RecordOutcome::Finished)
            }
            _ => {
                debug!(record = %id, state = ?record.state, "rolling back abandoned attempt");
                record.state = AttemptState::Aborting;
                let cas = self.write_record(id, &record, cas)?;
                self.resolve_docs(&record, DocAction::Rollback)?;
                record.state = AttemptState::RolledBack;
                self.write_record(id, &record, cas)?;
                Ok(RecordOutcome::RolledBack)
            }
        }
    }

    fn resolve_docs(&self, record: &AtomicityRecord, action: DocAction) -> StoreResult<()> {
        for doc in &record.staged_docs {
            CleanupHooks::fire_doc(&self.hooks.before_doc_cleanup, &doc.id)?;
            match action {
                DocAction::Unstage => protocol::unstage_doc(
                    self.store.as_ref(),
                    &doc.id,
                    record.attempt_id,
                    self.durability,
                )?,
                DocAction::Rollback => protocol::rollback_doc(
                    self.store.as_ref(),
                    &doc.id,
                    record.attempt_id,
                    self.durability,
                )?,
            }
        }
        Ok(())
    }

    fn write_record(
        &self,
        id: &DocumentId,
        record: &AtomicityRecord,
        cas: keyspan_store::Cas,
    ) -> StoreResult<keyspan_store::Cas> {
        let content = record
            .encode()
            .map_err(|e| StoreError::backend(e.to_string()))?;
        self.store.replace(
            id,
            cas,
            DocumentEnvelope::committed(content),
            self.durability,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocAction {
    Unstage,
    Rollback,
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyspan_store::{MemoryStore, StagedOp, Staging, StagingInfo};
    use uuid::Uuid;

    fn meta_collection() -> CollectionAddress {
        CollectionAddress::new("txn", "meta", "records")
    }

    fn doc_id(key: &str) -> DocumentId {
        DocumentId::new("default", "_default", "things", key)
    }

    fn make_engine(store: &Arc<MemoryStore>) -> CleanupEngine {
        CleanupEngine::new(
            Arc::clone(store) as Arc<dyn DocumentStore>,
            meta_collection(),
            Durability::None,
            Duration::from_millis(10),
            CleanupHooks::default(),
        )
    }

    /// Seeds an abandoned attempt: a record in `state`, already
    /// expired, with one staged document.
    fn seed_abandoned(
        store: &MemoryStore,
        state: AttemptState,
        op: StagedOp,
        pre_image: Option<Vec<u8>>,
        staged: Option<Vec<u8>>,
    ) -> (DocumentId, DocumentId) {
        let attempt_id = Uuid::new_v4();
        let record_id = AtomicityRecord::id_for(&meta_collection(), attempt_id);
        let id = doc_id("victim");

        let info = StagingInfo {
            txn_id: Uuid::new_v4(),
            attempt_id,
            op,
            staged_content: staged,
            record_id: record_id.clone(),
        };
        let envelope = DocumentEnvelope {
            content: pre_image,
            staging: Staging::StagedBy(info),
        };
        store.insert(&id, envelope, Durability::None).unwrap();

        let mut record = AtomicityRecord::new(info_txn(), attempt_id, now_ms().saturating_sub(1));
        record.state = state;
        record.upsert_doc(crate::record::StagedDocRef { id: id.clone(), op });
        store
            .insert(
                &record_id,
                DocumentEnvelope::committed(record.encode().unwrap()),
                Durability::None,
            )
            .unwrap();
        (id, record_id)
    }

    fn info_txn() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn finishes_abandoned_commit() {
        let store = Arc::new(MemoryStore::new());
        let (doc, record) = seed_abandoned(
            &store,
            AttemptState::Committing,
            StagedOp::Replace,
            Some(vec![1]),
            Some(vec![2]),
        );
        let engine = make_engine(&store);

        let stats = engine.run_once();
        assert_eq!(stats.attempts_finished, 1);

        // staged content became visible
        assert_eq!(store.committed_content(&doc), Some(vec![2]));
        let (envelope, _) = store.get(&doc).unwrap();
        assert!(envelope.staging.is_clean());

        // record is terminal now; the next sweep prunes it
        let stats = engine.run_once();
        assert_eq!(stats.records_pruned, 1);
        assert!(!store.contains(&record));
    }

    #[test]
    fn rolls_back_abandoned_staged_attempt() {
        let store = Arc::new(MemoryStore::new());
        let (doc, _record) = seed_abandoned(
            &store,
            AttemptState::Staged,
            StagedOp::Replace,
            Some(vec![1]),
            Some(vec![2]),
        );
        let engine = make_engine(&store);

        let stats = engine.run_once();
        assert_eq!(stats.attempts_rolled_back, 1);
        assert_eq!(store.committed_content(&doc), Some(vec![1]));
    }

    #[test]
    fn rolls_back_abandoned_staged_insert() {
        let store = Arc::new(MemoryStore::new());
        let (doc, _record) = seed_abandoned(
            &store,
            AttemptState::Staged,
            StagedOp::Insert,
            None,
            Some(vec![9]),
        );
        let engine = make_engine(&store);

        engine.run_once();
        assert!(!store.contains(&doc));
    }

    #[test]
    fn terminal_unexpired_record_is_untouched() {
        let store = Arc::new(MemoryStore::new());
        let attempt_id = Uuid::new_v4();
        let record_id = AtomicityRecord::id_for(&meta_collection(), attempt_id);
        let mut record = AtomicityRecord::new(Uuid::new_v4(), attempt_id, now_ms() + 60_000);
        record.state = AttemptState::Committed;
        store
            .insert(
                &record_id,
                DocumentEnvelope::committed(record.encode().unwrap()),
                Durability::None,
            )
            .unwrap();
        let engine = make_engine(&store);

        let stats = engine.run_once();
        assert_eq!(stats.records_examined, 1);
        assert_eq!(stats.records_pruned, 0);
        assert!(store.contains(&record_id));

        // idempotence: nothing changes on a replay either
        let stats = engine.run_once();
        assert_eq!(stats.attempts_finished, 0);
        assert_eq!(stats.attempts_rolled_back, 0);
    }

    #[test]
    fn live_record_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let attempt_id = Uuid::new_v4();
        let record_id = AtomicityRecord::id_for(&meta_collection(), attempt_id);
        let record = AtomicityRecord::new(Uuid::new_v4(), attempt_id, now_ms() + 60_000);
        store
            .insert(
                &record_id,
                DocumentEnvelope::committed(record.encode().unwrap()),
                Durability::None,
            )
            .unwrap();
        let engine = make_engine(&store);

        let stats = engine.run_once();
        assert_eq!(stats.attempts_rolled_back, 0);
        assert!(store.contains(&record_id));
    }

    #[test]
    fn close_stops_background_loop() {
        let store = Arc::new(MemoryStore::new());
        let engine = make_engine(&store);
        engine.start();
        engine.close();
        assert_eq!(engine.state(), CleanupState::Stopped);
        // idempotent
        engine.close();
        assert_eq!(engine.state(), CleanupState::Stopped);
    }

    #[test]
    fn close_without_start_is_clean() {
        let store = Arc::new(MemoryStore::new());
        let engine = make_engine(&store);
        engine.close();
        assert_eq!(engine.state(), CleanupState::Stopped);
    }

    #[test]
    fn hook_failure_defers_record_to_next_sweep() {
        let store = Arc::new(MemoryStore::new());
        let (doc, _record) = seed_abandoned(
            &store,
            AttemptState::Staged,
            StagedOp::Replace,
            Some(vec![1]),
            Some(vec![2]),
        );
        let fail_once = std::sync::atomic::AtomicBool::new(true);
        let hooks = CleanupHooks::new().with_before_record_cleanup(move |_id| {
            if fail_once.swap(false, std::sync::atomic::Ordering::SeqCst) {
                Err(StoreError::transient("injected"))
            } else {
                Ok(())
            }
        });
        let engine = CleanupEngine::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            meta_collection(),
            Durability::None,
            Duration::from_millis(10),
            hooks,
        );

        let stats = engine.run_once();
        assert_eq!(stats.failures, 1);
        // document untouched on the failed sweep
        assert_eq!(store.committed_content(&doc), Some(vec![1]));

        let stats = engine.run_once();
        assert_eq!(stats.attempts_rolled_back, 1);
    }
}
