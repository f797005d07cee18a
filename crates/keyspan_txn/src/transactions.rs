//! Transactions façade: the engine entry point.

use crate::attempt::AttemptContext;
use crate::cleanup::{CleanupEngine, CleanupStats};
use crate::config::{SingleQueryOptions, TransactionOptions, TransactionsConfig};
use crate::context::TransactionContext;
use crate::error::{ErrorContext, OpErrorKind, TxnResult};
use crate::executor::{completion, Executor};
use crate::query::{QueryOptions, QueryResult, QueryService, UnsupportedQueryService};
use crate::result::TransactionResult;
use crate::types::TransactionId;
use keyspan_store::DocumentStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Runs user logic as multi-document transactions against a store.
///
/// Owns the worker pool and the background cleanup engine. `close`
/// stops both: queued asynchronous work drains, an in-flight cleanup
/// sweep completes, and no new work is accepted.
pub struct Transactions {
    store: Arc<dyn DocumentStore>,
    query_service: Arc<dyn QueryService>,
    config: TransactionsConfig,
    executor: Arc<Executor>,
    cleanup: CleanupEngine,
    closed: AtomicBool,
}

impl Transactions {
    /// Creates an engine without query support.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, config: TransactionsConfig) -> Self {
        Self::with_query_service(store, Arc::new(UnsupportedQueryService), config)
    }

    /// Creates an engine routing statements through `query_service`.
    #[must_use]
    pub fn with_query_service(
        store: Arc<dyn DocumentStore>,
        query_service: Arc<dyn QueryService>,
        config: TransactionsConfig,
    ) -> Self {
        let executor = Arc::new(Executor::new(config.executor_threads));
        let cleanup = CleanupEngine::new(
            Arc::clone(&store),
            config.metadata_collection.clone(),
            config.durability,
            config.cleanup_interval,
            config.cleanup_hooks.clone(),
        );
        if config.run_cleanup {
            cleanup.start();
        }
        debug!(meta = %config.metadata_collection, "transactions engine created");
        Self {
            store,
            query_service,
            config,
            executor,
            cleanup,
            closed: AtomicBool::new(false),
        }
    }

    /// Runs `logic` as a transaction, blocking until a terminal outcome.
    ///
    /// The logic may run several times: once per attempt. It must be
    /// safe to re-execute from scratch.
    pub fn run(
        &self,
        logic: impl FnMut(&mut AttemptContext) -> TxnResult<()>,
    ) -> TransactionResult {
        self.run_with_options(TransactionOptions::default(), logic)
    }

    /// Runs `logic` with per-transaction overrides.
    pub fn run_with_options(
        &self,
        options: TransactionOptions,
        mut logic: impl FnMut(&mut AttemptContext) -> TxnResult<()>,
    ) -> TransactionResult {
        if self.closed.load(Ordering::SeqCst) {
            return Self::closed_result();
        }
        let config = self.config.merged_with(&options);
        let context = TransactionContext::new(
            Arc::clone(&self.store),
            Arc::clone(&self.query_service),
            Arc::clone(&self.executor),
            config,
            false,
        );
        context.run(&mut logic)
    }

    /// Runs `logic` on the worker pool; `callback` receives the result
    /// exactly once.
    ///
    /// # Errors
    ///
    /// Fails if the engine is closed and the work cannot be scheduled.
    pub fn run_async(
        &self,
        options: TransactionOptions,
        logic: impl FnMut(&mut AttemptContext) -> TxnResult<()> + Send + 'static,
        callback: impl FnOnce(TransactionResult) + Send + 'static,
    ) -> TxnResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(crate::error::TxnError::illegal_state("engine is closed"));
        }
        let store = Arc::clone(&self.store);
        let query_service = Arc::clone(&self.query_service);
        let executor = Arc::clone(&self.executor);
        let config = self.config.merged_with(&options);
        self.executor.spawn(move || {
            let context = TransactionContext::new(store, query_service, executor, config, true);
            let mut logic = logic;
            callback(context.run(&mut logic));
        })
    }

    /// Runs a lone statement as its own transaction.
    ///
    /// The wrapping transaction issues the statement through the query
    /// service and waits exactly on its completion signal; `callback`
    /// receives the transaction result and, on success, the rows.
    ///
    /// # Errors
    ///
    /// Fails if the engine is closed and the work cannot be scheduled.
    pub fn single_query(
        &self,
        statement: impl Into<String>,
        options: SingleQueryOptions,
        query_context: Option<String>,
        callback: impl FnOnce(TransactionResult, Option<QueryResult>) + Send + 'static,
    ) -> TxnResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(crate::error::TxnError::illegal_state("engine is closed"));
        }
        let statement = statement.into();
        let store = Arc::clone(&self.store);
        let query_service = Arc::clone(&self.query_service);
        let executor = Arc::clone(&self.executor);
        let config = self.config.merged_with(&options.to_transaction_options());
        self.executor.spawn(move || {
            let context = TransactionContext::new(store, query_service, executor, config, true);
            let rows: Arc<Mutex<Option<QueryResult>>> = Arc::new(Mutex::new(None));
            let rows_slot = Arc::clone(&rows);
            let mut logic = move |attempt: &mut AttemptContext| -> TxnResult<()> {
                let (tx, rx) = completion();
                attempt.query(
                    statement.clone(),
                    QueryOptions::new(),
                    query_context.clone(),
                    move |outcome| tx.complete(outcome),
                )?;
                let result = rx.wait()??;
                *rows_slot.lock() = Some(result);
                Ok(())
            };
            let result = context.run(&mut logic);
            let rows = rows.lock().take();
            callback(result, rows);
        })
    }

    /// Cumulative cleanup counters.
    #[must_use]
    pub fn cleanup_stats(&self) -> CleanupStats {
        self.cleanup.stats()
    }

    /// Runs one cleanup sweep on the calling thread.
    pub fn cleanup_once(&self) -> CleanupStats {
        self.cleanup.run_once()
    }

    /// Stops the engine.
    ///
    /// New transactions are rejected, queued asynchronous work drains,
    /// and the call blocks until the cleanup loop has quiesced.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing transactions engine");
        self.cleanup.close();
        self.executor.shutdown();
    }

    fn closed_result() -> TransactionResult {
        TransactionResult::new(
            TransactionId::generate(),
            false,
            ErrorContext::failed(OpErrorKind::Unknown),
        )
    }
}

impl Drop for Transactions {
    fn drop(&mut self) {
        self.close();
    }
}
