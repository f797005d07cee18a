//! Transaction context: the attempt retry loop.

use crate::attempt::AttemptContext;
use crate::config::TransactionsConfig;
use crate::error::{ErrorContext, OpErrorKind, TxnError, TxnResult};
use crate::executor::Executor;
use crate::query::QueryService;
use crate::record::now_ms;
use crate::result::TransactionResult;
use crate::types::TransactionId;
use keyspan_store::DocumentStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Outcome of executing one attempt, as classified by the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptOutcome {
    /// Committed; carries whether unstaging finished.
    Success { unstaging_complete: bool },
    /// Recoverable failure; a fresh attempt may succeed.
    Retry { reason: OpErrorKind },
    /// Terminal failure.
    Fatal { cause: OpErrorKind },
    /// The expiry deadline passed.
    Expired { cause: Option<OpErrorKind> },
}

/// Owns the sequence of attempts for one logical transaction.
///
/// Runs user logic against fresh attempt contexts under exponential
/// backoff, bounded primarily by the expiry deadline and defensively by
/// a maximum attempt count.
pub struct TransactionContext {
    id: TransactionId,
    store: Arc<dyn DocumentStore>,
    query_service: Arc<dyn QueryService>,
    executor: Arc<Executor>,
    config: TransactionsConfig,
    deadline: Instant,
    expires_at_ms: u64,
    /// True when the loop itself runs on a pool worker; attempts then
    /// keep all work on the calling thread.
    inline_work: bool,
}

impl TransactionContext {
    pub(crate) fn new(
        store: Arc<dyn DocumentStore>,
        query_service: Arc<dyn QueryService>,
        executor: Arc<Executor>,
        config: TransactionsConfig,
        inline_work: bool,
    ) -> Self {
        let deadline = Instant::now() + config.expiration;
        let expires_at_ms = now_ms() + config.expiration.as_millis() as u64;
        Self {
            id: TransactionId::generate(),
            store,
            query_service,
            executor,
            config,
            deadline,
            expires_at_ms,
            inline_work,
        }
    }

    /// The transaction's identifier.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.id
    }

    /// Runs the attempt loop to a terminal outcome.
    pub(crate) fn run(
        &self,
        logic: &mut dyn FnMut(&mut AttemptContext) -> TxnResult<()>,
    ) -> TransactionResult {
        let mut attempts = 0u32;
        let mut last_reason: Option<OpErrorKind> = None;
        loop {
            attempts += 1;
            if attempts > self.config.max_attempts {
                warn!(txn = %self.id, attempts, "attempt cap exhausted");
                return self.result(ErrorContext::failed(
                    last_reason.unwrap_or(OpErrorKind::Unknown),
                ));
            }

            let delay = self.config.backoff.delay_for_attempt(attempts);
            if !delay.is_zero() {
                let remaining = self.deadline.saturating_duration_since(Instant::now());
                std::thread::sleep(delay.min(remaining));
            }
            if Instant::now() >= self.deadline {
                debug!(txn = %self.id, attempts, "expired before attempt");
                return self.result(ErrorContext::expired(last_reason));
            }

            let mut attempt = AttemptContext::new(
                self.id,
                Arc::clone(&self.store),
                Arc::clone(&self.query_service),
                Arc::clone(&self.executor),
                self.config.clone(),
                self.deadline,
                self.expires_at_ms,
                self.inline_work,
            );
            debug!(txn = %self.id, attempt = %attempt.attempt_id(), n = attempts, "starting attempt");

            let outcome = match logic(&mut attempt) {
                Ok(()) => match attempt.commit() {
                    Ok(unstaging_complete) => AttemptOutcome::Success { unstaging_complete },
                    Err(e) => self.classify(e, &mut attempt),
                },
                Err(e) => self.classify(e, &mut attempt),
            };

            match outcome {
                AttemptOutcome::Success { unstaging_complete } => {
                    return TransactionResult::new(self.id, unstaging_complete, ErrorContext::ok());
                }
                AttemptOutcome::Retry { reason } => {
                    debug!(txn = %self.id, ?reason, "retrying after recoverable failure");
                    last_reason = Some(reason);
                    continue;
                }
                AttemptOutcome::Fatal { cause } => {
                    return self.result(ErrorContext::failed(cause));
                }
                AttemptOutcome::Expired { cause } => {
                    return self.result(ErrorContext::expired(cause.or(last_reason)));
                }
            }
        }
    }

    /// Classifies a failed attempt and rolls its staged work back.
    fn classify(&self, error: TxnError, attempt: &mut AttemptContext) -> AttemptOutcome {
        if let Err(e) = attempt.rollback() {
            // Whatever could not be reverted sits behind an Aborting
            // record; the cleanup subsystem finishes it.
            warn!(txn = %self.id, error = %e, "rollback incomplete");
        }
        match error {
            TxnError::Expired => AttemptOutcome::Expired { cause: None },
            e if e.is_retryable() => {
                if Instant::now() >= self.deadline {
                    AttemptOutcome::Expired {
                        cause: Some(e.kind()),
                    }
                } else {
                    AttemptOutcome::Retry { reason: e.kind() }
                }
            }
            e => AttemptOutcome::Fatal { cause: e.kind() },
        }
    }

    fn result(&self, ctx: ErrorContext) -> TransactionResult {
        TransactionResult::new(self.id, false, ctx)
    }
}
