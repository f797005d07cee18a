//! Engine and per-transaction configuration.

use crate::hooks::{AttemptHooks, CleanupHooks};
use keyspan_store::{CollectionAddress, Durability};
use std::time::Duration;

/// Backoff policy for attempt creation.
///
/// Delay doubles per attempt from `initial` and is capped at `max`;
/// the transaction's expiry bounds the loop overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the second attempt.
    pub initial: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
}

impl Backoff {
    /// Returns the delay to apply before attempt number `attempt`
    /// (1-indexed; the first attempt has no delay).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let doublings = (attempt - 2).min(31);
        let delay = self.initial.saturating_mul(1u32 << doublings);
        delay.min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(100),
        }
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct TransactionsConfig {
    /// Time budget per transaction; expiry is the primary terminator.
    pub expiration: Duration,
    /// Durability requested on every staging/commit/rollback write.
    pub durability: Durability,
    /// Collection holding atomicity records.
    pub metadata_collection: CollectionAddress,
    /// Backoff between attempts.
    pub backoff: Backoff,
    /// Defensive cap on attempts per transaction.
    pub max_attempts: u32,
    /// Interval between background cleanup sweeps.
    pub cleanup_interval: Duration,
    /// Whether to run the background cleanup loop.
    pub run_cleanup: bool,
    /// Worker threads for the async run variants and concurrent unstaging.
    pub executor_threads: usize,
    /// Attempt state machine test hooks.
    pub attempt_hooks: AttemptHooks,
    /// Cleanup state machine test hooks.
    pub cleanup_hooks: CleanupHooks,
}

impl Default for TransactionsConfig {
    fn default() -> Self {
        Self {
            expiration: Duration::from_secs(15),
            durability: Durability::Majority,
            metadata_collection: CollectionAddress::new("txn", "meta", "records"),
            backoff: Backoff::default(),
            max_attempts: 1000,
            cleanup_interval: Duration::from_secs(60),
            run_cleanup: true,
            executor_threads: 2,
            attempt_hooks: AttemptHooks::default(),
            cleanup_hooks: CleanupHooks::default(),
        }
    }
}

impl TransactionsConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transaction time budget.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Sets the durability level for all transactional writes.
    #[must_use]
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    /// Sets the collection holding atomicity records.
    #[must_use]
    pub fn with_metadata_collection(mut self, collection: CollectionAddress) -> Self {
        self.metadata_collection = collection;
        self
    }

    /// Sets the cleanup sweep interval.
    #[must_use]
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Enables or disables the background cleanup loop.
    #[must_use]
    pub fn with_run_cleanup(mut self, run: bool) -> Self {
        self.run_cleanup = run;
        self
    }

    /// Sets the attempt test hooks.
    #[must_use]
    pub fn with_attempt_hooks(mut self, hooks: AttemptHooks) -> Self {
        self.attempt_hooks = hooks;
        self
    }

    /// Sets the cleanup test hooks.
    #[must_use]
    pub fn with_cleanup_hooks(mut self, hooks: CleanupHooks) -> Self {
        self.cleanup_hooks = hooks;
        self
    }

    /// Applies per-transaction overrides.
    #[must_use]
    pub(crate) fn merged_with(&self, options: &TransactionOptions) -> Self {
        let mut config = self.clone();
        if let Some(expiration) = options.expiration {
            config.expiration = expiration;
        }
        if let Some(durability) = options.durability {
            config.durability = durability;
        }
        if let Some(collection) = &options.metadata_collection {
            config.metadata_collection = collection.clone();
        }
        if let Some(hooks) = &options.attempt_hooks {
            config.attempt_hooks = hooks.clone();
        }
        config
    }
}

/// Per-transaction overrides for a single `run` call.
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Overrides the time budget.
    pub expiration: Option<Duration>,
    /// Overrides the durability level.
    pub durability: Option<Durability>,
    /// Overrides the metadata collection.
    pub metadata_collection: Option<CollectionAddress>,
    /// Overrides the attempt test hooks.
    pub attempt_hooks: Option<AttemptHooks>,
}

impl TransactionOptions {
    /// Creates empty overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the time budget.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Overrides the durability level.
    #[must_use]
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = Some(durability);
        self
    }

    /// Overrides the metadata collection.
    #[must_use]
    pub fn with_metadata_collection(mut self, collection: CollectionAddress) -> Self {
        self.metadata_collection = Some(collection);
        self
    }

    /// Overrides the attempt test hooks.
    #[must_use]
    pub fn with_attempt_hooks(mut self, hooks: AttemptHooks) -> Self {
        self.attempt_hooks = Some(hooks);
        self
    }
}

/// Options carried by the single-query transaction path.
#[derive(Debug, Clone, Default)]
pub struct SingleQueryOptions {
    /// Overrides the time budget for the wrapping transaction.
    pub expiration: Option<Duration>,
    /// Overrides the durability level.
    pub durability: Option<Durability>,
    /// Overrides the attempt test hooks.
    pub attempt_hooks: Option<AttemptHooks>,
}

impl SingleQueryOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the time budget.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Overrides the durability level.
    #[must_use]
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = Some(durability);
        self
    }

    /// Overrides the attempt test hooks.
    #[must_use]
    pub fn with_attempt_hooks(mut self, hooks: AttemptHooks) -> Self {
        self.attempt_hooks = Some(hooks);
        self
    }

    pub(crate) fn to_transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            expiration: self.expiration,
            durability: self.durability,
            metadata_collection: None,
            attempt_hooks: self.attempt_hooks.clone(),
        }
    }
}
