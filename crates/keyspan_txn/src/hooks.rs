//! Test hook injection points for the attempt and cleanup state machines.
//!
//! A hook returning `Err` injects that store failure at its point in
//! the protocol, exactly as if the store itself had failed there. This
//! is how tests exercise crash/partial-failure paths (e.g. abandoning
//! an attempt after the commit point so the cleanup subsystem must
//! finish it).

use keyspan_store::{DocumentId, StoreError};
use std::fmt;
use std::sync::Arc;

/// A hook fired at a protocol point with no document in scope.
pub type Hook = Arc<dyn Fn() -> Result<(), StoreError> + Send + Sync>;

/// A hook fired for a specific document.
pub type DocHook = Arc<dyn Fn(&DocumentId) -> Result<(), StoreError> + Send + Sync>;

/// Injection points in the attempt state machine.
#[derive(Clone, Default)]
pub struct AttemptHooks {
    /// Before the commit-point write of the atomicity record.
    pub before_record_commit: Option<Hook>,
    /// After a document mutation has been staged.
    pub after_staging: Option<DocHook>,
    /// Before a staged document is unstaged during commit.
    pub before_doc_unstaged: Option<DocHook>,
    /// Before a staged document is reverted during rollback.
    pub before_doc_rolled_back: Option<DocHook>,
}

impl AttemptHooks {
    /// Creates hooks with no injection points set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hook fired before the commit-point record write.
    #[must_use]
    pub fn with_before_record_commit(
        mut self,
        hook: impl Fn() -> Result<(), StoreError> + Send + Sync + 'static,
    ) -> Self {
        self.before_record_commit = Some(Arc::new(hook));
        self
    }

    /// Sets the hook fired after each staged mutation.
    #[must_use]
    pub fn with_after_staging(
        mut self,
        hook: impl Fn(&DocumentId) -> Result<(), StoreError> + Send + Sync + 'static,
    ) -> Self {
        self.after_staging = Some(Arc::new(hook));
        self
    }

    /// Sets the hook fired before each document unstage.
    #[must_use]
    pub fn with_before_doc_unstaged(
        mut self,
        hook: impl Fn(&DocumentId) -> Result<(), StoreError> + Send + Sync + 'static,
    ) -> Self {
        self.before_doc_unstaged = Some(Arc::new(hook));
        self
    }

    /// Sets the hook fired before each document rollback.
    #[must_use]
    pub fn with_before_doc_rolled_back(
        mut self,
        hook: impl Fn(&DocumentId) -> Result<(), StoreError> + Send + Sync + 'static,
    ) -> Self {
        self.before_doc_rolled_back = Some(Arc::new(hook));
        self
    }

    pub(crate) fn fire(hook: &Option<Hook>) -> Result<(), StoreError> {
        match hook {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }

    pub(crate) fn fire_doc(hook: &Option<DocHook>, id: &DocumentId) -> Result<(), StoreError> {
        match hook {
            Some(hook) => hook(id),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for AttemptHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttemptHooks")
            .field("before_record_commit", &self.before_record_commit.is_some())
            .field("after_staging", &self.after_staging.is_some())
            .field("before_doc_unstaged", &self.before_doc_unstaged.is_some())
            .field(
                "before_doc_rolled_back",
                &self.before_doc_rolled_back.is_some(),
            )
            .finish()
    }
}

/// Injection points in the cleanup state machine.
#[derive(Clone, Default)]
pub struct CleanupHooks {
    /// Before a scanned atomicity record is processed.
    pub before_record_cleanup: Option<DocHook>,
    /// Before cleanup unstages or reverts a staged document.
    pub before_doc_cleanup: Option<DocHook>,
}

impl CleanupHooks {
    /// Creates hooks with no injection points set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hook fired before each record is processed.
    #[must_use]
    pub fn with_before_record_cleanup(
        mut self,
        hook: impl Fn(&DocumentId) -> Result<(), StoreError> + Send + Sync + 'static,
    ) -> Self {
        self.before_record_cleanup = Some(Arc::new(hook));
        self
    }

    /// Sets the hook fired before each document cleanup action.
    #[must_use]
    pub fn with_before_doc_cleanup(
        mut self,
        hook: impl Fn(&DocumentId) -> Result<(), StoreError> + Send + Sync + 'static,
    ) -> Self {
        self.before_doc_cleanup = Some(Arc::new(hook));
        self
    }

    pub(crate) fn fire_doc(hook: &Option<DocHook>, id: &DocumentId) -> Result<(), StoreError> {
        match hook {
            Some(hook) => hook(id),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for CleanupHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupHooks")
            .field(
                "before_record_cleanup",
                &self.before_record_cleanup.is_some(),
            )
            .field("before_doc_cleanup", &self.before_doc_cleanup.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn unset_hooks_are_no_ops() {
        let hooks = AttemptHooks::new();
        assert!(AttemptHooks::fire(&hooks.before_record_commit).is_ok());
        let id = DocumentId::new("b", "s", "c", "k");
        assert!(AttemptHooks::fire_doc(&hooks.after_staging, &id).is_ok());
    }

    #[test]
    fn hook_errors_propagate() {
        let hooks =
            AttemptHooks::new().with_before_record_commit(|| Err(StoreError::transient("boom")));
        assert_eq!(
            AttemptHooks::fire(&hooks.before_record_commit),
            Err(StoreError::transient("boom"))
        );
    }

    #[test]
    fn doc_hooks_see_the_document() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let hooks = CleanupHooks::new().with_before_doc_cleanup(move |id| {
            assert_eq!(id.key, "k");
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let id = DocumentId::new("b", "s", "c", "k");
        CleanupHooks::fire_doc(&hooks.before_doc_cleanup, &id).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
