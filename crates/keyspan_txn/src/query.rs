//! Query service seam.
//!
//! Statements issued inside a transaction are routed through a
//! [`QueryService`] with the attempt's context token attached, so the
//! service can stage mutations server-side under the same attempt.
//! Rows stream back through a row callback; the overall outcome is the
//! return value. The engine ships a mock implementation for tests; a
//! real service adapter lives with the cluster integration.

use crate::error::{TxnError, TxnResult};
use crate::types::{AttemptId, TransactionId};
use keyspan_store::DocumentId;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

/// Options for one query statement.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Whether the statement is read-only.
    pub readonly: bool,
    /// Positional parameters.
    pub parameters: Vec<Value>,
    /// Client-chosen context id echoed back in diagnostics.
    pub client_context_id: Option<String>,
}

impl QueryOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the statement read-only.
    #[must_use]
    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Sets positional parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Vec<Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the client context id.
    #[must_use]
    pub fn with_client_context_id(mut self, id: impl Into<String>) -> Self {
        self.client_context_id = Some(id.into());
        self
    }
}

/// The transaction context token attached to a routed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTxnContext {
    /// Owning transaction.
    pub txn_id: TransactionId,
    /// Owning attempt.
    pub attempt_id: AttemptId,
    /// The attempt's atomicity record, for server-side staging.
    pub record_id: DocumentId,
    /// Optional namespace for unqualified collection names.
    pub query_context: Option<String>,
}

/// Metadata about a completed query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMeta {
    /// Client context id echoed by the service.
    pub client_context_id: Option<String>,
}

/// Rows and metadata delivered to the query callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    /// Result rows, in arrival order.
    pub rows: Vec<Value>,
    /// Query metadata.
    pub meta: QueryMeta,
}

/// Executes statements on behalf of transaction attempts.
///
/// Implementations deliver rows one at a time through `on_row` and
/// report the overall outcome in the return value; the engine
/// guarantees the caller's completion callback fires exactly once per
/// statement.
pub trait QueryService: Send + Sync {
    /// Executes a statement within the given transaction context.
    ///
    /// # Errors
    ///
    /// Returns the failure to be delivered to the caller's callback.
    fn execute(
        &self,
        statement: &str,
        options: &QueryOptions,
        txn: &QueryTxnContext,
        on_row: &mut dyn FnMut(Value),
    ) -> TxnResult<QueryMeta>;
}

/// Query service used when none is configured.
pub struct UnsupportedQueryService;

impl QueryService for UnsupportedQueryService {
    fn execute(
        &self,
        _statement: &str,
        _options: &QueryOptions,
        _txn: &QueryTxnContext,
        _on_row: &mut dyn FnMut(Value),
    ) -> TxnResult<QueryMeta> {
        Err(TxnError::illegal_state("no query service configured"))
    }
}

/// A scriptable query service for tests.
///
/// Responses are keyed by statement; executions are recorded with
/// their transaction context for assertions.
#[derive(Default)]
pub struct MockQueryService {
    responses: Mutex<HashMap<String, TxnResult<Vec<Value>>>>,
    executed: Mutex<Vec<(String, QueryTxnContext)>>,
}

impl MockQueryService {
    /// Creates an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts rows for a statement.
    pub fn set_rows(&self, statement: impl Into<String>, rows: Vec<Value>) {
        self.responses.lock().insert(statement.into(), Ok(rows));
    }

    /// Scripts a failure for a statement.
    pub fn set_error(&self, statement: impl Into<String>, error: TxnError) {
        self.responses.lock().insert(statement.into(), Err(error));
    }

    /// Returns the executed statements with their context tokens.
    #[must_use]
    pub fn executed(&self) -> Vec<(String, QueryTxnContext)> {
        self.executed.lock().clone()
    }
}

impl QueryService for MockQueryService {
    fn execute(
        &self,
        statement: &str,
        options: &QueryOptions,
        txn: &QueryTxnContext,
        on_row: &mut dyn FnMut(Value),
    ) -> TxnResult<QueryMeta> {
        self.executed
            .lock()
            .push((statement.to_string(), txn.clone()));
        let scripted = self
            .responses
            .lock()
            .get(statement)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()));
        let rows = scripted?;
        for row in rows {
            on_row(row);
        }
        Ok(QueryMeta {
            client_context_id: options.client_context_id.clone(),
        })
    }
}
