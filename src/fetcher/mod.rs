//! External query transport interface.
//!
//! The hydration engine never executes queries itself. Query-backed
//! variables are resolved through a [`ValueFetcher`], the collaborator that
//! issues a request against a remote endpoint and parses the tabular
//! response into a [`VariableValues`].
//!
//! A fetch is handed back as a [`FetchJob`]: the future producing the
//! result, paired with an [`AbortHandle`] the engine records on the node so
//! a run-wide cancellation can reach in-flight work. Cancellation of a fetch
//! is reported as [`FetchError::Cancelled`], distinct from an ordinary
//! [`FetchError::Failed`], so teardown never records spurious per-node
//! errors.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::variable::VariableValues;

/// Failure modes of the query transport.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The fetch was aborted before producing a result.
    #[error("query fetch was cancelled")]
    Cancelled,

    /// The transport failed to produce values.
    #[error("query fetch failed: {0}")]
    Failed(#[from] anyhow::Error),
}

/// A query parameter assignment derived from a resolved variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableAssignment {
    /// Variable name as referenced in query text.
    pub name: String,
    /// The variable's selected value.
    pub value: String,
}

/// Everything the transport needs to execute one variable's query.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Query endpoint URL.
    pub url: String,
    /// Organization scope for the query.
    pub org_id: String,
    /// Free-text query source.
    pub query: String,
    /// Query language tag (e.g. `flux`).
    pub language: String,
    /// Assignments for every resolved variable the query may reference.
    pub assignments: Vec<VariableAssignment>,
    /// The caller's prior selection for this variable, if any.
    pub prev_selection: Option<String>,
    /// The variable's own default selection, if any.
    pub default_selection: Option<String>,
}

/// Handle for aborting an in-flight fetch. Cloneable and callable more than
/// once; extra calls are no-ops by the transport's contract.
#[derive(Clone)]
pub struct AbortHandle(Arc<dyn Fn() + Send + Sync>);

impl AbortHandle {
    /// Wrap an abort callback.
    pub fn new(abort: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(abort))
    }

    /// A handle that aborts nothing, for transports with nothing to cancel.
    pub fn noop() -> Self {
        Self(Arc::new(|| {}))
    }

    /// Ask the transport to abort the fetch. Best-effort: the underlying
    /// work may still run to completion remotely.
    pub fn abort(&self) {
        (self.0)();
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AbortHandle")
    }
}

/// An issued fetch: its eventual result and the handle to abort it.
pub struct FetchJob {
    /// Invoked by the engine when the run is cancelled.
    pub abort: AbortHandle,
    /// Resolves to the variable's values or a [`FetchError`].
    pub values: BoxFuture<'static, Result<VariableValues, FetchError>>,
}

/// The query execution transport consumed by the hydration engine.
///
/// Implementations must be shareable across concurrently resolving nodes;
/// the engine issues one `fetch` per query-backed variable, each potentially
/// from a different task.
pub trait ValueFetcher: Send + Sync {
    /// Issue one variable's query. Must return promptly; the work happens
    /// when the returned job's future is awaited.
    fn fetch(&self, request: FetchRequest) -> FetchJob;
}
