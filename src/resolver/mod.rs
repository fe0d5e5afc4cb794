//! Concurrent, dependency-ordered variable resolution.
//!
//! The entry point is [`hydrate`]: given the requested variables and the
//! full universe they live in, it builds the relevant dependency subgraph,
//! invalidates circular references, and resolves every node concurrently,
//! leaves first. A node starts only once all of its children are settled
//! (`Done` or `Error`); siblings carry no relative ordering and may resolve
//! in any order or at the same time.
//!
//! The run either yields a complete mapping from variable id to
//! [`VariableValues`] (individual entries may carry per-variable errors) or
//! fails as a whole with [`HydrateError::Cancelled`]. It never partially
//! returns. Per-node failures are isolated: a failed child does not stop
//! unrelated siblings, and it does not force its ancestors into error; an
//! ancestor still resolves with whatever values its children produced.
//!
//! Cancellation is cooperative and best-effort. [`Canceller::cancel`] stops
//! new nodes from starting, invokes the abort handle of every in-flight
//! fetch, and resolves the run to a cancellation failure; work that already
//! reached the remote endpoint may still run to completion there.

pub mod selection;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use petgraph::graph::NodeIndex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::fetcher::{FetchError, FetchRequest, ValueFetcher, VariableAssignment};
use crate::graph::VariableGraph;
use crate::variable::{
    ValueSelections, Variable, VariableKind, VariableValues, VariableValuesById,
};
use selection::select_value;

/// Run-scoped failure of an entire hydration.
///
/// Per-variable failures never surface here; they become error-valued
/// entries in the result mapping. Cancellation is the only condition that
/// rejects the whole run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HydrateError {
    /// The run was cancelled before every variable settled. Partial
    /// per-variable results are discarded.
    #[error("variable hydration was cancelled")]
    Cancelled,
}

/// Converts one resolved variable into a query parameter assignment, or
/// `None` when the variable contributes no assignment (e.g. it failed).
pub type AssignmentFn =
    Arc<dyn Fn(&Variable, &VariableValues) -> Option<VariableAssignment> + Send + Sync>;

/// The default assignment conversion: the variable's selected value under
/// its own name. Errored or empty variables contribute nothing.
pub fn default_assignment(
    variable: &Variable,
    values: &VariableValues,
) -> Option<VariableAssignment> {
    let value = values.selected.clone()?;
    Some(VariableAssignment {
        name: variable.name.clone(),
        value,
    })
}

/// Configuration for one hydration run.
pub struct HydrateOptions {
    /// Query endpoint URL, passed through to the fetch transport.
    pub url: String,
    /// Organization scope for issued queries.
    pub org_id: String,
    /// The caller's prior selections by variable id.
    pub selections: ValueSelections,
    /// The query execution transport.
    pub fetcher: Arc<dyn ValueFetcher>,
    /// Conversion from a resolved variable to a query parameter assignment.
    pub to_assignment: AssignmentFn,
}

impl HydrateOptions {
    /// Options with no prior selections and the default assignment
    /// conversion.
    pub fn new(
        url: impl Into<String>,
        org_id: impl Into<String>,
        fetcher: Arc<dyn ValueFetcher>,
    ) -> Self {
        Self {
            url: url.into(),
            org_id: org_id.into(),
            selections: ValueSelections::new(),
            fetcher,
            to_assignment: Arc::new(default_assignment),
        }
    }

    /// Set the caller's prior selections.
    #[must_use]
    pub fn with_selections(mut self, selections: ValueSelections) -> Self {
        self.selections = selections;
        self
    }

    /// Override the assignment conversion.
    #[must_use]
    pub fn with_assignment_fn(mut self, to_assignment: AssignmentFn) -> Self {
        self.to_assignment = to_assignment;
        self
    }
}

#[derive(Debug)]
struct CancelState {
    tx: watch::Sender<bool>,
}

/// Handle for cancelling an in-progress hydration run.
///
/// Cloneable; all clones refer to the same run. Cancelling after the run
/// has completed is a no-op.
#[derive(Clone)]
pub struct Canceller {
    graph: Arc<VariableGraph>,
    state: Arc<CancelState>,
}

impl Canceller {
    /// Cancel the run: no new variable resolution starts, every in-flight
    /// fetch's abort handle is invoked, and the run resolves to
    /// [`HydrateError::Cancelled`].
    pub fn cancel(&self) {
        if self.state.tx.send_replace(true) {
            return;
        }
        debug!("cancelling variable hydration");
        self.graph.abort_all();
    }

    /// Whether the run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.state.tx.borrow()
    }
}

/// An in-progress hydration run: the eventual result plus its cancellation
/// handle.
pub struct Hydration {
    canceller: Canceller,
    result: BoxFuture<'static, Result<VariableValuesById, HydrateError>>,
}

impl Hydration {
    /// A handle for cancelling this run, usable from any task.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Drive the run to completion: a full id-to-values mapping, or
    /// [`HydrateError::Cancelled`].
    pub async fn run(self) -> Result<VariableValuesById, HydrateError> {
        self.result.await
    }
}

/// Resolve `variables` (a subset of `all_variables`) into concrete values.
///
/// Builds a fresh dependency graph over the relevant subgraph (the
/// requested variables plus the dependencies their queries reference),
/// invalidates circular references, and resolves every node in dependency
/// order. Nothing executes until the returned [`Hydration`] is run.
pub fn hydrate(
    variables: &[Variable],
    all_variables: &[Variable],
    options: HydrateOptions,
) -> Hydration {
    let graph = Arc::new(VariableGraph::build(variables, all_variables));
    graph.invalidate_cycles();

    let (tx, rx) = watch::channel(false);
    let canceller = Canceller {
        graph: Arc::clone(&graph),
        state: Arc::new(CancelState { tx }),
    };

    let result = run(graph, Arc::new(options), canceller.clone(), rx).boxed();
    Hydration { canceller, result }
}

async fn run(
    graph: Arc<VariableGraph>,
    options: Arc<HydrateOptions>,
    canceller: Canceller,
    mut cancelled: watch::Receiver<bool>,
) -> Result<VariableValuesById, HydrateError> {
    graph.init_pending();

    let mut in_flight = FuturesUnordered::new();
    for index in graph.initial_frontier() {
        if !canceller.is_cancelled() && graph.claim(index) {
            in_flight.push(resolve_node(Arc::clone(&graph), index, Arc::clone(&options)));
        }
    }
    debug!(nodes = graph.len(), frontier = in_flight.len(), "starting variable hydration");

    loop {
        if canceller.is_cancelled() {
            return Err(HydrateError::Cancelled);
        }
        tokio::select! {
            _ = cancelled.changed() => {
                return Err(HydrateError::Cancelled);
            }
            settled = in_flight.next() => {
                let Some(index) = settled else { break };
                for parent in graph.parents(index).collect::<Vec<_>>() {
                    // The completion that settles the last child opens the
                    // convergence gate; claim keeps execution at-most-once.
                    if graph.child_settled(parent)
                        && !canceller.is_cancelled()
                        && graph.claim(parent)
                    {
                        in_flight.push(resolve_node(
                            Arc::clone(&graph),
                            parent,
                            Arc::clone(&options),
                        ));
                    }
                }
            }
        }
    }

    if canceller.is_cancelled() {
        return Err(HydrateError::Cancelled);
    }
    debug!(nodes = graph.len(), "variable hydration complete");
    Ok(graph.collect_values())
}

enum ResolveFailure {
    /// The run is being torn down; record nothing on the node.
    Cancelled,
    /// This node's resolution failed on its own.
    Failed(String),
}

/// Resolve one node whose children are all settled, then publish the
/// outcome on the node. Always returns the node's index so the engine can
/// notify its parents.
async fn resolve_node(
    graph: Arc<VariableGraph>,
    index: NodeIndex,
    options: Arc<HydrateOptions>,
) -> NodeIndex {
    let name = graph.node(index).variable.name.clone();
    trace!(variable = %name, "resolving variable");

    match resolve_values(&graph, index, &options).await {
        Ok(values) => graph.settle_done(index, values),
        Err(ResolveFailure::Failed(message)) => {
            debug!(variable = %name, error = %message, "variable resolution failed");
            graph.settle_error(index, message);
        }
        Err(ResolveFailure::Cancelled) => {
            trace!(variable = %name, "fetch aborted during cancellation");
        }
    }

    index
}

/// Compute one node's values: local selection for map and constant
/// variables, a transport fetch for query variables.
async fn resolve_values(
    graph: &VariableGraph,
    index: NodeIndex,
    options: &HydrateOptions,
) -> Result<VariableValues, ResolveFailure> {
    let variable = &graph.node(index).variable;
    let prev_selection = options.selections.get(&variable.id).map(String::as_str);
    let default_selection = variable.default_selection();

    match &variable.kind {
        VariableKind::Map(entries) => {
            let keys: Vec<&str> = entries.iter().map(|(key, _)| key.as_str()).collect();
            let selected = select_value(&keys, prev_selection, default_selection)
                .and_then(|key| entries.iter().find(|(entry_key, _)| entry_key == key))
                .map(|(_, value)| value.clone());
            let values = entries.iter().map(|(_, value)| value.clone()).collect();
            Ok(VariableValues::resolved(values, selected))
        }
        VariableKind::Constant(candidates) => {
            let available: Vec<&str> = candidates.iter().map(String::as_str).collect();
            let selected =
                select_value(&available, prev_selection, default_selection).map(str::to_owned);
            Ok(VariableValues::resolved(candidates.clone(), selected))
        }
        VariableKind::Query { query, language } => {
            let request = FetchRequest {
                url: options.url.clone(),
                org_id: options.org_id.clone(),
                query: query.clone(),
                language: language.clone(),
                assignments: collect_assignments(graph, index, options),
                prev_selection: prev_selection.map(str::to_owned),
                default_selection: default_selection.map(str::to_owned),
            };

            let job = options.fetcher.fetch(request);
            // Recorded before the await so a concurrent cancellation can
            // reach this fetch.
            graph.set_abort(index, job.abort.clone());

            job.values.await.map_err(|error| match error {
                FetchError::Cancelled => ResolveFailure::Cancelled,
                FetchError::Failed(source) => ResolveFailure::Failed(source.to_string()),
            })
        }
    }
}

/// Assignments for every variable in `index`'s transitive child closure.
/// All descendants are settled by the time a node resolves; errored ones
/// are skipped by the conversion. Sorted by name so fetch requests are
/// deterministic.
fn collect_assignments(
    graph: &VariableGraph,
    index: NodeIndex,
    options: &HydrateOptions,
) -> Vec<VariableAssignment> {
    let mut assignments: Vec<VariableAssignment> = graph
        .descendants(index)
        .into_iter()
        .filter_map(|descendant| {
            let node = graph.node(descendant);
            let values = node.values()?;
            (options.to_assignment)(&node.variable, &values)
        })
        .collect();
    assignments.sort_by(|a, b| a.name.cmp(&b.name));
    assignments
}
