//! Variable dependency graph construction and cycle invalidation.
//!
//! This module builds a directed graph over a universe of variables: a node
//! per variable, with an edge from each query-backed variable to every
//! variable its query text references. The graph is then filtered down to
//! the relevant subgraph for the requested variables, and any circular
//! references are invalidated before resolution starts.
//!
//! Edge direction follows the dependency: an edge `A -> B` means `A`'s query
//! references `B`, so `B` must resolve before `A`. `A` is a parent of `B`;
//! `B` is a child of `A`.
//!
//! Node state (status, resolved values, abort handle) lives behind a per-node
//! mutex. The graph's structure is immutable after construction; only the
//! resolution engine writes node state, and it publishes values before the
//! status transition that unblocks readers, so fan-in reads are safe.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

use crate::fetcher::AbortHandle;
use crate::variable::{Variable, VariableKind, VariableValues};

/// Namespace under which query text references other variables, as in
/// `v.bucket`.
const OPTION_NAMESPACE: &str = "v";

/// Resolution status of one node.
///
/// Transitions are monotonic: `NotStarted -> Loading -> {Done, Error}`, with
/// one exception - cycle invalidation moves a node from `NotStarted`
/// straight to `Error` before resolution begins. A node reaches each state
/// at most once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    NotStarted,
    Loading,
    Done,
    Error,
}

#[derive(Debug)]
struct NodeState {
    status: NodeStatus,
    values: Option<VariableValues>,
    abort: Option<AbortHandle>,
}

/// One variable's per-run graph state.
#[derive(Debug)]
pub struct VariableNode {
    /// The underlying variable definition.
    pub variable: Variable,
    state: Mutex<NodeState>,
    /// Countdown of unsettled children; the completion that brings this to
    /// zero makes the node eligible to start.
    pending: AtomicUsize,
}

impl VariableNode {
    fn new(variable: Variable) -> Self {
        Self {
            variable,
            state: Mutex::new(NodeState {
                status: NodeStatus::NotStarted,
                values: None,
                abort: None,
            }),
            pending: AtomicUsize::new(0),
        }
    }

    // A poisoned lock only means a resolver task panicked mid-update; the
    // state itself is still a valid snapshot.
    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current resolution status.
    pub fn status(&self) -> NodeStatus {
        self.state().status
    }

    /// Resolved values, once the node is terminal.
    pub fn values(&self) -> Option<VariableValues> {
        self.state().values.clone()
    }
}

/// The relevant dependency subgraph for one hydration run.
pub struct VariableGraph {
    graph: DiGraph<VariableNode, ()>,
    ids: HashMap<String, NodeIndex>,
    /// Set once the run is being torn down; aborts recorded after the sweep
    /// in [`VariableGraph::abort_all`] are invoked immediately.
    aborting: AtomicBool,
}

impl VariableGraph {
    /// Build the relevant subgraph for `variables` out of `all_variables`.
    ///
    /// Every variable in the universe gets a candidate node; edges are
    /// discovered by scanning each query-backed variable's source text for
    /// `v.<name>` references to every other variable. The candidate set is
    /// then filtered: a node survives iff its variable was requested, or at
    /// least one of its direct parents was requested. Edges touching dropped
    /// nodes are pruned.
    pub fn build(variables: &[Variable], all_variables: &[Variable]) -> Self {
        // One compiled pattern per variable name, shared across every scan.
        let patterns: Vec<Option<Regex>> = all_variables
            .iter()
            .map(|variable| reference_pattern(&variable.name))
            .collect();

        // Edge discovery over the full universe, by candidate position.
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (parent, variable) in all_variables.iter().enumerate() {
            let VariableKind::Query { query, .. } = &variable.kind else {
                continue;
            };
            for (child, pattern) in patterns.iter().enumerate() {
                if parent != child
                    && pattern.as_ref().is_some_and(|pattern| pattern.is_match(query))
                {
                    edges.push((parent, child));
                }
            }
        }

        let requested: HashSet<&str> = variables.iter().map(|v| v.id.as_str()).collect();

        // One-hop-upward inclusion: requested variables, plus every direct
        // child of a requested variable. Children of children are pulled in
        // by the same rule applied to their own requested ancestors.
        let mut keep: Vec<bool> = all_variables
            .iter()
            .map(|v| requested.contains(v.id.as_str()))
            .collect();
        for &(parent, child) in &edges {
            if requested.contains(all_variables[parent].id.as_str()) {
                keep[child] = true;
            }
        }

        let mut graph = DiGraph::new();
        let mut ids = HashMap::new();
        let mut indices: Vec<Option<NodeIndex>> = vec![None; all_variables.len()];
        for (position, variable) in all_variables.iter().enumerate() {
            if keep[position] {
                let index = graph.add_node(VariableNode::new(variable.clone()));
                ids.insert(variable.id.clone(), index);
                indices[position] = Some(index);
            }
        }
        for (parent, child) in edges {
            if let (Some(parent), Some(child)) = (indices[parent], indices[child])
                && !graph.contains_edge(parent, child)
            {
                graph.add_edge(parent, child, ());
            }
        }

        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            requested = requested.len(),
            "built variable graph"
        );

        Self {
            graph,
            ids,
            aborting: AtomicBool::new(false),
        }
    }

    /// Number of nodes in the relevant subgraph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the relevant subgraph is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Look up a node by variable identifier.
    pub fn get(&self, id: &str) -> Option<NodeIndex> {
        self.ids.get(id).copied()
    }

    /// The node at `index`.
    pub fn node(&self, index: NodeIndex) -> &VariableNode {
        &self.graph[index]
    }

    /// All node indices.
    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Direct dependencies of `index` (variables its query references).
    pub fn children(&self, index: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(index, Direction::Outgoing)
    }

    /// Direct dependents of `index` (variables whose queries reference it).
    pub fn parents(&self, index: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(index, Direction::Incoming)
    }

    /// The full transitive child closure of `index`, excluding the node
    /// itself. Breadth-first, each node visited once.
    pub fn descendants(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([index]);
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            for child in self.children(current) {
                if seen.insert(child) {
                    result.push(child);
                    queue.push_back(child);
                }
            }
        }

        result
    }

    /// Mark every node participating in a circular reference as `Error`.
    ///
    /// Depth-first traversal with White/Gray/Black coloring; hitting a Gray
    /// node identifies a cycle consisting of the current path segment from
    /// that node's first occurrence onward, and every node on the segment is
    /// invalidated. Must run to completion before resolution begins; an
    /// invalidated node never leaves `Error`.
    pub fn invalidate_cycles(&self) {
        let mut colors: HashMap<NodeIndex, Color> =
            self.indices().map(|index| (index, Color::White)).collect();
        let mut path: Vec<NodeIndex> = Vec::new();

        for index in self.indices() {
            if colors.get(&index) == Some(&Color::White) {
                self.dfs_invalidate(index, &mut colors, &mut path);
            }
        }
    }

    fn dfs_invalidate(
        &self,
        index: NodeIndex,
        colors: &mut HashMap<NodeIndex, Color>,
        path: &mut Vec<NodeIndex>,
    ) {
        colors.insert(index, Color::Gray);
        path.push(index);

        for child in self.children(index) {
            match colors.get(&child) {
                Some(Color::Gray) => {
                    // The path segment from the child's first occurrence to
                    // the current node closes a cycle; every member is out.
                    if let Some(start) = path.iter().position(|on_path| *on_path == child) {
                        for &member in &path[start..] {
                            self.invalidate(member);
                        }
                    }
                }
                Some(Color::White) => self.dfs_invalidate(child, colors, path),
                _ => {}
            }
        }

        path.pop();
        colors.insert(index, Color::Black);
    }

    fn invalidate(&self, index: NodeIndex) {
        let node = self.node(index);
        let mut state = node.state();
        if state.status == NodeStatus::Error {
            return;
        }
        warn!(
            variable = %node.variable.name,
            "variable is part of a circular dependency"
        );
        state.values = Some(VariableValues::errored(format!(
            "variable \"{}\" is part of a circular dependency",
            node.variable.name
        )));
        state.status = NodeStatus::Error;
    }

    /// Initialize every node's pending-children countdown, excluding
    /// children already terminal (cycle-invalidated). Called once, after
    /// invalidation and before resolution.
    pub fn init_pending(&self) {
        for index in self.indices() {
            let unsettled = self
                .children(index)
                .filter(|child| !matches!(self.node(*child).status(), NodeStatus::Done | NodeStatus::Error))
                .count();
            self.node(index).pending.store(unsettled, Ordering::Release);
        }
    }

    /// Nodes eligible to start immediately: not yet started, with no
    /// unsettled children. Graph leaves, plus nodes whose children were all
    /// invalidated.
    pub fn initial_frontier(&self) -> Vec<NodeIndex> {
        self.indices()
            .filter(|&index| {
                let node = self.node(index);
                node.status() == NodeStatus::NotStarted
                    && node.pending.load(Ordering::Acquire) == 0
            })
            .collect()
    }

    /// Decrement `index`'s pending-children countdown for one settled child.
    /// Returns true iff this was the last unsettled child.
    pub fn child_settled(&self, index: NodeIndex) -> bool {
        self.node(index).pending.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Try to move `index` from `NotStarted` to `Loading`. Returns false if
    /// the node already started, settled, or was invalidated; each node is
    /// claimed at most once per run.
    pub fn claim(&self, index: NodeIndex) -> bool {
        let mut state = self.node(index).state();
        if state.status == NodeStatus::NotStarted {
            state.status = NodeStatus::Loading;
            true
        } else {
            false
        }
    }

    /// Record a successful resolution: publish `values`, then move to `Done`.
    pub fn settle_done(&self, index: NodeIndex, values: VariableValues) {
        let node = self.node(index);
        let mut state = node.state();
        if state.status == NodeStatus::Error {
            return;
        }
        trace!(variable = %node.variable.name, "variable resolved");
        state.values = Some(values);
        state.abort = None;
        state.status = NodeStatus::Done;
    }

    /// Record a failed resolution: publish an error value, then move to
    /// `Error`.
    pub fn settle_error(&self, index: NodeIndex, message: impl Into<String>) {
        let node = self.node(index);
        let mut state = node.state();
        if state.status == NodeStatus::Error {
            return;
        }
        state.values = Some(VariableValues::errored(message));
        state.abort = None;
        state.status = NodeStatus::Error;
    }

    /// Record the abort handle for `index`'s in-flight fetch. If the run is
    /// already tearing down the handle is invoked on the spot, closing the
    /// race with [`VariableGraph::abort_all`].
    pub fn set_abort(&self, index: NodeIndex, abort: AbortHandle) {
        let node = self.node(index);
        {
            let mut state = node.state();
            state.abort = Some(abort.clone());
        }
        if self.aborting.load(Ordering::Acquire) {
            abort.abort();
        }
    }

    /// Invoke every node's recorded abort handle. Nodes without one are
    /// skipped; handles recorded afterwards fire immediately via
    /// [`VariableGraph::set_abort`].
    pub fn abort_all(&self) {
        self.aborting.store(true, Ordering::Release);
        for index in self.indices() {
            let abort = self.node(index).state().abort.take();
            if let Some(abort) = abort {
                abort.abort();
            }
        }
    }

    /// Snapshot every node's values into the run's aggregate result. Nodes
    /// somehow left without values yield a generic failure entry.
    pub fn collect_values(&self) -> HashMap<String, VariableValues> {
        self.indices()
            .map(|index| {
                let node = self.node(index);
                let values = node.values().unwrap_or_else(|| {
                    VariableValues::errored(format!(
                        "failed to load values for variable \"{}\"",
                        node.variable.name
                    ))
                });
                (node.variable.id.clone(), values)
            })
            .collect()
    }
}

/// Color states for cycle detection using DFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Node has not been visited.
    White,
    /// Node is currently being visited (in the DFS stack).
    Gray,
    /// Node has been fully visited.
    Black,
}

/// Pattern matching references to the variable `name` through the option
/// namespace, e.g. `v.bucket` for a variable named `bucket`.
fn reference_pattern(name: &str) -> Option<Regex> {
    let pattern = format!(r"\b{}\.{}\b", OPTION_NAMESPACE, regex::escape(name));
    Regex::new(&pattern).ok()
}
