//! varhydrate — dependency-ordered concurrent resolution of dashboard
//! variables.
//!
//! A *variable* is a named value source: a remote query whose text may
//! reference other variables, a fixed key/value map, or a constant list.
//! Hydration turns a set of variables into concrete selected values by
//! executing each variable's query only after every variable it depends on
//! has itself been resolved.
//!
//! # Architecture
//!
//! The pipeline is graph builder → cycle invalidator → resolution engine:
//!
//! - [`graph`] builds one node per variable, discovers dependency edges by
//!   scanning query text for `v.<name>` references, extracts the relevant
//!   subgraph for the requested variables, and invalidates any circular
//!   references up front.
//! - [`resolver`] drives the run: leaves resolve first, each parent starts
//!   once all of its children are settled, and every eligible node resolves
//!   concurrently. Per-variable failures become error-valued entries;
//!   cancellation rejects the whole run.
//! - [`fetcher`] is the boundary to the external query transport. The
//!   engine hands it a query plus parameter assignments derived from
//!   already-resolved dependencies and records the returned abort handle so
//!   cancellation reaches in-flight work.
//! - [`variable`] holds the data model: variable definitions and the
//!   resolved [`VariableValues`] they produce.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use varhydrate::{hydrate, HydrateOptions, Variable};
//! # use varhydrate::ValueFetcher;
//! # async fn example(transport: Arc<dyn ValueFetcher>) {
//! let region = Variable::query("region", "region", "regions()", "flux");
//! let host = Variable::query("host", "host", "hosts(region: v.region)", "flux");
//! let all = vec![region, host.clone()];
//!
//! let options = HydrateOptions::new("http://localhost:8086", "my-org", transport);
//! let hydration = hydrate(&[host], &all, options);
//! let canceller = hydration.canceller();
//!
//! let values = hydration.run().await.unwrap();
//! assert!(values.contains_key("region") && values.contains_key("host"));
//! # let _ = canceller;
//! # }
//! ```

pub mod fetcher;
pub mod graph;
pub mod resolver;
pub mod variable;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use fetcher::{
    AbortHandle, FetchError, FetchJob, FetchRequest, ValueFetcher, VariableAssignment,
};
pub use resolver::{
    AssignmentFn, Canceller, HydrateError, HydrateOptions, Hydration, hydrate,
};
pub use variable::{
    ValueSelections, ValueType, Variable, VariableKind, VariableValues, VariableValuesById,
};
