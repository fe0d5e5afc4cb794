//! Test doubles for the query transport.
//!
//! Available to unit tests and, behind the `test-utils` feature, to the
//! integration test suites.

use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::fetcher::{AbortHandle, FetchError, FetchJob, FetchRequest, ValueFetcher};
use crate::variable::VariableValues;

#[derive(Debug, Clone)]
enum Outcome {
    Values(VariableValues),
    Failure(String),
    /// Never completes until aborted; for exercising cancellation races.
    Hold,
}

/// A [`ValueFetcher`] serving canned responses keyed by query text.
///
/// Records every request it receives, in arrival order, so tests can assert
/// on fetch ordering and on the parameter assignments a query was given.
/// Queries with no canned response fail, keeping tests explicit about what
/// they expect to be fetched.
#[derive(Debug, Default)]
pub struct MockFetcher {
    outcomes: Mutex<HashMap<String, Outcome>>,
    requests: Mutex<Vec<FetchRequest>>,
    aborts: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `values` for any request whose query text equals `query`.
    #[must_use]
    pub fn respond(self, query: impl Into<String>, values: VariableValues) -> Self {
        self.outcomes_mut().insert(query.into(), Outcome::Values(values));
        self
    }

    /// Serve a one-value response, selected, for `query`.
    #[must_use]
    pub fn respond_value(self, query: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        let values = VariableValues::resolved(vec![value.clone()], Some(value));
        self.respond(query, values)
    }

    /// Fail `query` with `message`.
    #[must_use]
    pub fn fail(self, query: impl Into<String>, message: impl Into<String>) -> Self {
        self.outcomes_mut().insert(query.into(), Outcome::Failure(message.into()));
        self
    }

    /// Never complete `query` until its abort handle is invoked.
    #[must_use]
    pub fn hold(self, query: impl Into<String>) -> Self {
        self.outcomes_mut().insert(query.into(), Outcome::Hold);
        self
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The query texts of received requests, in arrival order.
    pub fn fetch_order(&self) -> Vec<String> {
        self.requests().into_iter().map(|request| request.query).collect()
    }

    /// The query texts whose abort handles were invoked, in invocation
    /// order.
    pub fn aborted(&self) -> Vec<String> {
        self.aborts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn outcomes_mut(&self) -> MutexGuard<'_, HashMap<String, Outcome>> {
        self.outcomes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ValueFetcher for MockFetcher {
    fn fetch(&self, request: FetchRequest) -> FetchJob {
        let outcome = self
            .outcomes_mut()
            .get(&request.query)
            .cloned()
            .unwrap_or_else(|| {
                Outcome::Failure(format!("no canned response for query: {}", request.query))
            });
        let query = request.query.clone();
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request);

        // notify_one stores a permit, so an abort that lands before the
        // future is first polled is still observed.
        let aborted = Arc::new(Notify::new());
        let abort = {
            let aborted = Arc::clone(&aborted);
            let aborts = Arc::clone(&self.aborts);
            AbortHandle::new(move || {
                aborts.lock().unwrap_or_else(PoisonError::into_inner).push(query.clone());
                aborted.notify_one();
            })
        };

        let values = async move {
            match outcome {
                Outcome::Values(values) => Ok(values),
                Outcome::Failure(message) => Err(FetchError::Failed(anyhow::anyhow!(message))),
                Outcome::Hold => {
                    aborted.notified().await;
                    Err(FetchError::Cancelled)
                }
            }
        }
        .boxed();

        FetchJob { abort, values }
    }
}
