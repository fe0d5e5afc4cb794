//! Run-scoped cancellation: fail fast, abort in-flight fetches.

use std::sync::Arc;
use std::time::Duration;

use varhydrate::test_utils::MockFetcher;
use varhydrate::{HydrateError, HydrateOptions, Variable, hydrate};

use crate::common::{init_tracing, query_var};

/// Wait until the fetcher has seen `count` requests.
async fn wait_for_requests(fetcher: &MockFetcher, count: usize) {
    for _ in 0..200 {
        if fetcher.fetch_order().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("transport never saw {count} requests");
}

#[tokio::test]
async fn cancelling_mid_flight_rejects_the_run() {
    init_tracing();

    let slow = query_var("slow", "slow()");
    let all = vec![slow];

    let fetcher = Arc::new(MockFetcher::new().hold("slow()"));
    let options = HydrateOptions::new("http://localhost:8086", "org", fetcher.clone());

    let hydration = hydrate(&all, &all, options);
    let canceller = hydration.canceller();
    let run = tokio::spawn(hydration.run());

    wait_for_requests(&fetcher, 1).await;
    canceller.cancel();
    assert!(canceller.is_cancelled());

    // Cancelling invoked the in-flight fetch's abort handle.
    assert_eq!(fetcher.aborted(), vec!["slow()".to_string()]);

    let outcome = run.await.unwrap();
    assert!(matches!(outcome, Err(HydrateError::Cancelled)));
}

#[tokio::test]
async fn completed_results_are_discarded_on_cancellation() {
    init_tracing();

    // The constant settles immediately; the held query keeps the run open.
    let done = Variable::constant("done", "done", vec!["x".into()]);
    let slow = query_var("slow", "slow()");
    let all = vec![done, slow];

    let fetcher = Arc::new(MockFetcher::new().hold("slow()"));
    let options = HydrateOptions::new("http://localhost:8086", "org", fetcher.clone());

    let hydration = hydrate(&all, &all, options);
    let canceller = hydration.canceller();
    let run = tokio::spawn(hydration.run());

    wait_for_requests(&fetcher, 1).await;
    canceller.cancel();

    // No partial mapping, no matter how many nodes had already settled.
    assert!(matches!(run.await.unwrap(), Err(HydrateError::Cancelled)));
}

#[tokio::test]
async fn cancellation_stops_dependents_from_starting() {
    init_tracing();

    let region = query_var("region", "regions()");
    let host = query_var("host", "hosts(region: v.region)");
    let all = vec![region, host];

    let fetcher = Arc::new(MockFetcher::new().hold("regions()"));
    let options = HydrateOptions::new("http://localhost:8086", "org", fetcher.clone());

    let hydration = hydrate(&all, &all, options);
    let canceller = hydration.canceller();
    let run = tokio::spawn(hydration.run());

    wait_for_requests(&fetcher, 1).await;
    canceller.cancel();
    assert!(matches!(run.await.unwrap(), Err(HydrateError::Cancelled)));

    // host's fetch never started; region's in-flight fetch was aborted.
    assert_eq!(fetcher.fetch_order(), vec!["regions()".to_string()]);
    assert_eq!(fetcher.aborted(), vec!["regions()".to_string()]);
}

#[tokio::test]
async fn cancelling_before_the_run_starts_rejects_immediately() {
    init_tracing();

    let slow = query_var("slow", "slow()");
    let all = vec![slow];

    let fetcher = Arc::new(MockFetcher::new().hold("slow()"));
    let options = HydrateOptions::new("http://localhost:8086", "org", fetcher);

    let hydration = hydrate(&all, &all, options);
    hydration.canceller().cancel();

    assert!(matches!(hydration.run().await, Err(HydrateError::Cancelled)));
}

#[tokio::test]
async fn cancel_after_completion_is_a_no_op() {
    init_tracing();

    let env = Variable::constant("env", "env", vec!["dev".into()]);
    let all = vec![env];

    let fetcher = Arc::new(MockFetcher::new());
    let options = HydrateOptions::new("http://localhost:8086", "org", fetcher);

    let hydration = hydrate(&all, &all, options);
    let canceller = hydration.canceller();

    let result = hydration.run().await.unwrap();
    assert_eq!(result["env"].selected.as_deref(), Some("dev"));

    canceller.cancel();
    canceller.cancel();
    assert!(canceller.is_cancelled());
}
