//! Dependency-ordered resolution of acyclic variable graphs.

use std::sync::Arc;

use varhydrate::test_utils::MockFetcher;
use varhydrate::{HydrateOptions, Variable, VariableValues, hydrate};

use crate::common::{init_tracing, query_var};

#[tokio::test]
async fn requesting_a_variable_resolves_its_dependencies_first() {
    init_tracing();

    let region = query_var("region", "regions()");
    let host = query_var("host", "hosts(region: v.region)");
    let all = vec![region, host.clone()];

    let fetcher = Arc::new(
        MockFetcher::new()
            .respond_value("regions()", "us-east-1")
            .respond_value("hosts(region: v.region)", "host-a"),
    );
    let options = HydrateOptions::new("http://localhost:8086", "org", fetcher.clone());

    let result = hydrate(std::slice::from_ref(&host), &all, options).run().await.unwrap();

    // Requesting [host] pulls region in as its dependency.
    assert_eq!(result.len(), 2);
    assert_eq!(result["region"].selected.as_deref(), Some("us-east-1"));
    assert_eq!(result["host"].selected.as_deref(), Some("host-a"));

    // region's fetch must complete before host's is even issued, and host's
    // request carries region's resolved value as a parameter assignment.
    assert_eq!(
        fetcher.fetch_order(),
        vec!["regions()".to_string(), "hosts(region: v.region)".to_string()]
    );
    let host_request = &fetcher.requests()[1];
    assert_eq!(host_request.assignments.len(), 1);
    assert_eq!(host_request.assignments[0].name, "region");
    assert_eq!(host_request.assignments[0].value, "us-east-1");
}

#[tokio::test]
async fn diamond_parent_starts_only_after_both_children_and_runs_once() {
    init_tracing();

    // top -> left, top -> right; left and right are independent leaves.
    let left = query_var("left", "left()");
    let right = query_var("right", "right()");
    let top = query_var("top", "join(v.left, v.right)");
    let all = vec![left, right, top.clone()];

    let fetcher = Arc::new(
        MockFetcher::new()
            .respond_value("left()", "l")
            .respond_value("right()", "r")
            .respond_value("join(v.left, v.right)", "joined"),
    );
    let options = HydrateOptions::new("http://localhost:8086", "org", fetcher.clone());

    let result = hydrate(std::slice::from_ref(&top), &all, options).run().await.unwrap();
    assert_eq!(result["top"].selected.as_deref(), Some("joined"));

    let order = fetcher.fetch_order();
    assert_eq!(order.len(), 3, "each variable is fetched exactly once");
    assert_eq!(order[2], "join(v.left, v.right)", "parent goes last");

    let top_request = &fetcher.requests()[2];
    let names: Vec<&str> =
        top_request.assignments.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["left", "right"]);
}

#[tokio::test]
async fn mixed_kind_graph_reaches_a_terminal_state_for_every_node() {
    init_tracing();

    let bucket = Variable::constant("bucket", "bucket", vec!["telegraf".into(), "system".into()]);
    let region = Variable::map(
        "region",
        "region",
        vec![
            ("east".to_string(), "us-east-1".to_string()),
            ("west".to_string(), "us-west-2".to_string()),
        ],
    );
    let host = query_var("host", "hosts(bucket: v.bucket, region: v.region)");
    let all = vec![bucket, region, host];

    let fetcher = Arc::new(
        MockFetcher::new().respond_value("hosts(bucket: v.bucket, region: v.region)", "host-a"),
    );
    let options = HydrateOptions::new("http://localhost:8086", "org", fetcher.clone());

    let result = hydrate(&all, &all, options).run().await.unwrap();

    assert_eq!(result.len(), 3);
    for values in result.values() {
        assert!(values.error.is_none());
        assert!(values.values.is_some());
    }

    // Local-selection kinds feed the query as assignments too.
    let host_request = &fetcher.requests()[0];
    let mut assigned: Vec<(&str, &str)> = host_request
        .assignments
        .iter()
        .map(|a| (a.name.as_str(), a.value.as_str()))
        .collect();
    assigned.sort_unstable();
    assert_eq!(assigned, vec![("bucket", "telegraf"), ("region", "us-east-1")]);
}

#[tokio::test]
async fn failed_child_does_not_force_error_on_its_ancestors() {
    init_tracing();

    let region = query_var("region", "regions()");
    let host = query_var("host", "hosts(region: v.region)");
    let all = vec![region, host.clone()];

    let fetcher = Arc::new(
        MockFetcher::new()
            .fail("regions()", "upstream unavailable")
            .respond_value("hosts(region: v.region)", "host-a"),
    );
    let options = HydrateOptions::new("http://localhost:8086", "org", fetcher.clone());

    let result = hydrate(std::slice::from_ref(&host), &all, options).run().await.unwrap();

    let region_values = &result["region"];
    assert!(region_values.is_error());
    assert!(region_values.values.is_none());

    // The ancestor still resolves, with the failed child contributing no
    // assignment.
    let host_values = &result["host"];
    assert_eq!(host_values.selected.as_deref(), Some("host-a"));
    assert!(host_values.error.is_none());
    let host_request = &fetcher.requests()[1];
    assert!(host_request.assignments.is_empty());
}

#[tokio::test]
async fn sibling_subgraphs_are_isolated_from_a_failure() {
    init_tracing();

    let broken = query_var("broken", "broken()");
    let healthy = query_var("healthy", "healthy()");
    let all = vec![broken, healthy];

    let fetcher = Arc::new(
        MockFetcher::new()
            .fail("broken()", "boom")
            .respond_value("healthy()", "ok"),
    );
    let options = HydrateOptions::new("http://localhost:8086", "org", fetcher);

    let result = hydrate(&all, &all, options).run().await.unwrap();
    assert!(result["broken"].is_error());
    assert_eq!(result["healthy"].selected.as_deref(), Some("ok"));
}

#[tokio::test]
async fn unrequested_unrelated_variables_are_left_out_of_the_run() {
    init_tracing();

    let wanted = query_var("wanted", "wanted()");
    let unrelated = query_var("unrelated", "unrelated()");
    let all = vec![wanted.clone(), unrelated];

    let fetcher = Arc::new(MockFetcher::new().respond_value("wanted()", "w"));
    let options = HydrateOptions::new("http://localhost:8086", "org", fetcher.clone());

    let result = hydrate(std::slice::from_ref(&wanted), &all, options).run().await.unwrap();

    assert_eq!(result.len(), 1);
    assert!(result.contains_key("wanted"));
    assert_eq!(fetcher.fetch_order(), vec!["wanted()".to_string()]);
}

#[tokio::test]
async fn prior_and_default_selections_reach_the_transport() {
    init_tracing();

    let bucket = query_var("bucket", "buckets()").with_selected("system");
    let all = vec![bucket];

    let fetcher = Arc::new(MockFetcher::new().respond(
        "buckets()",
        VariableValues::resolved(
            vec!["telegraf".into(), "system".into()],
            Some("telegraf".into()),
        ),
    ));
    let options = HydrateOptions::new("http://localhost:8086", "org", fetcher.clone())
        .with_selections([("bucket".to_string(), "telegraf".to_string())].into());

    hydrate(&all, &all, options).run().await.unwrap();

    let request = &fetcher.requests()[0];
    assert_eq!(request.prev_selection.as_deref(), Some("telegraf"));
    assert_eq!(request.default_selection.as_deref(), Some("system"));
    assert_eq!(request.org_id, "org");
    assert_eq!(request.url, "http://localhost:8086");
    assert_eq!(request.language, "flux");
}

#[tokio::test]
async fn identical_inputs_hydrate_to_identical_mappings() {
    init_tracing();

    let region = query_var("region", "regions()");
    let host = query_var("host", "hosts(region: v.region)");
    let all = vec![region, host];

    let run = || async {
        let fetcher = Arc::new(
            MockFetcher::new()
                .respond_value("regions()", "us-east-1")
                .respond_value("hosts(region: v.region)", "host-a"),
        );
        let options = HydrateOptions::new("http://localhost:8086", "org", fetcher);
        hydrate(&all, &all, options).run().await.unwrap()
    };

    let first = run().await;
    let second = run().await;
    assert_eq!(first, second);
}
