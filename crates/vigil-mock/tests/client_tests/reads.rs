//! Reads: node filters, flavor grouping, image views, status checking.

use axum::http::StatusCode;
use vigil_core::HarnessError;
use vigil_mock::{DEFAULT_MEMORY_MB, NodeFilter};

use super::fake_and_client;

#[tokio::test]
async fn empty_mock_has_no_nodes() {
    let (_fake, client) = fake_and_client().await;
    assert!(client.all_nodes().await.unwrap().is_empty());
    assert!(client.cached_nodes().await.unwrap().is_empty());
    assert!(client.images().await.unwrap().is_empty());
}

/// Nine fresh nodes are all uncached and unprovisioned.
#[tokio::test]
async fn created_nodes_start_uncached_and_unprovisioned() {
    let (_fake, client) = fake_and_client().await;
    client.create_nodes(9, DEFAULT_MEMORY_MB).await.unwrap();

    assert_eq!(client.all_nodes().await.unwrap().len(), 9);
    assert_eq!(client.uncached_unprovisioned_nodes().await.unwrap().len(), 9);
    assert!(client.cached_nodes().await.unwrap().is_empty());
    assert!(client.provisioned_nodes().await.unwrap().is_empty());

    let node = &client.all_nodes().await.unwrap()[0];
    assert_eq!(node.memory_mb, Some(DEFAULT_MEMORY_MB));
    assert_eq!(node.flavor.as_deref(), Some("onmetal-io1"));
}

/// After five of nine nodes are cached, exactly those five are reported.
#[tokio::test]
async fn cached_nodes_are_exactly_the_cached_ones() {
    let (fake, client) = fake_and_client().await;
    client.create_nodes(9, DEFAULT_MEMORY_MB).await.unwrap();

    let expected: Vec<String> = fake.with_state(|state| {
        let image = state.add_image("OnMetal - CentOS 7");
        state.cache_uncached(5, &image);
        state
            .nodes()
            .iter()
            .filter(|n| n.cache_image_id.is_some())
            .map(|n| n.uuid.clone())
            .collect()
    });

    let cached: Vec<String> = client
        .cached_nodes()
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(cached, expected);
    assert_eq!(client.uncached_nodes().await.unwrap().len(), 4);
}

#[tokio::test]
async fn provisioning_filters() {
    let (fake, client) = fake_and_client().await;
    fake.with_state(|state| {
        let image = state.add_image("OnMetal - Debian 8");
        let a = state.add_node("onmetal-io1");
        let b = state.add_node("onmetal-io1");
        let c = state.add_node("onmetal-compute1");
        state.add_node("onmetal-memory1");
        state.provision(&a);
        state.cache(&a, &image);
        state.cache(&b, &image);
        state.provision(&c);
    });

    assert_eq!(client.nodes(None).await.unwrap().len(), 4);
    assert_eq!(client.nodes(Some(true)).await.unwrap().len(), 2);
    assert_eq!(client.nodes(Some(false)).await.unwrap().len(), 2);
    assert_eq!(client.cached_unprovisioned_nodes().await.unwrap().len(), 1);
    assert_eq!(client.uncached_unprovisioned_nodes().await.unwrap().len(), 1);
    assert_eq!(
        client.filtered_nodes(NodeFilter::Cached).await.unwrap().len(),
        2
    );
}

/// Nodes of an unknown flavor never land in a named bucket.
#[tokio::test]
async fn cached_nodes_by_flavor_keeps_unknown_flavors_apart() {
    let (fake, client) = fake_and_client().await;
    fake.with_state(|state| {
        let image = state.add_image("OnMetal - CoreOS");
        for flavor in ["onmetal-compute1", "onmetal-io1", "onmetal-io1", "onmetal-gpu1"] {
            let id = state.add_node(flavor);
            state.cache(&id, &image);
        }
        state.add_node("onmetal-memory1");
    });

    let buckets = client.cached_nodes_by_flavor().await.unwrap();
    let counts = buckets.counts();
    assert_eq!(counts["onmetal-compute1"], 1);
    assert_eq!(counts["onmetal-io1"], 2);
    assert_eq!(counts["onmetal-memory1"], 0);
    assert_eq!(buckets.other().len(), 1);
    assert_eq!(buckets.other()[0].flavor.as_deref(), Some("onmetal-gpu1"));
}

#[tokio::test]
async fn harness_images_filtered_by_prefix() {
    let (fake, client) = fake_and_client().await;
    let (centos, _ubuntu, debian) = fake.with_state(|state| {
        (
            state.add_image("OnMetal - CentOS 7"),
            state.add_image("Ubuntu 14.04 (Virtual)"),
            state.add_image("OnMetal - Debian 8"),
        )
    });

    assert_eq!(
        client.harness_image_names().await.unwrap(),
        vec!["OnMetal - CentOS 7", "OnMetal - Debian 8"]
    );
    assert_eq!(client.harness_image_ids().await.unwrap(), vec![centos, debian]);
    assert_eq!(client.image_map().await.unwrap().len(), 3);

    let custom = client.clone().with_image_prefix("Ubuntu");
    assert_eq!(
        custom.harness_image_names().await.unwrap(),
        vec!["Ubuntu 14.04 (Virtual)"]
    );
}

/// A node cached with a deleted image is grouped under `None` and dropped
/// from the counts.
#[tokio::test]
async fn nodes_by_image_handles_unmapped_images() {
    let (fake, client) = fake_and_client().await;
    let (first, second, stale) = fake.with_state(|state| {
        let centos = state.add_image("OnMetal - CentOS 7");
        let first = state.add_node("onmetal-io1");
        let second = state.add_node("onmetal-io1");
        let stale = state.add_node("onmetal-io1");
        state.cache(&first, &centos);
        state.cache(&second, &centos);
        state.cache(&stale, "deleted-image");
        (first, second, stale)
    });

    let cached = client.cached_nodes().await.unwrap();
    let grouped = client.nodes_by_image(&cached).await.unwrap();
    assert_eq!(
        grouped[&Some("OnMetal - CentOS 7".to_string())],
        vec![first, second]
    );
    assert_eq!(grouped[&None], vec![stale]);

    let counts = client.image_counts(&cached).await.unwrap();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts["OnMetal - CentOS 7"], 2);
}

/// Every read goes back to the mock.
#[tokio::test]
async fn reads_are_never_cached() {
    let (fake, client) = fake_and_client().await;
    client.create_nodes(2, DEFAULT_MEMORY_MB).await.unwrap();
    assert_eq!(client.cached_nodes().await.unwrap().len(), 0);

    fake.with_state(|state| state.cache_uncached(1, "img"));
    assert_eq!(client.cached_nodes().await.unwrap().len(), 1);

    let gets = fake
        .requests()
        .iter()
        .filter(|r| r.method == "GET")
        .count();
    assert_eq!(gets, 2);
}

#[tokio::test]
async fn unexpected_read_status_fails_fast() {
    let (fake, client) = fake_and_client().await;
    fake.with_state(|state| state.fail_next(StatusCode::SERVICE_UNAVAILABLE));

    let err = client.all_nodes().await.unwrap_err();
    match err {
        HarnessError::UnexpectedStatus {
            operation,
            expected,
            actual,
        } => {
            assert_eq!(operation, "GET /ironic/v1/nodes/detail");
            assert_eq!(expected, 200);
            assert_eq!(actual, 503);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The failure was one-shot.
    assert!(client.all_nodes().await.is_ok());
}
