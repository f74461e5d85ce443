//! Mutations: node and image creation and deletion, provisioning.

use axum::http::StatusCode;
use vigil_core::HarnessError;
use vigil_mock::fake::FakeBackend;
use vigil_mock::{DEFAULT_MEMORY_MB, ImageDescriptor};

use super::fake_and_client;

#[tokio::test]
async fn create_nodes_issues_one_request_per_node() {
    let (fake, client) = fake_and_client().await;
    client.create_nodes(3, 32_768).await.unwrap();

    let posts = fake
        .requests()
        .iter()
        .filter(|r| r.method == "POST" && r.path == "/ironic/v1/nodes")
        .count();
    assert_eq!(posts, 3);
    let nodes = client.all_nodes().await.unwrap();
    assert!(nodes.iter().all(|n| n.memory_mb == Some(32_768)));
    assert!(nodes.iter().all(|n| n.flavor.as_deref() == Some("onmetal-compute1")));
}

#[tokio::test]
async fn delete_node_expects_no_content() {
    let (fake, client) = fake_and_client().await;
    client.create_nodes(2, DEFAULT_MEMORY_MB).await.unwrap();
    let id = fake.with_state(|state| state.nodes()[0].uuid.clone());

    client.delete_node(&id).await.unwrap();
    assert_eq!(client.all_nodes().await.unwrap().len(), 1);

    // Deleting it again is a 404, surfaced as a status mismatch.
    let err = client.delete_node(&id).await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::UnexpectedStatus {
            expected: 204,
            actual: 404,
            ..
        }
    ));
}

/// Asking for three cached nodes when one exists deletes nothing.
#[tokio::test]
async fn over_delete_fails_before_any_deletion() {
    let (fake, client) = fake_and_client().await;
    client.create_nodes(4, DEFAULT_MEMORY_MB).await.unwrap();
    fake.with_state(|state| state.cache_uncached(1, "img"));

    let err = client.delete_nodes(3, true).await.unwrap_err();
    match &err {
        HarnessError::OverDelete {
            requested,
            available,
        } => {
            assert_eq!(*requested, 3);
            assert_eq!(*available, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("cannot delete more nodes than exist"));

    assert!(fake.requests().iter().all(|r| r.method != "DELETE"));
    assert_eq!(client.all_nodes().await.unwrap().len(), 4);
}

#[tokio::test]
async fn delete_nodes_takes_the_first_of_the_list() {
    let (fake, client) = fake_and_client().await;
    client.create_nodes(5, DEFAULT_MEMORY_MB).await.unwrap();
    fake.with_state(|state| state.cache_uncached(2, "img"));
    let uncached_before: Vec<String> = client
        .uncached_nodes()
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();

    let deleted = client.delete_nodes(2, false).await.unwrap();
    assert_eq!(deleted, uncached_before[..2]);
    assert_eq!(client.uncached_nodes().await.unwrap().len(), 1);
    assert_eq!(client.cached_nodes().await.unwrap().len(), 2);
}

#[tokio::test]
async fn delete_zero_nodes_is_a_no_op() {
    let (fake, client) = fake_and_client().await;
    assert!(client.delete_nodes(0, true).await.unwrap().is_empty());
    assert!(fake.requests().iter().all(|r| r.method != "DELETE"));
}

#[tokio::test]
async fn create_and_delete_images() {
    let (_fake, client) = fake_and_client().await;
    client
        .create_images(&[
            ImageDescriptor::named("OnMetal - Fedora 22").with_id("fedora-22"),
            ImageDescriptor::named("OnMetal - Arch").with_attribute("visibility", "public"),
        ])
        .await
        .unwrap();

    let mut names = client.harness_image_names().await.unwrap();
    names.sort();
    assert_eq!(names, vec!["OnMetal - Arch", "OnMetal - Fedora 22"]);
    assert!(client.image_map().await.unwrap().contains_key("fedora-22"));

    client.delete_images(&["fedora-22"]).await.unwrap();
    assert_eq!(
        client.harness_image_names().await.unwrap(),
        vec!["OnMetal - Arch"]
    );

    let err = client.delete_images(&["fedora-22"]).await.unwrap_err();
    assert!(matches!(err, HarnessError::UnexpectedStatus { actual: 404, .. }));
}

#[tokio::test]
async fn set_provision_state_expects_accepted() {
    let (fake, client) = fake_and_client().await;
    client.create_nodes(3, DEFAULT_MEMORY_MB).await.unwrap();
    let ids: Vec<String> = fake.with_state(|state| {
        state.nodes().iter().take(2).map(|n| n.uuid.clone()).collect()
    });

    client.set_provision_state(&ids, "active").await.unwrap();
    let provisioned: Vec<String> = client
        .provisioned_nodes()
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(provisioned, ids);

    client.set_provision_state(&ids[..1], "deleted").await.unwrap();
    assert_eq!(client.provisioned_nodes().await.unwrap().len(), 1);

    let err = client
        .set_provision_state(&["no-such-node"], "active")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::UnexpectedStatus {
            expected: 202,
            actual: 404,
            ..
        }
    ));
}

fn posts_to(fake: &FakeBackend, path: &str) -> usize {
    fake.requests()
        .iter()
        .filter(|r| r.method == "POST" && r.path == path)
        .count()
}

/// A 200 is still a failure where 201 is required, and creation stops there.
#[tokio::test]
async fn create_nodes_rejects_ok_and_stops_at_first_failure() {
    let (fake, client) = fake_and_client().await;
    fake.with_state(|state| state.fail_next(StatusCode::OK));

    let err = client.create_nodes(3, DEFAULT_MEMORY_MB).await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::UnexpectedStatus {
            expected: 201,
            actual: 200,
            ..
        }
    ));
    assert!(err.to_string().contains("POST /ironic/v1/nodes"));
    assert_eq!(posts_to(&fake, "/ironic/v1/nodes"), 1);
    assert!(client.all_nodes().await.unwrap().is_empty());
}

#[tokio::test]
async fn create_nodes_surfaces_server_error() {
    let (fake, client) = fake_and_client().await;
    fake.with_state(|state| state.fail_next(StatusCode::INTERNAL_SERVER_ERROR));

    let err = client.create_nodes(2, DEFAULT_MEMORY_MB).await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::UnexpectedStatus {
            expected: 201,
            actual: 500,
            ..
        }
    ));
    assert_eq!(posts_to(&fake, "/ironic/v1/nodes"), 1);

    // The injected failure is spent; the next creation goes through.
    client.create_nodes(2, DEFAULT_MEMORY_MB).await.unwrap();
    assert_eq!(client.all_nodes().await.unwrap().len(), 2);
}

#[tokio::test]
async fn create_images_rejects_wrong_status_and_stops() {
    let (fake, client) = fake_and_client().await;
    fake.with_state(|state| state.fail_next(StatusCode::INTERNAL_SERVER_ERROR));

    let err = client
        .create_images(&[
            ImageDescriptor::named("OnMetal - CentOS 7"),
            ImageDescriptor::named("OnMetal - Debian 8"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::UnexpectedStatus {
            expected: 201,
            actual: 500,
            ..
        }
    ));
    assert_eq!(posts_to(&fake, "/glance/v2/images"), 1);
    assert!(client.images().await.unwrap().is_empty());

    fake.with_state(|state| state.fail_next(StatusCode::OK));
    let err = client
        .create_images(&[ImageDescriptor::named("OnMetal - CentOS 7")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::UnexpectedStatus {
            expected: 201,
            actual: 200,
            ..
        }
    ));
}

/// Deletion requires exactly 204.
#[tokio::test]
async fn delete_node_rejects_ok() {
    let (fake, client) = fake_and_client().await;
    client.create_nodes(1, DEFAULT_MEMORY_MB).await.unwrap();
    let id = fake.with_state(|state| state.nodes()[0].uuid.clone());
    fake.with_state(|state| state.fail_next(StatusCode::OK));

    let err = client.delete_node(&id).await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::UnexpectedStatus {
            expected: 204,
            actual: 200,
            ..
        }
    ));
    assert_eq!(client.all_nodes().await.unwrap().len(), 1);
}

#[tokio::test]
async fn set_provision_state_rejects_ok() {
    let (fake, client) = fake_and_client().await;
    client.create_nodes(1, DEFAULT_MEMORY_MB).await.unwrap();
    let id = fake.with_state(|state| state.nodes()[0].uuid.clone());
    fake.with_state(|state| state.fail_next(StatusCode::OK));

    let err = client.set_provision_state(&[id], "active").await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::UnexpectedStatus {
            expected: 202,
            actual: 200,
            ..
        }
    ));
    assert!(client.provisioned_nodes().await.unwrap().is_empty());
}
