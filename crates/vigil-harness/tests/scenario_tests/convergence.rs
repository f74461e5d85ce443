//! Convergence scenarios: caching driven by the simulated director, observed
//! only through the harness's mock client and wait helpers.

use std::time::Duration;

use vigil_core::HarnessError;
use vigil_mock::{DEFAULT_MEMORY_MB, ImageDescriptor};

use super::mock_state::SimulatedDirector;
use super::{fake_harness, short_poll};

/// Nine fresh nodes: all listed, all uncached and unprovisioned.
#[tokio::test]
async fn nine_created_nodes_are_uncached() {
    let (_dir, _fake, mut harness) = fake_harness().await;
    assert!(harness.mock().all_nodes().await.unwrap().is_empty());

    harness.mock().create_nodes(9, DEFAULT_MEMORY_MB).await.unwrap();
    assert_eq!(harness.mock().all_nodes().await.unwrap().len(), 9);
    assert_eq!(
        harness
            .mock()
            .uncached_unprovisioned_nodes()
            .await
            .unwrap()
            .len(),
        9
    );
    assert!(harness.mock().cached_nodes().await.unwrap().is_empty());
    harness.teardown().await.unwrap();
}

/// Five of nine cached later: the wait returns and the cached set is exactly those five.
#[tokio::test]
async fn wait_for_five_cached_nodes() {
    let (_dir, fake, mut harness) = fake_harness().await;
    harness.mock().create_nodes(9, DEFAULT_MEMORY_MB).await.unwrap();

    let state = fake.state();
    let caching = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut state = state.lock();
        let image = state.add_image("OnMetal - CentOS 7");
        state.cache_uncached(5, &image);
        state
            .nodes()
            .iter()
            .filter(|n| n.cache_image_id.is_some())
            .map(|n| n.uuid.clone())
            .collect::<Vec<_>>()
    });

    assert_eq!(harness.wait_for_cached_nodes(5).await.unwrap(), 5);
    let expected = caching.await.unwrap();
    let cached: Vec<String> = harness
        .mock()
        .cached_nodes()
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(cached, expected);
    harness.teardown().await.unwrap();
}

#[tokio::test]
async fn wait_timeout_reports_expected_and_observed() {
    let (_dir, _fake, mut harness) = fake_harness().await;
    harness.mock().create_nodes(3, DEFAULT_MEMORY_MB).await.unwrap();

    let err = harness
        .wait_for_cached_nodes_with(3, short_poll())
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::ConvergenceTimeout { .. }));
    assert!(err.to_string().contains("expected 3, got 0"));
    harness.teardown().await.unwrap();
}

/// Deleting three cached nodes when one exists fails and deletes nothing.
#[tokio::test]
async fn over_delete_issues_no_deletion() {
    let (_dir, fake, mut harness) = fake_harness().await;
    harness.mock().create_nodes(4, DEFAULT_MEMORY_MB).await.unwrap();
    fake.with_state(|state| state.cache_uncached(1, "img"));

    let err = harness.mock().delete_nodes(3, true).await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::OverDelete {
            requested: 3,
            available: 1
        }
    ));
    assert!(fake.requests().iter().all(|r| r.method != "DELETE"));
    assert_eq!(harness.mock().all_nodes().await.unwrap().len(), 4);
    harness.teardown().await.unwrap();
}

/// With dry run configured, nothing gets cached.
#[tokio::test]
async fn dry_run_caches_nothing() {
    let (_dir, fake, mut harness) = fake_harness().await;
    let options = harness.service_options().dry_run(true);
    let config = harness.write_service_config(&options).unwrap();
    harness.mock().create_nodes(9, DEFAULT_MEMORY_MB).await.unwrap();
    fake.with_state(|state| state.add_image("OnMetal - CentOS 7"));

    harness.start_mock().await.unwrap();
    harness.start_service(Some(&config), None).await.unwrap();

    let director = SimulatedDirector::from_config(&config, harness.settings().layout.flavors);
    for _ in 0..3 {
        fake.with_state(|state| director.reconcile(state));
    }
    assert!(harness.mock().cached_nodes().await.unwrap().is_empty());
    harness.teardown().await.unwrap();
}

/// Provisioned nodes keep their state and never get an image.
#[tokio::test]
async fn provisioned_nodes_are_never_cached() {
    let (_dir, fake, mut harness) = fake_harness().await;
    harness.mock().create_nodes(9, DEFAULT_MEMORY_MB).await.unwrap();
    fake.with_state(|state| state.add_image("OnMetal - CentOS 7"));
    let to_provision: Vec<String> = harness
        .mock()
        .all_nodes()
        .await
        .unwrap()
        .into_iter()
        .take(3)
        .map(|n| n.id)
        .collect();
    harness
        .mock()
        .set_provision_state(&to_provision, "active")
        .await
        .unwrap();

    let before = harness.mock().nodes(Some(true)).await.unwrap();
    assert!(before.iter().all(|n| !n.is_cached()));

    harness.start_mock().await.unwrap();
    harness.start_service(None, None).await.unwrap();
    let config = harness.config_file_name(vigil_harness::DEFAULT_CONFIG_STEM);
    let director = SimulatedDirector::from_config(&config, harness.settings().layout.flavors);
    let task = director.spawn(fake.state(), Duration::from_millis(50));

    // Six unprovisioned at the default 0.5 → floor(6 / 3 * 0.5) * 3 = 3.
    harness.wait_for_cached_nodes(3).await.unwrap();
    task.abort();

    let after = harness.mock().nodes(Some(true)).await.unwrap();
    assert_eq!(before, after);
    harness.teardown().await.unwrap();
}

async fn caches_to_percentage(nodes: usize, percentage: f64, expected: usize) {
    let (_dir, fake, mut harness) = fake_harness().await;
    let options = harness.service_options().percentage_to_cache(percentage);
    let config = harness.write_service_config(&options).unwrap();
    harness.mock().create_nodes(nodes, DEFAULT_MEMORY_MB).await.unwrap();
    fake.with_state(|state| {
        state.add_image("OnMetal - CentOS 7");
        state.add_image("OnMetal - Debian 8");
    });

    harness.start_mock().await.unwrap();
    let before = harness.mock().nodes(Some(false)).await.unwrap();
    harness
        .start_service(Some(&config), Some("Got 0 cache directives from the strategy"))
        .await
        .unwrap();
    let director = SimulatedDirector::from_config(&config, harness.settings().layout.flavors);
    let task = director.spawn(fake.state(), Duration::from_millis(50));

    let target = harness.expected_cached(before.len(), percentage, true);
    assert_eq!(target, expected);
    harness.wait_for_cached_nodes(target).await.unwrap();
    task.abort();

    let after = harness.mock().nodes(Some(false)).await.unwrap();
    assert_eq!(before.len(), after.len());
    harness.teardown().await.unwrap();
}

#[tokio::test]
async fn caches_thirty_percent() {
    caches_to_percentage(30, 0.3, 9).await;
}

#[tokio::test]
async fn caches_twenty_five_percent() {
    caches_to_percentage(24, 0.25, 6).await;
}

/// Adding and then deleting an image: every current harness image ends up
/// cached and the deleted one disappears from the cached set.
#[tokio::test]
async fn recache_after_image_add_and_delete() {
    let (_dir, fake, mut harness) = fake_harness().await;
    let options = harness.service_options().percentage_to_cache(1.0);
    let config = harness.write_service_config(&options).unwrap();
    harness.mock().create_nodes(12, DEFAULT_MEMORY_MB).await.unwrap();
    harness
        .mock()
        .create_images(&[
            ImageDescriptor::named("OnMetal - CentOS 7").with_id("centos-7"),
            ImageDescriptor::named("OnMetal - Debian 8").with_id("debian-8"),
            ImageDescriptor::named("Windows 2012 (Virtual)"),
        ])
        .await
        .unwrap();

    harness.start_mock().await.unwrap();
    harness.start_service(Some(&config), None).await.unwrap();
    let director = SimulatedDirector::from_config(&config, harness.settings().layout.flavors);
    let task = director.spawn(fake.state(), Duration::from_millis(50));

    let coverage = harness.wait_for_successful_recache().await.unwrap();
    assert_eq!(coverage.cached, vec!["OnMetal - CentOS 7", "OnMetal - Debian 8"]);

    // A new image is picked up once nodes free up for it.
    harness
        .mock()
        .create_images(&[ImageDescriptor::named("OnMetal - Fedora 22").with_id("fedora-22")])
        .await
        .unwrap();
    harness.mock().delete_nodes(4, true).await.unwrap();
    harness.mock().create_nodes(4, DEFAULT_MEMORY_MB).await.unwrap();
    let coverage = harness.wait_for_successful_recache().await.unwrap();
    assert!(coverage.cached.contains(&"OnMetal - Fedora 22".to_string()));

    // A deleted image is ejected and stops counting.
    harness.mock().delete_images(&["debian-8"]).await.unwrap();
    let coverage = harness.wait_for_successful_recache().await.unwrap();
    assert_eq!(coverage.cached, vec!["OnMetal - CentOS 7", "OnMetal - Fedora 22"]);

    task.abort();
    harness.teardown().await.unwrap();
}
