//! Convergence probes built on [`MockClient`].

use async_trait::async_trait;
use vigil_core::{Probe, Result};

use crate::client::MockClient;

/// Waits for the number of cached nodes to equal a target.
#[derive(Debug)]
pub struct CachedCount<'a> {
    client: &'a MockClient,
    expected: usize,
}

impl<'a> CachedCount<'a> {
    /// Probe for exactly `expected` cached nodes.
    #[must_use]
    pub const fn new(client: &'a MockClient, expected: usize) -> Self {
        Self { client, expected }
    }
}

#[async_trait]
impl Probe for CachedCount<'_> {
    type Output = usize;

    fn describe(&self) -> String {
        "cached node count".to_string()
    }

    async fn observe(&mut self) -> Result<usize> {
        Ok(self.client.cached_nodes().await?.len())
    }

    fn satisfied(&self, observed: &usize) -> bool {
        *observed == self.expected
    }

    fn expected(&self) -> String {
        self.expected.to_string()
    }

    fn render(&self, observed: &usize) -> String {
        observed.to_string()
    }
}

/// One observation of [`Recache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coverage {
    /// Sorted names of harness images currently in the mock.
    pub images: Vec<String>,
    /// Sorted names of images cached on at least one node.
    pub cached: Vec<String>,
}

/// Waits until every harness image, and nothing else, is cached somewhere.
#[derive(Debug)]
pub struct Recache<'a> {
    client: &'a MockClient,
    last_images: Vec<String>,
}

impl<'a> Recache<'a> {
    /// Probe for re-caching against the images currently in the mock.
    #[must_use]
    pub const fn new(client: &'a MockClient) -> Self {
        Self {
            client,
            last_images: Vec::new(),
        }
    }
}

#[async_trait]
impl Probe for Recache<'_> {
    type Output = Coverage;

    fn describe(&self) -> String {
        "cached image coverage".to_string()
    }

    async fn observe(&mut self) -> Result<Coverage> {
        let cached_nodes = self.client.cached_nodes().await?;
        let counts = self.client.image_counts(&cached_nodes).await?;
        let mut images = self.client.harness_image_names().await?;
        images.sort();
        self.last_images.clone_from(&images);

        Ok(Coverage {
            images,
            cached: counts.into_keys().collect(),
        })
    }

    fn satisfied(&self, observed: &Coverage) -> bool {
        observed.images == observed.cached
    }

    fn expected(&self) -> String {
        format!("{:?}", self.last_images)
    }

    fn render(&self, observed: &Coverage) -> String {
        format!("{:?}", observed.cached)
    }
}
