//! HTTP client for the mock backend.
//!
//! Reads re-fetch on every call. Every call checks the exact status its
//! endpoint documents and fails with [`HarnessError::UnexpectedStatus`] on any
//! other; nothing is retried here.

use std::collections::BTreeMap;

use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use vigil_core::{HarnessError, Result};

use crate::image::{Image, ImageDescriptor, ImageListing};
use crate::node::{Node, NodeListing};
use crate::views::{self, FlavorBuckets, NodeFilter};

/// Memory size used when creating nodes without an explicit one.
pub const DEFAULT_MEMORY_MB: i64 = 131_072;

/// Default prefix of harness-relevant image names.
pub const DEFAULT_IMAGE_PREFIX: &str = "OnMetal";

const NODES_PATH: &str = "/ironic/v1/nodes";
const IMAGES_PATH: &str = "/glance/v2/images";

/// Client for the mock backend's node and image endpoints.
#[derive(Debug, Clone)]
pub struct MockClient {
    http: reqwest::Client,
    base_url: String,
    image_prefix: String,
}

impl MockClient {
    /// Creates a client for the mock at `base_url` (e.g. `http://localhost:8900`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Creates a client reusing an existing HTTP client.
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            image_prefix: DEFAULT_IMAGE_PREFIX.to_string(),
        }
    }

    /// Sets the prefix that marks harness-relevant images.
    #[must_use]
    pub fn with_image_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.image_prefix = prefix.into();
        self
    }

    /// Base URL of the mock.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Prefix of harness-relevant image names.
    #[must_use]
    pub fn image_prefix(&self) -> &str {
        &self.image_prefix
    }

    /// Node endpoint, as handed to the service under test.
    #[must_use]
    pub fn nodes_url(&self) -> String {
        format!("{}{NODES_PATH}", self.base_url)
    }

    /// Image endpoint, as handed to the service under test.
    #[must_use]
    pub fn images_url(&self) -> String {
        format!("{}{IMAGES_PATH}", self.base_url)
    }

    // ------------------------------------------------------------------
    // Node reads
    // ------------------------------------------------------------------

    /// Every node, freshly fetched.
    pub async fn all_nodes(&self) -> Result<Vec<Node>> {
        let path = format!("{NODES_PATH}/detail");
        let listing: NodeListing = self.get_json(&path).await?;
        Ok(listing.nodes)
    }

    /// Nodes passing `filter`, from one fresh fetch.
    pub async fn filtered_nodes(&self, filter: NodeFilter) -> Result<Vec<Node>> {
        Ok(filter.apply(self.all_nodes().await?))
    }

    /// All nodes, or only the provisioned or unprovisioned ones.
    pub async fn nodes(&self, provisioned: Option<bool>) -> Result<Vec<Node>> {
        let filter = match provisioned {
            None => NodeFilter::All,
            Some(true) => NodeFilter::Provisioned,
            Some(false) => NodeFilter::Unprovisioned,
        };
        self.filtered_nodes(filter).await
    }

    /// Nodes holding an instance lease.
    pub async fn provisioned_nodes(&self) -> Result<Vec<Node>> {
        self.filtered_nodes(NodeFilter::Provisioned).await
    }

    /// Nodes without an instance lease.
    pub async fn unprovisioned_nodes(&self) -> Result<Vec<Node>> {
        self.filtered_nodes(NodeFilter::Unprovisioned).await
    }

    /// Cached, unprovisioned nodes.
    pub async fn cached_unprovisioned_nodes(&self) -> Result<Vec<Node>> {
        self.filtered_nodes(NodeFilter::CachedUnprovisioned).await
    }

    /// Uncached, unprovisioned nodes.
    pub async fn uncached_unprovisioned_nodes(&self) -> Result<Vec<Node>> {
        self.filtered_nodes(NodeFilter::UncachedUnprovisioned).await
    }

    /// Nodes with a cached image.
    pub async fn cached_nodes(&self) -> Result<Vec<Node>> {
        self.filtered_nodes(NodeFilter::Cached).await
    }

    /// Nodes without a cached image.
    pub async fn uncached_nodes(&self) -> Result<Vec<Node>> {
        self.filtered_nodes(NodeFilter::Uncached).await
    }

    /// Cached nodes grouped by flavor.
    pub async fn cached_nodes_by_flavor(&self) -> Result<FlavorBuckets> {
        Ok(FlavorBuckets::from_nodes(&self.all_nodes().await?))
    }

    // ------------------------------------------------------------------
    // Image reads
    // ------------------------------------------------------------------

    /// Every image, freshly fetched.
    pub async fn images(&self) -> Result<Vec<Image>> {
        let listing: ImageListing = self.get_json(IMAGES_PATH).await?;
        Ok(listing.images)
    }

    /// Image id to image name.
    pub async fn image_map(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .images()
            .await?
            .into_iter()
            .map(|image| (image.id, image.name))
            .collect())
    }

    /// Names of images carrying the harness prefix.
    pub async fn harness_image_names(&self) -> Result<Vec<String>> {
        Ok(self
            .harness_images()
            .await?
            .into_iter()
            .map(|image| image.name)
            .collect())
    }

    /// Ids of images carrying the harness prefix.
    pub async fn harness_image_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .harness_images()
            .await?
            .into_iter()
            .map(|image| image.id)
            .collect())
    }

    async fn harness_images(&self) -> Result<Vec<Image>> {
        let prefix = self.image_prefix.as_str();
        Ok(self
            .images()
            .await?
            .into_iter()
            .filter(|image| image.has_prefix(prefix))
            .collect())
    }

    /// Groups `nodes` by cached image name against a fresh image map.
    pub async fn nodes_by_image(
        &self,
        nodes: &[Node],
    ) -> Result<BTreeMap<Option<String>, Vec<String>>> {
        let map = self.image_map().await?;
        Ok(views::nodes_by_image(nodes, &map))
    }

    /// Counts `nodes` per cached image name, dropping unmapped images.
    pub async fn image_counts(&self, nodes: &[Node]) -> Result<BTreeMap<String, usize>> {
        Ok(views::image_counts(&self.nodes_by_image(nodes).await?))
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Creates `count` nodes, one request each.
    pub async fn create_nodes(&self, count: usize, memory_mb: i64) -> Result<()> {
        let body = json!({"properties": {"memory_mb": memory_mb}});
        for _ in 0..count {
            self.send(Method::POST, NODES_PATH, Some(&body), StatusCode::CREATED)
                .await?;
        }
        tracing::debug!(count, memory_mb, "created nodes");
        Ok(())
    }

    /// Deletes one node.
    pub async fn delete_node(&self, id: &str) -> Result<()> {
        let path = format!("{NODES_PATH}/{id}");
        self.send(Method::DELETE, &path, None, StatusCode::NO_CONTENT)
            .await?;
        Ok(())
    }

    /// Deletes the first `count` cached (or uncached) nodes.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::OverDelete`] without deleting anything if fewer
    /// than `count` such nodes exist.
    pub async fn delete_nodes(&self, count: usize, cached: bool) -> Result<Vec<String>> {
        let candidates = if cached {
            self.cached_nodes().await?
        } else {
            self.uncached_nodes().await?
        };
        if count > candidates.len() {
            return Err(HarnessError::OverDelete {
                requested: count,
                available: candidates.len(),
            });
        }

        let ids: Vec<String> = candidates.into_iter().take(count).map(|n| n.id).collect();
        for id in &ids {
            self.delete_node(id).await?;
        }
        tracing::debug!(count, cached, "deleted nodes");
        Ok(ids)
    }

    /// Creates one image per descriptor.
    pub async fn create_images(&self, images: &[ImageDescriptor]) -> Result<()> {
        for image in images {
            let body = serde_json::to_value(image)
                .map_err(|e| HarnessError::transport(format!("encoding image {}: {e}", image.name)))?;
            self.send(Method::POST, IMAGES_PATH, Some(&body), StatusCode::CREATED)
                .await?;
        }
        Ok(())
    }

    /// Deletes images by id.
    pub async fn delete_images<S: AsRef<str>>(&self, ids: &[S]) -> Result<()> {
        for id in ids {
            let path = format!("{IMAGES_PATH}/{}", id.as_ref());
            self.send(Method::DELETE, &path, None, StatusCode::NO_CONTENT)
                .await?;
        }
        Ok(())
    }

    /// Moves each node to the `target` provisioning state.
    pub async fn set_provision_state<S: AsRef<str>>(&self, ids: &[S], target: &str) -> Result<()> {
        let body = json!({"target": target});
        for id in ids {
            let path = format!("{NODES_PATH}/{}/states/provision", id.as_ref());
            self.send(Method::PUT, &path, Some(&body), StatusCode::ACCEPTED)
                .await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::GET, path, None, StatusCode::OK).await?;
        response
            .json()
            .await
            .map_err(|e| HarnessError::transport(format!("decoding GET {path}: {e}")))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        expected: StatusCode,
    ) -> Result<Response> {
        let operation = format!("{method} {path}");
        let mut request = self
            .http
            .request(method, format!("{}{path}", self.base_url));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HarnessError::transport(format!("{operation}: {e}")))?;

        let status = response.status();
        if status != expected {
            tracing::warn!(%operation, expected = expected.as_u16(), actual = status.as_u16(), "unexpected status");
            return Err(HarnessError::UnexpectedStatus {
                operation,
                expected: expected.as_u16(),
                actual: status.as_u16(),
            });
        }
        tracing::trace!(%operation, status = status.as_u16(), "mock call");
        Ok(response)
    }
}
