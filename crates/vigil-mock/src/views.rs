//! Pure views over a fetched node list.
//!
//! Everything here works on a snapshot; [`crate::MockClient`] fetches a fresh
//! one for every call so the views stay usable as polling predicates.

use std::collections::BTreeMap;

use crate::node::Node;

/// Flavor tags with a named bucket in [`FlavorBuckets`].
pub const FLAVORS: [&str; 3] = ["onmetal-compute1", "onmetal-io1", "onmetal-memory1"];

/// Filters over the node list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeFilter {
    /// Every node.
    All,
    /// Nodes holding an instance lease.
    Provisioned,
    /// Nodes without an instance lease.
    Unprovisioned,
    /// Cached and unprovisioned.
    CachedUnprovisioned,
    /// Neither cached nor provisioned.
    UncachedUnprovisioned,
    /// Nodes with a cached image.
    Cached,
    /// Nodes without a cached image.
    Uncached,
}

impl NodeFilter {
    /// Returns true if `node` passes the filter.
    #[must_use]
    pub const fn matches(self, node: &Node) -> bool {
        match self {
            Self::All => true,
            Self::Provisioned => node.is_provisioned(),
            Self::Unprovisioned => !node.is_provisioned(),
            Self::CachedUnprovisioned => node.is_cached() && !node.is_provisioned(),
            Self::UncachedUnprovisioned => !node.is_cached() && !node.is_provisioned(),
            Self::Cached => node.is_cached(),
            Self::Uncached => !node.is_cached(),
        }
    }

    /// Keeps the nodes that pass, in order.
    #[must_use]
    pub fn apply(self, nodes: Vec<Node>) -> Vec<Node> {
        nodes.into_iter().filter(|n| self.matches(n)).collect()
    }
}

/// Cached nodes grouped by flavor.
///
/// The three [`FLAVORS`] buckets are always present. Cached nodes with any
/// other flavor, or none, land in [`other`](Self::other) and never in a named
/// bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavorBuckets {
    named: BTreeMap<String, Vec<Node>>,
    other: Vec<Node>,
}

impl FlavorBuckets {
    /// Groups the cached nodes of `nodes`; uncached nodes are ignored.
    #[must_use]
    pub fn from_nodes(nodes: &[Node]) -> Self {
        let mut named: BTreeMap<String, Vec<Node>> =
            FLAVORS.iter().map(|f| ((*f).to_string(), Vec::new())).collect();
        let mut other = Vec::new();

        for node in nodes.iter().filter(|n| n.is_cached()) {
            match node.flavor.as_deref().and_then(|f| named.get_mut(f)) {
                Some(bucket) => bucket.push(node.clone()),
                None => other.push(node.clone()),
            }
        }

        Self { named, other }
    }

    /// Nodes in a named bucket; `None` for a flavor outside [`FLAVORS`].
    #[must_use]
    pub fn get(&self, flavor: &str) -> Option<&[Node]> {
        self.named.get(flavor).map(Vec::as_slice)
    }

    /// Named buckets, keyed by flavor.
    #[must_use]
    pub const fn named(&self) -> &BTreeMap<String, Vec<Node>> {
        &self.named
    }

    /// Cached nodes whose flavor has no named bucket.
    #[must_use]
    pub fn other(&self) -> &[Node] {
        &self.other
    }

    /// Node counts per named bucket.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.named
            .iter()
            .map(|(flavor, nodes)| (flavor.clone(), nodes.len()))
            .collect()
    }
}

/// Groups node ids by the name of their cached image.
///
/// The `None` key collects nodes with no cached image or one missing from
/// `image_map` (image id to name).
#[must_use]
pub fn nodes_by_image(
    nodes: &[Node],
    image_map: &BTreeMap<String, String>,
) -> BTreeMap<Option<String>, Vec<String>> {
    let mut grouped: BTreeMap<Option<String>, Vec<String>> = BTreeMap::new();
    for node in nodes {
        let name = node
            .cache_image_id
            .as_ref()
            .and_then(|id| image_map.get(id))
            .cloned();
        grouped.entry(name).or_default().push(node.id.clone());
    }
    grouped
}

/// Counts per image name, dropping the unmapped `None` group.
#[must_use]
pub fn image_counts(grouped: &BTreeMap<Option<String>, Vec<String>>) -> BTreeMap<String, usize> {
    grouped
        .iter()
        .filter_map(|(name, ids)| name.as_ref().map(|n| (n.clone(), ids.len())))
        .collect()
}

/// Expected number of nodes to be cached.
///
/// With `by_flavor`, the total is split evenly across `flavors` buckets using
/// integer division, each bucket's share is floored, and the result is scaled
/// back up so it stays a multiple of `flavors`. Without it, the result is
/// `floor(total * percentage)`. `flavors == 0` behaves as if `by_flavor` were
/// false. Negative results saturate to zero.
#[must_use]
pub fn calculate_percentage_to_be_cached(
    total: usize,
    percentage: f64,
    flavors: usize,
    by_flavor: bool,
) -> usize {
    if by_flavor && flavors > 0 {
        let per_flavor = total / flavors;
        ((per_flavor as f64) * percentage).floor() as usize * flavors
    } else {
        ((total as f64) * percentage).floor() as usize
    }
}
