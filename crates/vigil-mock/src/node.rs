//! Bare-metal node records as reported by the mock's node-detail listing.

use serde::Deserialize;
use serde_json::Value;

/// One node in the mock backend.
///
/// The harness never owns nodes: it observes them and occasionally forces
/// their provisioning state during setup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "WireNode")]
pub struct Node {
    /// Node identifier (`uuid` on the wire).
    pub id: String,
    /// Image pre-cached onto the node, if any.
    pub cache_image_id: Option<String>,
    /// Instance lease, present when the node is provisioned.
    pub instance_uuid: Option<String>,
    /// Flavor tag (`extra.flavor` on the wire).
    pub flavor: Option<String>,
    /// Memory size the node was created with.
    pub memory_mb: Option<i64>,
    /// Provisioning state, kept for diagnostics.
    pub provision_state: Option<String>,
}

impl Node {
    /// Creates a bare, uncached, unprovisioned node.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cache_image_id: None,
            instance_uuid: None,
            flavor: None,
            memory_mb: None,
            provision_state: None,
        }
    }

    /// Sets the cached image.
    #[must_use]
    pub fn with_cache_image(mut self, image_id: impl Into<String>) -> Self {
        self.cache_image_id = Some(image_id.into());
        self
    }

    /// Sets the instance lease.
    #[must_use]
    pub fn with_instance(mut self, instance_uuid: impl Into<String>) -> Self {
        self.instance_uuid = Some(instance_uuid.into());
        self
    }

    /// Sets the flavor tag.
    #[must_use]
    pub fn with_flavor(mut self, flavor: impl Into<String>) -> Self {
        self.flavor = Some(flavor.into());
        self
    }

    /// Returns true if an image is cached on the node.
    #[must_use]
    pub const fn is_cached(&self) -> bool {
        self.cache_image_id.is_some()
    }

    /// Returns true if the node holds an instance lease.
    #[must_use]
    pub const fn is_provisioned(&self) -> bool {
        self.instance_uuid.is_some()
    }
}

#[derive(Deserialize)]
struct WireNode {
    uuid: String,
    #[serde(default)]
    driver_info: Option<WireDriverInfo>,
    #[serde(default)]
    instance_uuid: Option<String>,
    #[serde(default)]
    extra: Option<WireExtra>,
    #[serde(default)]
    properties: Option<WireProperties>,
    #[serde(default)]
    provision_state: Option<String>,
}

#[derive(Deserialize)]
struct WireDriverInfo {
    #[serde(default)]
    cache_image_id: Option<String>,
}

#[derive(Deserialize)]
struct WireExtra {
    #[serde(default)]
    flavor: Option<String>,
}

#[derive(Deserialize)]
struct WireProperties {
    #[serde(default)]
    memory_mb: Option<Value>,
}

/// Empty strings mean "absent" on the wire.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// The mock reports memory as either a number or a numeric string.
fn memory(value: Option<Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl From<WireNode> for Node {
    fn from(wire: WireNode) -> Self {
        Self {
            id: wire.uuid,
            cache_image_id: present(wire.driver_info.and_then(|d| d.cache_image_id)),
            instance_uuid: present(wire.instance_uuid),
            flavor: present(wire.extra.and_then(|e| e.flavor)),
            memory_mb: memory(wire.properties.and_then(|p| p.memory_mb)),
            provision_state: present(wire.provision_state),
        }
    }
}

/// Body of `GET /ironic/v1/nodes/detail`.
#[derive(Debug, Deserialize)]
pub(crate) struct NodeListing {
    pub nodes: Vec<Node>,
}
