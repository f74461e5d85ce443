//! Boot images as listed by the mock's image service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Image as listed by `GET /glance/v2/images`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image identifier.
    pub id: String,
    /// Image name.
    pub name: String,
}

impl Image {
    /// Creates an image record.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Returns true if the name carries `prefix`.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.name.starts_with(prefix)
    }
}

/// Request body for creating an image.
///
/// Anything beyond the name and optional id is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Image name.
    pub name: String,
    /// Identifier to create the image with; the mock picks one if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Additional attributes.
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl ImageDescriptor {
    /// Describes an image by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Sets the identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds an extra attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Body of `GET /glance/v2/images`.
#[derive(Debug, Deserialize)]
pub(crate) struct ImageListing {
    pub images: Vec<Image>,
}
