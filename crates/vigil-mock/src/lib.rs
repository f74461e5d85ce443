// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # vigil-mock
//!
//! Client for the mock infrastructure backend the service under test talks to.
//!
//! [`MockClient`] queries the node and image tables, derives the filtered and
//! grouped [`views`] used as polling predicates, and forces state for test
//! setup. [`probes`] wraps the common predicates for
//! [`vigil_core::poll_until`].
//!
//! With the `fake-backend` feature, [`fake::FakeBackend`] serves the same
//! endpoints in-process.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
#[cfg(feature = "fake-backend")]
pub mod fake;
pub mod image;
pub mod node;
pub mod probes;
pub mod views;

pub use client::{DEFAULT_IMAGE_PREFIX, DEFAULT_MEMORY_MB, MockClient};
pub use image::{Image, ImageDescriptor};
pub use node::Node;
pub use probes::{CachedCount, Coverage, Recache};
pub use views::{
    FLAVORS, FlavorBuckets, NodeFilter, calculate_percentage_to_be_cached, image_counts,
    nodes_by_image,
};
