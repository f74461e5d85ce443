// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # vigil-harness
//!
//! Functional-test driver tying the other vigil crates together.
//!
//! A test creates a [`FunctionalHarness`], writes the service config, starts
//! the mock backend and the service under test, seeds or mutates the mock,
//! waits for convergence and tears everything down:
//!
//! ```rust,ignore
//! use vigil_harness::FunctionalHarness;
//!
//! let mut harness = FunctionalHarness::new(HarnessSettings::from_env()?)?;
//! let options = harness.service_options().percentage_to_cache(0.3);
//! let config = harness.write_service_config(&options)?;
//! harness.start_mock().await?;
//! harness.start_service(Some(&config), None).await?;
//! let total = harness.mock().all_nodes().await?.len();
//! harness.wait_for_cached_nodes(harness.expected_cached(total, 0.3, true)).await?;
//! harness.teardown().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod harness;
pub mod port;
pub mod session;

pub use harness::{DEFAULT_CONFIG_STEM, FunctionalHarness};
pub use port::ephemeral_port;
pub use session::Session;
