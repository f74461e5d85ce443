// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # vigil-platform
//!
//! Process supervision for the vigil harness.
//!
//! Both the mock backend and the service under test are long-lived child
//! processes that announce readiness on their output. This crate starts them,
//! scans for the announcement within a bounded budget and stops them with
//! SIGTERM, escalating to SIGKILL.
//!
//! ## Example
//!
//! ```rust,ignore
//! use vigil_platform::{LaunchSpec, ProcessRole, SupervisedProcess};
//!
//! let spec = LaunchSpec::new(ProcessRole::MockBackend, "twistd", "Starting factory")
//!     .args(["-n", "mimic", "-l", "8900"]);
//! let mut process = SupervisedProcess::spawn(spec)?;
//! process.wait_ready(Duration::from_secs(30)).await?;
//! process.stop(Duration::from_secs(5)).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod supervisor;

pub use error::{PlatformError, Result};
#[cfg(unix)]
pub use supervisor::process_exists;
pub use supervisor::{
    LaunchSpec, ProcessRole, Readiness, SupervisedProcess, remove_aux_file,
};
