// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # vigil-core
//!
//! Core primitives for the vigil functional-test harness.
//!
//! - [`options`]: config synthesis for the service under test
//! - [`ledger::FileLedger`]: the per-session tracked-file set
//! - [`poll`]: bounded, fixed-interval convergence polling
//! - [`settings::HarnessSettings`]: where the binaries are and how long to wait
//! - [`error::HarnessError`]: the failure taxonomy every crate reports through
//!
//! ## Example
//!
//! ```rust,ignore
//! use vigil_core::{ConfigOptions, FileLedger, synthesize};
//!
//! let mut ledger = FileLedger::new();
//! let options = ConfigOptions::new().with("director", "dry_run", true);
//! synthesize(&options, Path::new("test4242.conf"), &mut ledger)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod ledger;
pub mod options;
pub mod poll;
pub mod settings;

pub use error::{HarnessError, Result};
pub use ledger::{FileLedger, RemovalFailure};
pub use options::{
    ConfigOptions, OptionValue, ParsedConfig, Scalar, ServiceOptions, default_image_weights,
    parse_config, read_config, synthesize, write_image_weights,
};
pub use poll::{Condition, Expect, PollSettings, Probe, poll_until};
pub use settings::{
    HarnessSettings, LaunchTemplate, LayoutSettings, MockSettings, Placeholders, SETTINGS_ENV,
    ServiceSettings, TimingSettings,
};
