//! Vigil: functional-test harness for a caching director service.
//!
//! Starts a mock infrastructure backend and the service under test as child
//! processes, feeds the service a synthesized config, and polls the mock until
//! the service's caching decisions converge.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use vigil::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! vigil::init_tracing();
//! let mut harness = FunctionalHarness::new(HarnessSettings::from_env()?)?;
//! harness.start_mock().await?;
//! harness.start_service(None, None).await?;
//! harness.wait_for_successful_recache().await?;
//! harness.teardown().await
//! # }
//! ```

pub use vigil_core as core;
pub use vigil_harness as harness;
pub use vigil_mock as mock;
pub use vigil_platform as platform;

/// Prelude module for common imports.
pub mod prelude {
    pub use vigil_core::{
        ConfigOptions, HarnessError, HarnessSettings, PollSettings, Result, ServiceOptions,
    };
    pub use vigil_harness::{DEFAULT_CONFIG_STEM, FunctionalHarness, Session};
    pub use vigil_mock::{
        DEFAULT_MEMORY_MB, ImageDescriptor, MockClient, Node, NodeFilter,
        calculate_percentage_to_be_cached,
    };
    pub use vigil_platform::{LaunchSpec, ProcessRole, SupervisedProcess};
}

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `vigil=info`.
///
/// Returns false if a global subscriber was already set, so it is safe to
/// call from every test.
pub fn init_tracing() -> bool {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vigil=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .is_ok()
}
