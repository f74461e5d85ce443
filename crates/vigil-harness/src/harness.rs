//! Functional-test driver.
//!
//! One [`FunctionalHarness`] per test: it reserves a port, writes the service
//! config, starts the mock backend and the service under test, and waits for
//! the mock's node table to converge. Everything is awaited in sequence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use vigil_core::{
    ConfigOptions, HarnessError, HarnessSettings, Placeholders, PollSettings, Result,
    ServiceOptions, poll_until, synthesize, write_image_weights,
};
use vigil_mock::{CachedCount, Coverage, MockClient, Recache, calculate_percentage_to_be_cached};
use vigil_platform::{LaunchSpec, ProcessRole};

use crate::port::ephemeral_port;
use crate::session::Session;

/// Stem of the config written when the service is started without one.
pub const DEFAULT_CONFIG_STEM: &str = "test_default";

/// Driver for one functional test.
#[derive(Debug)]
pub struct FunctionalHarness {
    settings: HarnessSettings,
    session: Session,
    mock: MockClient,
}

impl FunctionalHarness {
    /// Creates a harness on a freshly reserved ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns a config error for invalid settings, or a setup error if no
    /// port can be reserved.
    pub fn new(settings: HarnessSettings) -> Result<Self> {
        let port = ephemeral_port()?;
        Self::with_port(settings, port)
    }

    /// Creates a harness whose mock lives on `port`.
    ///
    /// # Errors
    ///
    /// Returns a config error for invalid settings.
    pub fn with_port(settings: HarnessSettings, port: u16) -> Result<Self> {
        settings.validate()?;
        let base_url = format!("{}:{port}", settings.mock.host.trim_end_matches('/'));
        let mock = MockClient::new(base_url).with_image_prefix(settings.layout.image_prefix.as_str());
        let session = Session::new(port, settings.timing.stop_grace);
        tracing::info!(session = %session.id(), port, mock = %mock.base_url(), "harness ready");
        Ok(Self {
            settings,
            session,
            mock,
        })
    }

    /// Port namespacing this run.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.session.port()
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    /// Client for the mock backend.
    #[must_use]
    pub const fn mock(&self) -> &MockClient {
        &self.mock
    }

    /// The session holding this run's processes and files.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// `<work_dir>/<stem><port>.conf`.
    #[must_use]
    pub fn config_file_name(&self, stem: &str) -> PathBuf {
        self.settings
            .layout
            .work_dir
            .join(format!("{stem}{}.conf", self.port()))
    }

    /// `<work_dir>/<pidfile_stem><port>.pid`.
    #[must_use]
    pub fn pidfile(&self) -> PathBuf {
        self.settings
            .layout
            .work_dir
            .join(format!("{}{}.pid", self.settings.mock.pidfile_stem, self.port()))
    }

    /// Default service options pointed at this run's mock.
    #[must_use]
    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions::new(self.mock.base_url())
    }

    /// Writes `options` to `path` and tracks the file.
    pub fn write_config(&mut self, options: &ConfigOptions, path: &Path) -> Result<PathBuf> {
        synthesize(options, path, self.session.files_mut())
    }

    /// Writes `options` to [`config_file_name`](Self::config_file_name) of the
    /// configured stem and tracks the file.
    pub fn write_service_config(&mut self, options: &ServiceOptions) -> Result<PathBuf> {
        let path = self.config_file_name(&self.settings.layout.config_stem);
        self.write_config(&options.to_options(), &path)
    }

    /// Writes an image weight table as JSON to `<work_dir>/<stem><port>.json`
    /// and tracks the file.
    pub fn write_image_weights(&mut self, weights: &BTreeMap<String, i64>, stem: &str) -> Result<PathBuf> {
        let path = self
            .settings
            .layout
            .work_dir
            .join(format!("{stem}{}.json", self.port()));
        write_image_weights(weights, &path, self.session.files_mut())
    }

    /// Starts the mock backend and waits for its readiness marker.
    pub async fn start_mock(&mut self) -> Result<()> {
        let pidfile = self.pidfile();
        let values = Placeholders {
            port: self.port(),
            pidfile: Some(pidfile.clone()),
            config: None,
        };
        let spec = LaunchSpec::from_template(ProcessRole::MockBackend, &self.settings.mock.launch(), &values)
            .aux_file(pidfile);
        self.session
            .launch(spec, self.settings.timing.readiness_timeout)
            .await?;
        Ok(())
    }

    /// Starts the service under test and waits for its readiness marker.
    ///
    /// Without `config`, the default option set is written to
    /// [`config_file_name`](Self::config_file_name)`("test_default")` first.
    /// `marker` overrides the configured readiness marker.
    pub async fn start_service(&mut self, config: Option<&Path>, marker: Option<&str>) -> Result<()> {
        let config = match config {
            Some(path) => path.to_path_buf(),
            None => {
                let path = self.config_file_name(DEFAULT_CONFIG_STEM);
                let options = self.service_options().to_options();
                self.write_config(&options, &path)?
            }
        };
        if !config.exists() {
            return Err(HarnessError::setup(format!(
                "service config {} does not exist",
                config.display()
            )));
        }

        let values = Placeholders {
            port: self.port(),
            pidfile: None,
            config: Some(config),
        };
        let mut spec =
            LaunchSpec::from_template(ProcessRole::ServiceUnderTest, &self.settings.service.launch(), &values);
        if let Some(marker) = marker {
            spec.readiness_marker = marker.to_string();
        }
        self.session
            .launch(spec, self.settings.timing.readiness_timeout)
            .await?;
        Ok(())
    }

    /// Waits with the configured poll settings until exactly `count` nodes are cached.
    pub async fn wait_for_cached_nodes(&self, count: usize) -> Result<usize> {
        self.wait_for_cached_nodes_with(count, self.settings.poll()).await
    }

    /// Waits until exactly `count` nodes are cached.
    pub async fn wait_for_cached_nodes_with(&self, count: usize, settings: PollSettings) -> Result<usize> {
        let mut probe = CachedCount::new(&self.mock, count);
        poll_until(&mut probe, settings).await
    }

    /// Waits with the configured poll settings until the cached images are
    /// exactly the harness images in the mock.
    pub async fn wait_for_successful_recache(&self) -> Result<Coverage> {
        self.wait_for_successful_recache_with(self.settings.poll()).await
    }

    /// Waits until the cached images are exactly the harness images in the mock.
    pub async fn wait_for_successful_recache_with(&self, settings: PollSettings) -> Result<Coverage> {
        let mut probe = Recache::new(&self.mock);
        poll_until(&mut probe, settings).await
    }

    /// Expected cached count for `total` nodes at `percentage`, using the
    /// configured flavor count.
    #[must_use]
    pub fn expected_cached(&self, total: usize, percentage: f64, by_flavor: bool) -> usize {
        calculate_percentage_to_be_cached(total, percentage, self.settings.layout.flavors, by_flavor)
    }

    /// Stops every process and removes every tracked file. Idempotent.
    pub async fn teardown(&mut self) -> Result<()> {
        self.session.teardown().await
    }
}
