//! Harness settings.
//!
//! Where the external binaries live, how to launch them, what their readiness
//! lines look like, and how long to wait. Loaded from TOML; every field has a
//! default so an empty file (or no file) is a working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HarnessError, Result};
use crate::poll::PollSettings;

/// Environment variable naming a settings file.
pub const SETTINGS_ENV: &str = "VIGIL_CONFIG";

/// Top-level harness settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarnessSettings {
    /// Mock backend launch settings.
    #[serde(default)]
    pub mock: MockSettings,

    /// Service-under-test launch settings.
    #[serde(default)]
    pub service: ServiceSettings,

    /// Timeouts and intervals.
    #[serde(default)]
    pub timing: TimingSettings,

    /// File layout and naming.
    #[serde(default)]
    pub layout: LayoutSettings,
}

impl HarnessSettings {
    /// Validates the settings.
    ///
    /// # Errors
    /// Returns an error if the settings cannot drive a test.
    pub fn validate(&self) -> Result<()> {
        self.mock.launch().validate("mock")?;
        self.service.launch().validate("service")?;
        if self.mock.host.is_empty() {
            return Err(HarnessError::config("mock.host cannot be empty"));
        }
        if self.timing.poll_interval.is_zero() {
            return Err(HarnessError::config("timing.poll_interval must be greater than 0"));
        }
        if self.timing.readiness_timeout.is_zero() {
            return Err(HarnessError::config(
                "timing.readiness_timeout must be greater than 0",
            ));
        }
        if self.layout.flavors == 0 {
            return Err(HarnessError::config("layout.flavors must be greater than 0"));
        }
        Ok(())
    }

    /// Loads settings from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| HarnessError::config(format!("failed to read settings: {e}")))?;
        Self::parse(&content)
    }

    /// Parses settings from TOML text.
    ///
    /// # Errors
    /// Returns an error if the text cannot be parsed or validated.
    pub fn parse(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)
            .map_err(|e| HarnessError::config(format!("failed to parse settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads the file named by `VIGIL_CONFIG`, or defaults when it is unset.
    ///
    /// # Errors
    /// Returns an error if the named file is unusable.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(SETTINGS_ENV) {
            Some(path) => {
                tracing::debug!(path = ?path, "loading harness settings");
                Self::load(PathBuf::from(path))
            }
            None => Ok(Self::default()),
        }
    }

    /// Poll settings derived from the timing section.
    #[must_use]
    pub const fn poll(&self) -> PollSettings {
        PollSettings::new(self.timing.poll_interval, self.timing.poll_timeout)
    }
}

/// How to launch one external process, resolved from a settings section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTemplate {
    /// Executable name or path.
    pub program: String,
    /// Arguments; `{port}`, `{pidfile}` and `{config}` are substituted.
    pub args: Vec<String>,
    /// Substring of an output line that signals readiness.
    pub readiness_marker: String,
    /// Also scan standard error for the marker.
    pub merge_stderr: bool,
}

/// Values substituted into a [`LaunchTemplate`].
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    /// Ephemeral port for this run.
    pub port: u16,
    /// Pidfile handed to the child, if any.
    pub pidfile: Option<PathBuf>,
    /// Config file handed to the child, if any.
    pub config: Option<PathBuf>,
}

impl LaunchTemplate {
    fn validate(&self, name: &str) -> Result<()> {
        if self.program.is_empty() {
            return Err(HarnessError::config(format!("{name}.program cannot be empty")));
        }
        if self.readiness_marker.is_empty() {
            return Err(HarnessError::config(format!(
                "{name}.readiness_marker cannot be empty"
            )));
        }
        Ok(())
    }

    /// Arguments with placeholders filled in.
    #[must_use]
    pub fn render_args(&self, values: &Placeholders) -> Vec<String> {
        let pidfile = values
            .pidfile
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let config = values
            .config
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{port}", &values.port.to_string())
                    .replace("{pidfile}", &pidfile)
                    .replace("{config}", &config)
            })
            .collect()
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| (*a).to_string()).collect()
}

/// Mock backend settings. Missing keys fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockSettings {
    /// Executable name or path.
    pub program: String,
    /// Arguments; `{port}` and `{pidfile}` are substituted.
    pub args: Vec<String>,
    /// Substring of an output line that signals readiness.
    pub readiness_marker: String,
    /// Also scan standard error for the marker.
    pub merge_stderr: bool,
    /// Scheme and host the mock listens on; the port is appended.
    pub host: String,
    /// Pidfile name stem; the port and `.pid` are appended.
    pub pidfile_stem: String,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            program: "twistd".to_string(),
            args: owned(&["-n", "--pidfile={pidfile}", "mimic", "-l", "{port}"]),
            readiness_marker: "Starting factory <twisted.web.server.Site instance".to_string(),
            merge_stderr: false,
            host: "http://localhost".to_string(),
            pidfile_stem: "twistd".to_string(),
        }
    }
}

impl MockSettings {
    /// Launch template for the mock backend.
    #[must_use]
    pub fn launch(&self) -> LaunchTemplate {
        LaunchTemplate {
            program: self.program.clone(),
            args: self.args.clone(),
            readiness_marker: self.readiness_marker.clone(),
            merge_stderr: self.merge_stderr,
        }
    }
}

/// Service-under-test settings. Missing keys fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Executable name or path.
    pub program: String,
    /// Arguments; `{config}` and `{port}` are substituted.
    pub args: Vec<String>,
    /// Substring of an output line that signals readiness.
    pub readiness_marker: String,
    /// Also scan standard error for the marker.
    pub merge_stderr: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            program: "arsenal-director".to_string(),
            args: owned(&["--config-file", "{config}", "-v"]),
            readiness_marker: "Started Arsenal service".to_string(),
            merge_stderr: true,
        }
    }
}

impl ServiceSettings {
    /// Launch template for the service under test.
    #[must_use]
    pub fn launch(&self) -> LaunchTemplate {
        LaunchTemplate {
            program: self.program.clone(),
            args: self.args.clone(),
            readiness_marker: self.readiness_marker.clone(),
            merge_stderr: self.merge_stderr,
        }
    }
}

/// Timeouts and intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Budget for a child to print its readiness marker.
    #[serde(default = "default_readiness_timeout")]
    #[serde(with = "humantime_serde")]
    pub readiness_timeout: Duration,

    /// Convergence poll interval.
    #[serde(default = "default_poll_interval")]
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Convergence poll timeout.
    #[serde(default = "default_poll_timeout")]
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,

    /// Grace period between SIGTERM and SIGKILL at teardown.
    #[serde(default = "default_stop_grace")]
    #[serde(with = "humantime_serde")]
    pub stop_grace: Duration,
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(5)
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            readiness_timeout: default_readiness_timeout(),
            poll_interval: default_poll_interval(),
            poll_timeout: default_poll_timeout(),
            stop_grace: default_stop_grace(),
        }
    }
}

/// File layout and naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSettings {
    /// Directory generated files are written to.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Name stem for generated config files.
    #[serde(default = "default_config_stem")]
    pub config_stem: String,

    /// Name prefix of images the harness cares about.
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,

    /// Number of flavor classes nodes are spread across.
    #[serde(default = "default_flavors")]
    pub flavors: usize,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_config_stem() -> String {
    "test".to_string()
}

fn default_image_prefix() -> String {
    "OnMetal".to_string()
}

fn default_flavors() -> usize {
    3
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            config_stem: default_config_stem(),
            image_prefix: default_image_prefix(),
            flavors: default_flavors(),
        }
    }
}

/// Serde helper for humantime durations.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
