//! Configuration synthesis for the service under test.
//!
//! Options are a two-level mapping (section → key → value) serialized into the
//! `[section]` / `key = value` text format the service reads. The synthesizer
//! is structural only: values are written as given, never validated.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};
use crate::ledger::FileLedger;

/// A single scalar option value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Rendered as `True` / `False`.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer, kept apart so values past `i64::MAX` are written as given.
    UInt(u64),
    /// Float, always rendered with a decimal point.
    Float(f64),
    /// Free text, written verbatim.
    Text(String),
}

impl Scalar {
    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::UInt(u) => serde_json::Value::from(*u),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
            // Debug keeps the trailing `.0` on whole floats.
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// An option value: a scalar, or a nested mapping such as an image weight table.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// Plain value.
    Scalar(Scalar),
    /// Nested mapping, rendered as one compact JSON object.
    Mapping(BTreeMap<String, Scalar>),
}

impl OptionValue {
    /// Textual form written to the config file.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Scalar(s) => s.to_string(),
            Self::Mapping(map) => {
                let object: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                serde_json::Value::Object(object).to_string()
            }
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        Self::Scalar(Scalar::Bool(v))
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        Self::Scalar(Scalar::Int(v))
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        Self::Scalar(Scalar::Int(i64::from(v)))
    }
}

impl From<u32> for OptionValue {
    fn from(v: u32) -> Self {
        Self::Scalar(Scalar::Int(i64::from(v)))
    }
}

impl From<u64> for OptionValue {
    fn from(v: u64) -> Self {
        Self::Scalar(Scalar::UInt(v))
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        Self::Scalar(Scalar::Float(v))
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        Self::Scalar(Scalar::Text(v.to_string()))
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        Self::Scalar(Scalar::Text(v))
    }
}

impl From<BTreeMap<String, i64>> for OptionValue {
    fn from(v: BTreeMap<String, i64>) -> Self {
        Self::Mapping(v.into_iter().map(|(k, w)| (k, Scalar::Int(w))).collect())
    }
}

impl From<BTreeMap<String, Scalar>> for OptionValue {
    fn from(v: BTreeMap<String, Scalar>) -> Self {
        Self::Mapping(v)
    }
}

/// Section → key → value, as parsed back from a persisted file.
pub type ParsedConfig = BTreeMap<String, BTreeMap<String, String>>;

/// A full option set for one config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOptions {
    sections: BTreeMap<String, BTreeMap<String, OptionValue>>,
}

impl ConfigOptions {
    /// Creates an empty option set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a section exists, even if it ends up with no keys.
    pub fn section(&mut self, name: impl Into<String>) -> &mut Self {
        self.sections.entry(name.into()).or_default();
        self
    }

    /// Sets `key` in `section`, replacing any previous value.
    pub fn set(
        &mut self,
        section: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<OptionValue>,
    ) -> &mut Self {
        self.sections
            .entry(section.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(
        mut self,
        section: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<OptionValue>,
    ) -> Self {
        self.set(section, key, value);
        self
    }

    /// Looks up a value.
    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&OptionValue> {
        self.sections.get(section).and_then(|s| s.get(key))
    }

    /// Section names in sorted order.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Overlays `other` on top of `self`; keys in `other` win.
    pub fn merge(&mut self, other: &Self) {
        for (section, entries) in &other.sections {
            let target = self.sections.entry(section.clone()).or_default();
            for (key, value) in entries {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    /// Every value in rendered form.
    #[must_use]
    pub fn rendered(&self) -> ParsedConfig {
        self.sections
            .iter()
            .map(|(section, entries)| {
                let entries = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.render()))
                    .collect();
                (section.clone(), entries)
            })
            .collect()
    }

    /// Checks that every name and value survives the persisted format.
    ///
    /// Section names and keys must be non-empty, free of edge whitespace,
    /// line breaks, `=`, `:`, `[` and `]`, and must not start with `#` or `;`.
    /// Rendered values must not start with whitespace, carry a carriage
    /// return, or end their first line with whitespace.
    pub fn validate(&self) -> Result<()> {
        for (section, entries) in &self.sections {
            check_name("section", section)?;
            for (key, value) in entries {
                check_name("key", key)?;
                check_value(section, key, &value.render())?;
            }
        }
        Ok(())
    }

    /// Serializes to the persisted text format.
    #[must_use]
    pub fn to_config_string(&self) -> String {
        let mut out = String::new();
        for (section, entries) in &self.sections {
            out.push('[');
            out.push_str(section);
            out.push_str("]\n");
            for (key, value) in entries {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(&value.render().replace('\n', "\n\t"));
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

fn check_name(kind: &str, name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("is empty")
    } else if name.trim() != name {
        Some("has leading or trailing whitespace")
    } else if name.contains(['=', ':', '[', ']', '\n', '\r']) {
        Some("contains one of `=`, `:`, `[`, `]` or a line break")
    } else if name.starts_with(['#', ';']) {
        Some("starts with a comment character")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(HarnessError::setup(format!("config {kind} {name:?} {reason}"))),
        None => Ok(()),
    }
}

fn check_value(section: &str, key: &str, rendered: &str) -> Result<()> {
    let first_line = rendered.split('\n').next().unwrap_or_default();
    let reason = if rendered.starts_with(char::is_whitespace) {
        Some("starts with whitespace")
    } else if first_line.ends_with(char::is_whitespace) {
        Some("ends its first line with whitespace")
    } else if rendered.contains('\r') {
        Some("contains a carriage return")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(HarnessError::setup(format!(
            "config value for [{section}] {key} {reason}: {rendered:?}"
        ))),
        None => Ok(()),
    }
}

/// Writes `options` to `path` and registers the path in `ledger`.
///
/// Options that would not read back as written are rejected before anything
/// is touched. The path is registered before the write so a failed write
/// still gets cleaned up.
pub fn synthesize(options: &ConfigOptions, path: &Path, ledger: &mut FileLedger) -> Result<PathBuf> {
    options.validate()?;
    ledger.register(path);
    std::fs::write(path, options.to_config_string()).map_err(|e| {
        HarnessError::setup(format!("failed to write config {}: {e}", path.display()))
    })?;
    tracing::info!(path = %path.display(), sections = options.sections.len(), "wrote service config");
    Ok(path.to_path_buf())
}

/// Writes an image weight table as a JSON object and registers the file.
pub fn write_image_weights(
    weights: &BTreeMap<String, i64>,
    path: &Path,
    ledger: &mut FileLedger,
) -> Result<PathBuf> {
    ledger.register(path);
    let body = serde_json::to_string_pretty(weights)
        .map_err(|e| HarnessError::setup(format!("failed to encode image weights: {e}")))?;
    std::fs::write(path, body).map_err(|e| {
        HarnessError::setup(format!("failed to write image weights {}: {e}", path.display()))
    })?;
    tracing::info!(path = %path.display(), images = weights.len(), "wrote image weights");
    Ok(path.to_path_buf())
}

/// Parses the persisted text format back into rendered triples.
pub fn parse_config(text: &str) -> Result<ParsedConfig> {
    let mut parsed = ParsedConfig::new();
    let mut section: Option<String> = None;
    let mut last_key: Option<String> = None;

    for (lineno, line) in text.lines().enumerate() {
        if line.is_empty() {
            last_key = None;
            continue;
        }
        if line.starts_with(['\t', ' ']) {
            if let (Some(sec), Some(key)) = (&section, &last_key) {
                let continuation = line.strip_prefix('\t').unwrap_or_else(|| line.trim_start());
                if let Some(value) = parsed.get_mut(sec).and_then(|s| s.get_mut(key)) {
                    value.push('\n');
                    value.push_str(continuation);
                }
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
        }
        let trimmed = line.trim();
        if trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let name = name.trim().to_string();
            parsed.entry(name.clone()).or_default();
            section = Some(name);
            last_key = None;
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(HarnessError::config(format!(
                "line {}: expected `key = value`, got {trimmed:?}",
                lineno + 1
            )));
        };
        let Some(sec) = &section else {
            return Err(HarnessError::config(format!(
                "line {}: option outside of any section",
                lineno + 1
            )));
        };
        let key = key.trim().to_string();
        parsed
            .entry(sec.clone())
            .or_default()
            .insert(key.clone(), value.trim().to_string());
        last_key = Some(key);
    }
    Ok(parsed)
}

/// Reads and parses a persisted config file.
pub fn read_config(path: &Path) -> Result<ParsedConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

/// Image weights used when a test does not supply its own table.
#[must_use]
pub fn default_image_weights() -> BTreeMap<String, i64> {
    [
        ("OnMetal - CentOS 6", 80),
        ("OnMetal - CentOS 7", 80),
        ("OnMetal - CoreOS (Alpha)", 11),
        ("OnMetal - CoreOS (Beta)", 1),
        ("OnMetal - CoreOS (Stable)", 5),
        ("OnMetal - Debian 7 (Wheezy)", 60),
        ("OnMetal - Debian 8 (Jessie)", 14),
        ("OnMetal - Debian Testing (Stretch)", 2),
        ("OnMetal - Debian Unstable (Sid)", 2),
        ("OnMetal - Fedora 21", 1),
        ("OnMetal - Fedora 22", 2),
        ("OnMetal - Ubuntu 12.04 LTS (Precise Pangolin)", 132),
        ("OnMetal - Ubuntu 14.04 LTS (Trusty Tahr)", 163),
        ("OnMetal - Ubuntu 15.04 (Vivid Vervet)", 3),
    ]
    .into_iter()
    .map(|(name, weight)| (name.to_string(), weight))
    .collect()
}

/// The representative option set for the director service.
///
/// Every knob is overridable; arbitrary extra keys can be layered on with
/// [`with_override`](Self::with_override).
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    endpoint: String,
    /// Run the director without issuing directives.
    pub dry_run: bool,
    /// Poll and directive spacing, in seconds.
    pub interval: u64,
    /// Cache and eject directive rate limit.
    pub rate_limit: u64,
    /// Fraction of unprovisioned nodes to keep cached.
    pub percentage_to_cache: f64,
    /// Image name → weight.
    pub image_weights: BTreeMap<String, i64>,
    /// Weight for images missing from the table.
    pub default_image_weight: i64,
    /// Strategy class the director loads.
    pub strategy: String,
    /// Scout class the director loads.
    pub scout: String,
    overrides: ConfigOptions,
}

impl ServiceOptions {
    /// Default option set pointed at a mock backend base URL (`http://localhost:8123`).
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            dry_run: false,
            interval: 1,
            rate_limit: 100,
            percentage_to_cache: 0.5,
            image_weights: default_image_weights(),
            default_image_weight: 1,
            strategy: "simple_proportional_strategy.SimpleProportionalStrategy".to_string(),
            scout: "onmetal_scout.OnMetalScout".to_string(),
            overrides: ConfigOptions::new(),
        }
    }

    /// Sets dry-run mode.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sets poll/directive spacing in seconds.
    #[must_use]
    pub const fn interval(mut self, secs: u64) -> Self {
        self.interval = secs;
        self
    }

    /// Sets the directive rate limit.
    #[must_use]
    pub const fn rate_limit(mut self, limit: u64) -> Self {
        self.rate_limit = limit;
        self
    }

    /// Sets the fraction of nodes to cache.
    #[must_use]
    pub const fn percentage_to_cache(mut self, pct: f64) -> Self {
        self.percentage_to_cache = pct;
        self
    }

    /// Replaces the image weight table.
    #[must_use]
    pub fn image_weights(mut self, weights: BTreeMap<String, i64>) -> Self {
        self.image_weights = weights;
        self
    }

    /// Sets the weight for unlisted images.
    #[must_use]
    pub const fn default_image_weight(mut self, weight: i64) -> Self {
        self.default_image_weight = weight;
        self
    }

    /// Sets the strategy class.
    #[must_use]
    pub fn strategy(mut self, class: impl Into<String>) -> Self {
        self.strategy = class.into();
        self
    }

    /// Layers an arbitrary key on top of the generated set.
    #[must_use]
    pub fn with_override(
        mut self,
        section: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<OptionValue>,
    ) -> Self {
        self.overrides.set(section, key, value);
        self
    }

    /// Base URL of the mock backend these options point at.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Builds the full section/key/value set.
    #[must_use]
    pub fn to_options(&self) -> ConfigOptions {
        let identity = format!("{}/identity/v2.0", self.endpoint);
        let mut options = ConfigOptions::new();
        options
            .set("director", "scout", self.scout.as_str())
            .set("director", "dry_run", self.dry_run)
            .set("director", "poll_spacing", self.interval)
            .set("director", "directive_spacing", self.interval)
            .set("director", "cache_directive_rate_limit", self.rate_limit)
            .set("director", "cache_directive_limiting_period", self.interval)
            .set("director", "eject_directive_rate_limit", self.rate_limit)
            .set("director", "eject_directive_limiting_period", self.interval)
            .set("director", "log_statistics", true)
            .set("client_wrapper", "call_max_retries", 3)
            .set("client_wrapper", "call_retry_interval", 3)
            .set("client_wrapper", "os_tenant_name", 232323)
            .set("client_wrapper", "os_username", "test-user")
            .set("client_wrapper", "os_password", "test-password")
            .set("client_wrapper", "region_name", "ORD")
            .set("client_wrapper", "service_name", "cloudServersOpenStack")
            .set("client_wrapper", "auth_system", "rackspace")
            .set("client_wrapper", "os_api_url", identity.clone())
            .section("nova")
            .set("ironic", "admin_username", "test-admin")
            .set("ironic", "admin_password", "test-admin-password")
            .set("ironic", "admin_tenant_name", 99999)
            .set("ironic", "admin_url", identity)
            .set("ironic", "api_endpoint", format!("{}/ironic/v1", self.endpoint))
            .set("glance", "api_endpoint", format!("{}/glance/v2", self.endpoint))
            .set("glance", "admin_auth_token", "any-token-works")
            .set(
                "simple_proportional_strategy",
                "percentage_to_cache",
                self.percentage_to_cache,
            )
            .set("strategy", "module_class", self.strategy.as_str())
            .set("strategy", "image_weights", self.image_weights.clone())
            .set("strategy", "default_image_weight", self.default_image_weight);
        options.merge(&self.overrides);
        options
    }
}
