//! Configuration for the Modbus tag bridge.
//!
//! Values are layered: built-in defaults, then an optional JSON5 file, then
//! environment/CLI [`Overrides`].

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tagbridge_framework::{BridgeConfig, BridgeError, LoggingConfig};

use crate::tags::{self, TagDefinition};

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagBridgeConfig {
    /// Device connection settings
    #[serde(default)]
    pub device: DeviceConfig,

    /// Poll loop settings
    #[serde(default)]
    pub bridge: PollConfig,

    /// Sink and config-source endpoints
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Raw tag entries replacing the built-in default list
    #[serde(default)]
    pub tags: Option<Vec<Value>>,
}

/// Modbus TCP device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Host address (IP or hostname)
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port (default: 502)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Modbus unit/slave ID
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connect and per-read timeout in milliseconds
    #[serde(default = "default_device_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_host() -> String {
    "192.168.0.10".to_string()
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_device_timeout_ms() -> u64 {
    3000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            unit_id: default_unit_id(),
            timeout_ms: default_device_timeout_ms(),
        }
    }
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Poll loop timing and failure policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Generate simulated values instead of reading the device
    #[serde(default = "default_demo")]
    pub demo: bool,

    /// Seconds between poll cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds between remote tag config refreshes
    #[serde(default = "default_config_refresh")]
    pub config_refresh_secs: u64,

    /// Consecutive failed cycles before the bridge gives up
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

fn default_demo() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    5
}

fn default_config_refresh() -> u64 {
    60
}

fn default_max_failures() -> u32 {
    5
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            demo: default_demo(),
            poll_interval_secs: default_poll_interval(),
            config_refresh_secs: default_config_refresh(),
            max_consecutive_failures: default_max_failures(),
        }
    }
}

impl PollConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Refresh interval in effect; never shorter than the poll interval.
    pub fn config_refresh(&self) -> Duration {
        Duration::from_secs(self.config_refresh_secs.max(self.poll_interval_secs))
    }
}

/// Upstream HTTP endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Telemetry sink base URL; any path is dropped
    #[serde(default = "default_sink_url")]
    pub sink_url: String,

    /// Tag config source base URL (default: the sink's origin)
    #[serde(default)]
    pub config_url: Option<String>,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_sink_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            sink_url: default_sink_url(),
            config_url: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Origin of the telemetry sink.
    pub fn sink_base(&self) -> Result<Url, BridgeError> {
        origin_of(&self.sink_url)
    }

    /// Base of the config source, falling back to the sink's origin.
    ///
    /// Unlike the sink, an explicit config URL keeps its path prefix.
    pub fn config_base(&self) -> Result<Url, BridgeError> {
        match &self.config_url {
            Some(url) => base_of(url),
            None => self.sink_base(),
        }
    }
}

fn parse_http(raw: &str) -> Result<Url, BridgeError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| BridgeError::validation(format!("invalid URL '{}': {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(BridgeError::validation(format!(
            "URL '{}' must use http or https",
            raw
        )));
    }
    Ok(url)
}

/// Reduce an http(s) URL to its origin, e.g.
/// `http://host:5000/api/plc/update` to `http://host:5000/`.
pub fn origin_of(raw: &str) -> Result<Url, BridgeError> {
    let url = parse_http(raw)?;
    let origin = url.origin().ascii_serialization();
    Url::parse(&format!("{}/", origin))
        .map_err(|e| BridgeError::validation(format!("invalid URL '{}': {}", raw, e)))
}

/// Use an http(s) URL as a base for relative endpoints.
///
/// The path is kept and given a trailing slash so `join` appends to it;
/// query and fragment are dropped.
pub fn base_of(raw: &str) -> Result<Url, BridgeError> {
    let mut url = parse_http(raw)?;
    url.set_query(None);
    url.set_fragment(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Environment/CLI values that win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub demo: Option<bool>,
    pub poll_interval_secs: Option<u64>,
    pub sink_url: Option<String>,
    pub config_url: Option<String>,
}

impl TagBridgeConfig {
    /// Apply overrides, leaving unset fields untouched.
    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(host) = overrides.host {
            self.device.host = host;
        }
        if let Some(port) = overrides.port {
            self.device.port = port;
        }
        if let Some(demo) = overrides.demo {
            self.bridge.demo = demo;
        }
        if let Some(secs) = overrides.poll_interval_secs {
            self.bridge.poll_interval_secs = secs;
        }
        if let Some(url) = overrides.sink_url {
            self.upstream.sink_url = url;
        }
        if let Some(url) = overrides.config_url {
            self.upstream.config_url = Some(url);
        }
    }

    /// Tag list in effect before the first remote fetch.
    pub fn initial_tags(&self) -> Vec<TagDefinition> {
        match &self.tags {
            Some(raw) => tags::normalize(raw),
            None => tags::default_tags(),
        }
    }

    /// Time a cycle in progress may need to finish after shutdown starts.
    ///
    /// Covers a reconnect attempt, one read per register function and the
    /// upload request in flight.
    pub fn shutdown_grace_period(&self) -> Duration {
        self.device.timeout() * 5 + self.upstream.request_timeout() + Duration::from_secs(1)
    }
}

impl BridgeConfig for TagBridgeConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> tagbridge_framework::Result<()> {
        if self.device.host.trim().is_empty() {
            return Err(BridgeError::validation("device host cannot be empty"));
        }
        if self.device.port == 0 {
            return Err(BridgeError::validation("device port must be non-zero"));
        }
        if self.bridge.poll_interval_secs == 0 {
            return Err(BridgeError::validation("poll interval must be at least 1s"));
        }
        if self.bridge.config_refresh_secs == 0 {
            return Err(BridgeError::validation("config refresh interval must be at least 1s"));
        }
        if self.bridge.max_consecutive_failures == 0 {
            return Err(BridgeError::validation(
                "max_consecutive_failures must be at least 1",
            ));
        }

        self.upstream.sink_base()?;
        self.upstream.config_base()?;

        if let Some(raw) = &self.tags {
            let report = tags::normalize_report(raw);
            if let Some((index, reason)) = report.rejected.first() {
                return Err(BridgeError::validation(format!(
                    "tags[{}]: {}",
                    index, reason
                )));
            }
        }

        Ok(())
    }
}
