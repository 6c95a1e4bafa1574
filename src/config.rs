//! Configuration management for the speedtest exporter
//!
//! Settings come from an optional TOML file, then command-line flags or their
//! environment variables override individual values (see [`crate::cli`]).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_SPEEDTEST_PATH: &str = "/usr/bin/speedtest";
/// Longest accepted interval, roughly 292 years (`i64::MAX` nanoseconds)
pub const MAX_INTERVAL: Duration = Duration::from_nanos(i64::MAX as u64);

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub measurement: MeasurementConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// How and how often the speedtest CLI is run
///
/// Fields are private; values are checked by `Config::validate()` and read
/// through accessors.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeasurementConfig {
    /// Time between two scheduled runs, e.g. "15m" or "1h30m"
    #[serde(
        default = "default_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    interval: Duration,
    #[serde(default = "default_speedtest_path")]
    speedtest_path: PathBuf,
    /// Pin runs to one server; absent or 0 lets the tool choose
    #[serde(default)]
    server_id: Option<u32>,
}

impl MeasurementConfig {
    pub fn new(interval: Duration, speedtest_path: impl Into<PathBuf>, server_id: Option<u32>) -> Self {
        Self {
            interval,
            speedtest_path: speedtest_path.into(),
            server_id,
        }
    }

    /// Time between two scheduled runs
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Path of the speedtest binary
    pub fn speedtest_path(&self) -> &Path {
        &self.speedtest_path
    }

    /// Configured server id, `None` when the tool should auto-select
    pub fn server_id(&self) -> Option<u32> {
        self.server_id.filter(|id| *id > 0)
    }

    pub(crate) fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub(crate) fn set_speedtest_path(&mut self, path: PathBuf) {
        self.speedtest_path = path;
    }

    pub(crate) fn set_server_id(&mut self, server_id: u32) {
        self.server_id = Some(server_id);
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            speedtest_path: default_speedtest_path(),
            server_id: None,
        }
    }
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_speedtest_path() -> PathBuf {
    PathBuf::from(DEFAULT_SPEEDTEST_PATH)
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Parse a Go-style duration such as "15m", "90s", "1h30m" or "250ms"
///
/// A bare number is rejected; every component needs a unit.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let text = input.trim();
    if text.is_empty() {
        return Err("duration is empty".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| format!("missing unit in duration '{}'", text))?;
        if digits_end == 0 {
            return Err(format!("expected a number in duration '{}'", text));
        }
        let value: f64 = rest[..digits_end]
            .parse()
            .map_err(|_| format!("invalid number in duration '{}'", text))?;

        let after = &rest[digits_end..];
        let unit_end = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());
        let seconds_per_unit = match &after[..unit_end] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            other => {
                return Err(format!(
                    "unknown unit '{}' in duration '{}' (expected ms, s, m or h)",
                    other, text
                ));
            }
        };

        let component = Duration::try_from_secs_f64(value * seconds_per_unit)
            .map_err(|e| format!("duration '{}' out of range: {}", text, e))?;
        total = total
            .checked_add(component)
            .filter(|sum| *sum <= MAX_INTERVAL)
            .ok_or_else(|| format!("duration '{}' out of range", text))?;
        rest = &after[unit_end..];
    }

    Ok(total)
}

/// Render a duration in the same format `parse_duration` accepts
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }

    let mut secs = duration.as_secs();
    let mut out = String::new();
    for (unit, size) in [("h", 3600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    out
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_duration(&text).map_err(serde::de::Error::custom)
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*duration))
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        config
            .validate()
            .map_err(|e| AppError::Config(format!("{}: {}", path_display, e)))?;

        Ok(config)
    }

    /// Validate configuration after parsing or after applying overrides
    pub fn validate(&self) -> AppResult<()> {
        if self.measurement.interval.is_zero() {
            return Err(AppError::Config(
                "measurement.interval must be greater than 0".to_string(),
            ));
        }

        if self.measurement.interval > MAX_INTERVAL {
            return Err(AppError::Config(format!(
                "measurement.interval must be at most {}",
                format_duration(MAX_INTERVAL)
            )));
        }

        if self.measurement.speedtest_path.as_os_str().is_empty() {
            return Err(AppError::Config(
                "measurement.speedtest_path must not be empty".to_string(),
            ));
        }

        if self.server.host.parse::<std::net::IpAddr>().is_err() {
            return Err(AppError::Config(format!(
                "server.host '{}' is not a valid IP address",
                self.server.host
            )));
        }

        let level = self.observability.log_level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(AppError::Config(format!(
                "observability.log_level '{}' is invalid, expected one of {:?}",
                self.observability.log_level, LOG_LEVELS
            )));
        }

        Ok(())
    }

    /// Socket address the metrics endpoint binds to
    pub fn listen_addr(&self) -> AppResult<std::net::SocketAddr> {
        let ip = self.server.host.parse::<std::net::IpAddr>().map_err(|e| {
            AppError::Config(format!("server.host '{}': {}", self.server.host, e))
        })?;
        Ok(std::net::SocketAddr::new(ip, self.server.port))
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
