//! Command-line interface for the speedtest exporter
//!
//! Provides argument parsing and subcommand handling. Every setting flag can
//! also be given through its `SPEEDTEST_EXPORTER_*` environment variable, and
//! explicit flags win over values from `--config`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Config, parse_duration};
use crate::error::AppResult;

/// Prometheus exporter for the Ookla speedtest CLI
#[derive(Parser)]
#[command(name = "speedtest-exporter")]
#[command(version)]
#[command(about = "Prometheus exporter for the Ookla speedtest CLI")]
#[command(
    long_about = "Runs the Ookla speedtest CLI on startup and then on a fixed interval, \
    and serves the latest download, upload, ping and packet loss figures in \
    Prometheus text format."
)]
pub struct Cli {
    /// Optional TOML configuration file
    #[arg(short, long, env = "SPEEDTEST_EXPORTER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// HTTP port to expose statistics via Prometheus [default: 8080]
    #[arg(long, env = "SPEEDTEST_EXPORTER_PORT")]
    pub port: Option<u16>,

    /// How often statistics are collected, e.g. 15m, 1h30m [default: 15m]
    #[arg(long, env = "SPEEDTEST_EXPORTER_FREQUENCY", value_parser = parse_duration)]
    pub frequency: Option<Duration>,

    /// Ookla server id (as listed by `speedtest --servers`); 0 lets the tool choose
    #[arg(long, env = "SPEEDTEST_EXPORTER_SERVER")]
    pub server: Option<u32>,

    /// Path of the Ookla speedtest CLI [default: /usr/bin/speedtest]
    #[arg(long, env = "SPEEDTEST_EXPORTER_PATH")]
    pub path: Option<PathBuf>,

    /// Log level when RUST_LOG is not set [default: info]
    #[arg(long, env = "SPEEDTEST_EXPORTER_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    /// Resolve the effective configuration
    ///
    /// Starts from the config file (or built-in defaults), applies flag
    /// overrides, then validates the result.
    pub fn into_config(&self) -> AppResult<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(interval) = self.frequency {
            config.measurement.set_interval(interval);
        }
        if let Some(server) = self.server {
            config.measurement.set_server_id(server);
        }
        if let Some(path) = &self.path {
            config.measurement.set_speedtest_path(path.clone());
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# Speedtest Exporter Configuration
# ================================
#
# Every value below is optional; the defaults are shown. Command-line flags
# (--port, --frequency, --server, --path, --log-level) override this file.

# ─────────────────────────────────────────────────────────────────────────────
# METRICS ENDPOINT
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port serving Prometheus metrics on / and /metrics
port = 8080

# ─────────────────────────────────────────────────────────────────────────────
# MEASUREMENT
# ─────────────────────────────────────────────────────────────────────────────

[measurement]
# Time between two runs (units: ms, s, m, h; e.g. "90s", "15m", "1h30m").
# One run also happens right after startup.
interval = "15m"

# Path of the Ookla speedtest CLI
speedtest_path = "/usr/bin/speedtest"

# Pin every run to one server (see `speedtest --servers`). Leave unset or 0
# to let the tool pick; its choice may change between runs, which leaves the
# previous server's series in place until it is measured again.
# server_id = 12345

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error" (RUST_LOG overrides)
log_level = "info"
"#
}
