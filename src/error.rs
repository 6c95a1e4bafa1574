//! Error types for the speedtest exporter
//!
//! `AppError` covers startup and HTTP-facing failures and implements
//! `IntoResponse` for Axum handlers. `MeasurementError` covers a single
//! measurement cycle; every variant is recoverable and only ever ends up in
//! logs and in the `error` outcome counter.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use thiserror::Error;

use crate::result::MissingField;

/// Longest stderr excerpt kept in an `ExitStatus` error
const STDERR_EXCERPT_LIMIT: usize = 512;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Cannot bind metrics endpoint to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Handlers only ever return `Metrics`; the startup variants end the process
/// before the server runs.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.to_string(),
        }));

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;

/// Failure of one measurement cycle
#[derive(Error, Debug)]
pub enum MeasurementError {
    #[error("Failed to spawn speedtest at {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Speedtest at {path} exited with {}: {stderr}", exit_code_display(.code))]
    ExitStatus {
        path: String,
        /// `None` when the process was terminated by a signal
        code: Option<i32>,
        stderr: String,
    },

    #[error("Cannot parse speedtest output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Incomplete speedtest result: {0}")]
    MissingField(#[from] MissingField),
}

impl MeasurementError {
    /// Build an `ExitStatus` error, keeping only a bounded stderr excerpt
    pub fn exit_status(path: impl Into<String>, code: Option<i32>, stderr: &[u8]) -> Self {
        let text = String::from_utf8_lossy(stderr);
        let trimmed = text.trim();
        let stderr = match trimmed.char_indices().nth(STDERR_EXCERPT_LIMIT) {
            Some((cut, _)) => format!("{}...", &trimmed[..cut]),
            None => trimmed.to_string(),
        };

        Self::ExitStatus {
            path: path.into(),
            code,
            stderr,
        }
    }

    /// Short machine-readable kind, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } | Self::ExitStatus { .. } => "execution",
            Self::Parse(_) => "parse",
            Self::MissingField(_) => "missing_field",
        }
    }
}

fn exit_code_display(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
