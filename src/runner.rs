//! One measurement cycle against the speedtest CLI
//!
//! Spawns the tool, parses and validates its JSON output, publishes it to
//! [`Metrics`] and records the cycle's outcome exactly once.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;

use crate::config::MeasurementConfig;
use crate::error::MeasurementError;
use crate::metrics::{Metrics, Outcome};
use crate::result::SpeedtestResult;

/// Something the scheduler can run once per tick
#[async_trait]
pub trait Measurement: Send + Sync {
    /// Run one measurement cycle
    async fn run(&self) -> Result<(), MeasurementError>;
}

/// Records the cycle outcome when dropped
///
/// Starts out as `error`; only an explicit `succeed()` flips it to `ok`. Every
/// exit path, early `?` returns included, is therefore counted exactly once.
struct OutcomeGuard<'a> {
    metrics: &'a Metrics,
    outcome: Outcome,
}

impl<'a> OutcomeGuard<'a> {
    fn new(metrics: &'a Metrics) -> Self {
        Self {
            metrics,
            outcome: Outcome::Error,
        }
    }

    fn succeed(&mut self) {
        self.outcome = Outcome::Ok;
    }
}

impl Drop for OutcomeGuard<'_> {
    fn drop(&mut self) {
        self.metrics.record_outcome(self.outcome);
    }
}

/// Runs the speedtest CLI and publishes its result
pub struct SpeedtestRunner {
    command: PathBuf,
    server_id: Option<u32>,
    metrics: Arc<Metrics>,
}

impl SpeedtestRunner {
    /// Create a runner for the given binary
    ///
    /// A `server_id` of `Some(0)` is treated like `None`: the tool picks a
    /// server itself, which may differ from run to run.
    pub fn new(command: impl Into<PathBuf>, server_id: Option<u32>, metrics: Arc<Metrics>) -> Self {
        Self {
            command: command.into(),
            server_id: server_id.filter(|id| *id > 0),
            metrics,
        }
    }

    /// Build a runner from the measurement section of the configuration
    pub fn from_config(config: &MeasurementConfig, metrics: Arc<Metrics>) -> Self {
        Self::new(config.speedtest_path(), config.server_id(), metrics)
    }

    /// Path of the speedtest binary
    pub fn command(&self) -> &Path {
        &self.command
    }

    /// Pinned server id, if any
    pub fn server_id(&self) -> Option<u32> {
        self.server_id
    }

    /// Command-line arguments passed to the tool
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--accept-license".to_string(),
            "--progress=no".to_string(),
            "--format=json".to_string(),
        ];
        if let Some(id) = self.server_id {
            args.push("--server-id".to_string());
            args.push(id.to_string());
        }
        args
    }

    /// Execute the tool and return its stdout
    async fn execute(&self) -> Result<Vec<u8>, MeasurementError> {
        let path = self.command.display().to_string();

        let output = Command::new(&self.command)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| MeasurementError::Spawn {
                path: path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(MeasurementError::exit_status(
                path,
                output.status.code(),
                &output.stderr,
            ));
        }

        tracing::debug!(
            stdout_bytes = output.stdout.len(),
            "Speedtest process exited successfully"
        );
        Ok(output.stdout)
    }
}

/// Log the human-readable summary of a result
///
/// Only complete results are summarized; partial documents are skipped
/// instead of failing mid-log.
fn log_summary(result: &SpeedtestResult) {
    let Ok(complete) = result.validate() else {
        return;
    };
    for line in complete.to_string().lines() {
        tracing::info!("{}", line);
    }
}

#[async_trait]
impl Measurement for SpeedtestRunner {
    async fn run(&self) -> Result<(), MeasurementError> {
        tracing::info!(command = %self.command.display(), "Starting speed test");
        let mut outcome = OutcomeGuard::new(&self.metrics);
        let start = Instant::now();

        if let Some(id) = self.server_id {
            tracing::info!(server_id = id, "Using pinned speedtest server");
        }

        let stdout = self.execute().await?;
        let result = SpeedtestResult::parse(&stdout)?;

        log_summary(&result);
        let elapsed = start.elapsed();
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Finished in {:?}", elapsed);

        self.metrics.update(&result)?;
        outcome.succeed();
        Ok(())
    }
}
