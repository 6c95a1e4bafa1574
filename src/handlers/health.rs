//! Health check endpoint
//!
//! Liveness for container orchestrators, plus a glance at the measurement loop.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;
use crate::metrics::Outcome;
use crate::scheduler::SchedulerState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Scheduler state: "idle", "running", "waiting" or "cancelled"
    pub scheduler: SchedulerState,
    /// Successful measurement cycles since startup
    pub measurements_ok: u64,
    /// Failed measurement cycles since startup
    pub measurements_failed: u64,
}

/// Health check handler
///
/// Always 200 OK while the process serves HTTP; failed measurements are
/// reported in the body, not in the status code.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let metrics = state.metrics();

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            scheduler: state.scheduler_state(),
            measurements_ok: metrics.outcome_count(Outcome::Ok),
            measurements_failed: metrics.outcome_count(Outcome::Error),
        }),
    )
}
