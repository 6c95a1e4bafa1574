//! HTTP request handlers for the metrics endpoint

use axum::{Router, routing::get};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::metrics::Metrics;
use crate::scheduler::SchedulerState;

pub mod health;
pub mod metrics;

/// Application state shared across all handlers
///
/// All fields are cheap to clone for Axum handlers.
#[derive(Clone)]
pub struct AppState {
    metrics: Arc<Metrics>,
    scheduler: watch::Receiver<SchedulerState>,
}

impl AppState {
    /// Create a new AppState from the shared registry and the scheduler's state feed
    pub fn new(metrics: Arc<Metrics>, scheduler: watch::Receiver<SchedulerState>) -> Self {
        Self { metrics, scheduler }
    }

    /// Get reference to the metrics registry
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Current scheduler state
    pub fn scheduler_state(&self) -> SchedulerState {
        *self.scheduler.borrow()
    }
}

/// Build the HTTP router
///
/// - `GET /` and `GET /metrics`: Prometheus text exposition
/// - `GET /health`: liveness plus scheduler state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(metrics::handler))
        .route("/metrics", get(metrics::handler))
        .route("/health", get(health::handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
