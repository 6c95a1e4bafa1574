//! Prometheus scrape endpoint
//!
//! Serves the current registry snapshot in Prometheus text format. A failed
//! measurement never turns into an error here; scrapes keep seeing the last
//! published values.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use crate::error::AppResult;
use crate::handlers::AppState;

/// Metrics handler for Prometheus scraping
///
/// # Response
///
/// - `200 OK` with metrics in Prometheus text format
/// - `500 Internal Server Error` if encoding the snapshot fails
///
/// # Example
///
/// ```bash
/// curl http://localhost:8080/
/// # HELP speedtest_download_speed The Download Rate in Mbps
/// # TYPE speedtest_download_speed gauge
/// speedtest_download_speed{isp="ACME",server_id="123",server_location="Y",server_name="X"} 100
/// ```
pub async fn handler(State(state): State<AppState>) -> AppResult<Response> {
    let output = state.metrics().gather().inspect_err(|e| {
        tracing::error!(
            error = %e,
            "Failed to gather metrics for Prometheus scraping"
        );
    })?;

    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], output).into_response())
}
