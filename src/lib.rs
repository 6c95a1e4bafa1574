//! Speedtest exporter - Prometheus metrics from the Ookla speedtest CLI
//!
//! This library runs the speedtest CLI on a schedule, validates its JSON
//! output and republishes the latest figures as labeled Prometheus metrics.

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod result;
pub mod runner;
pub mod scheduler;
pub mod telemetry;
