//! Prometheus metrics for speedtest results
//!
//! This module owns the process-lifetime registry that holds:
//! - Latest download/upload/ping figures per server, labeled by ISP and server
//! - A counter of measurement outcomes (`ok` / `error`)
//! - Standard `process_*` metrics of the exporter itself (Linux only)
//!
//! Metrics are exposed on `/` and `/metrics` in Prometheus text format.
//!
//! # Staleness
//!
//! Gauges are last-write-wins per label tuple. When the tool switches to a
//! different server the series of the previous server are not removed; they
//! keep their last value until that server is measured again or the process
//! restarts. Downstream queries should select on the most recent timestamp.

use parking_lot::RwLock;
use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::result::{MissingField, SpeedtestResult};

const NAMESPACE: &str = "speedtest";

const SERIES_LABELS: [&str; 4] = ["isp", "server_id", "server_name", "server_location"];
const LATENCY_LABELS: [&str; 5] = [
    "isp",
    "server_id",
    "server_name",
    "server_location",
    "latency",
];

/// Outcome of one measurement cycle, used as the `status` label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Error,
}

impl Outcome {
    /// Convert outcome to Prometheus label string
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Error => "error",
        }
    }
}

/// Which latency statistic a `*_latency` series carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyKind {
    Iqm,
    Low,
    High,
}

impl LatencyKind {
    /// Convert latency kind to Prometheus label string
    pub fn as_str(&self) -> &'static str {
        match self {
            LatencyKind::Iqm => "iqm",
            LatencyKind::Low => "low",
            LatencyKind::High => "high",
        }
    }
}

/// Metrics collector for speedtest results
///
/// Cheap to clone; clones share the same registry and series.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    /// Held exclusively while a result is folded in, shared while gathering,
    /// so a scrape sees either all or none of a cycle's values.
    cycle_guard: Arc<RwLock<()>>,
    download_speed: GaugeVec,
    download_latency: GaugeVec,
    download_jitter: GaugeVec,
    upload_speed: GaugeVec,
    upload_latency: GaugeVec,
    upload_jitter: GaugeVec,
    ping_latency: GaugeVec,
    ping_jitter: GaugeVec,
    packet_loss: GaugeVec,
    total_requests: IntCounterVec,
}

fn gauge(name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec, prometheus::Error> {
    GaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// Registers all metrics with a new Prometheus registry. Both outcome
    /// series start at zero so they are visible before the first measurement.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let total_requests = IntCounterVec::new(
            Opts::new("total_requests", "The total number of requests").namespace(NAMESPACE),
            &["status"],
        )?;

        let download_speed = gauge("download_speed", "The Download Rate in Mbps", &SERIES_LABELS)?;
        let download_latency = gauge(
            "download_latency",
            "The Download Latency in milliseconds (iqm, low, high)",
            &LATENCY_LABELS,
        )?;
        let download_jitter = gauge(
            "download_jitter",
            "The Download Jitter in milliseconds",
            &SERIES_LABELS,
        )?;

        let upload_speed = gauge("upload_speed", "The Upload Rate in Mbps", &SERIES_LABELS)?;
        let upload_latency = gauge(
            "upload_latency",
            "The Upload Latency in milliseconds (iqm, low, high)",
            &LATENCY_LABELS,
        )?;
        let upload_jitter = gauge(
            "upload_jitter",
            "The Upload Jitter in milliseconds",
            &SERIES_LABELS,
        )?;

        // ping has no iqm of its own; its plain latency is published as "iqm"
        let ping_latency = gauge(
            "ping_latency",
            "The Ping Latency in milliseconds (iqm, low, high)",
            &LATENCY_LABELS,
        )?;
        let ping_jitter = gauge(
            "ping_jitter",
            "The Ping Jitter in milliseconds",
            &SERIES_LABELS,
        )?;

        let packet_loss = gauge(
            "packet_loss",
            "The Number of Packet Loss",
            &SERIES_LABELS,
        )?;

        registry.register(Box::new(total_requests.clone()))?;
        registry.register(Box::new(download_speed.clone()))?;
        registry.register(Box::new(download_latency.clone()))?;
        registry.register(Box::new(download_jitter.clone()))?;
        registry.register(Box::new(upload_speed.clone()))?;
        registry.register(Box::new(upload_latency.clone()))?;
        registry.register(Box::new(upload_jitter.clone()))?;
        registry.register(Box::new(ping_latency.clone()))?;
        registry.register(Box::new(ping_jitter.clone()))?;
        registry.register(Box::new(packet_loss.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        for outcome in [Outcome::Ok, Outcome::Error] {
            total_requests.with_label_values(&[outcome.as_str()]);
        }

        Ok(Self {
            registry: Arc::new(registry),
            cycle_guard: Arc::new(RwLock::new(())),
            download_speed,
            download_latency,
            download_jitter,
            upload_speed,
            upload_latency,
            upload_jitter,
            ping_latency,
            ping_jitter,
            packet_loss,
            total_requests,
        })
    }

    /// Publish a measurement result
    ///
    /// Validates the result first; an incomplete result leaves every series
    /// untouched and its missing field is returned. Otherwise all gauges for
    /// the result's label tuple are overwritten as one unit.
    ///
    /// # Cardinality
    ///
    /// One label tuple per (ISP, server) pair ever measured. Series of servers
    /// no longer in use are kept (see module docs).
    pub fn update(&self, result: &SpeedtestResult) -> Result<(), MissingField> {
        let complete = match result.validate() {
            Ok(complete) => complete,
            Err(missing) => {
                tracing::debug!(
                    missing_field = missing.as_str(),
                    "Skipping metrics update for incomplete result"
                );
                return Err(missing);
            }
        };

        let server_id = complete.server.id_label();
        let series = [
            complete.isp,
            server_id.as_str(),
            complete.server.name.as_str(),
            complete.server.location.as_str(),
        ];
        let with_kind = |kind: LatencyKind| {
            [series[0], series[1], series[2], series[3], kind.as_str()]
        };

        let _cycle = self.cycle_guard.write();

        self.download_speed
            .with_label_values(&series)
            .set(complete.download.mbps());
        self.download_latency
            .with_label_values(&with_kind(LatencyKind::Iqm))
            .set(complete.download.latency.iqm);
        self.download_latency
            .with_label_values(&with_kind(LatencyKind::Low))
            .set(complete.download.latency.low);
        self.download_latency
            .with_label_values(&with_kind(LatencyKind::High))
            .set(complete.download.latency.high);
        self.download_jitter
            .with_label_values(&series)
            .set(complete.download.latency.jitter);

        self.upload_speed
            .with_label_values(&series)
            .set(complete.upload.mbps());
        self.upload_latency
            .with_label_values(&with_kind(LatencyKind::Iqm))
            .set(complete.upload.latency.iqm);
        self.upload_latency
            .with_label_values(&with_kind(LatencyKind::Low))
            .set(complete.upload.latency.low);
        self.upload_latency
            .with_label_values(&with_kind(LatencyKind::High))
            .set(complete.upload.latency.high);
        self.upload_jitter
            .with_label_values(&series)
            .set(complete.upload.latency.jitter);

        self.ping_latency
            .with_label_values(&with_kind(LatencyKind::Iqm))
            .set(complete.ping.latency);
        self.ping_latency
            .with_label_values(&with_kind(LatencyKind::Low))
            .set(complete.ping.low);
        self.ping_latency
            .with_label_values(&with_kind(LatencyKind::High))
            .set(complete.ping.high);
        self.ping_jitter
            .with_label_values(&series)
            .set(complete.ping.jitter);

        self.packet_loss
            .with_label_values(&series)
            .set(complete.packet_loss);

        tracing::debug!(
            isp = complete.isp,
            server_id = %server_id,
            "Published speedtest result"
        );
        Ok(())
    }

    /// Count one measurement outcome
    pub fn record_outcome(&self, outcome: Outcome) {
        self.total_requests
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Current value of the outcome counter
    pub fn outcome_count(&self, outcome: Outcome) -> u64 {
        self.total_requests
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    /// Look up the current value of a gauge series
    ///
    /// `name` is the full metric name (e.g. `speedtest_download_speed`) and
    /// `labels` must list every label of the series. Returns `None` when the
    /// series has never been set. Reading never creates a series.
    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let _cycle = self.cycle_guard.read();
        let metric_families = self.registry.gather();

        metric_families
            .iter()
            .find(|mf| mf.name() == name)?
            .get_metric()
            .iter()
            .find(|m| {
                m.label.len() == labels.len()
                    && labels.iter().all(|(key, value)| {
                        m.label
                            .iter()
                            .any(|pair| pair.name() == *key && pair.value() == *value)
                    })
            })
            .and_then(|m| m.gauge.value)
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Returns
    ///
    /// A string containing all metrics in Prometheus exposition format,
    /// suitable for the scrape endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = {
            let _cycle = self.cycle_guard.read();
            self.registry.gather()
        };
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            let metric_names: Vec<_> = metric_families.iter().map(|mf| mf.name()).collect();

            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                metric_names = ?metric_names,
                "Prometheus text encoder failed"
            );

            prometheus::Error::Msg(format!(
                "Failed to encode {} metric families: {}. Metrics: {:?}",
                metric_count, e, metric_names
            ))
        })?;

        String::from_utf8(buffer).map_err(|e| {
            let valid_up_to = e.utf8_error().valid_up_to();
            tracing::error!(
                invalid_byte_index = valid_up_to,
                "Prometheus encoder produced invalid UTF-8"
            );
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}",
                valid_up_to, e
            ))
        })
    }
}
