//! Typed representation of one speedtest run
//!
//! Mirrors the JSON document printed by `speedtest --format=json`. Nested
//! objects are optional because the tool emits partial documents when a
//! measurement fails on the server side; [`SpeedtestResult::validate`] is the
//! single place that decides whether a result is complete enough to publish.

use serde::{Deserialize, Deserializer};
use std::fmt;
use thiserror::Error;

/// Bytes-per-second to megabits-per-second factor
pub const BYTES_PER_SEC_TO_MBPS: f64 = 8e-6;

/// Read an explicit JSON `null` the same way as an absent field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Latency statistics reported for the download and upload phases (milliseconds)
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LatencyStats {
    #[serde(deserialize_with = "null_as_default")]
    pub iqm: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub low: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub high: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub jitter: f64,
}

/// Throughput of one transfer direction
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BandwidthStats {
    /// Bytes per second
    #[serde(deserialize_with = "null_as_default")]
    pub bandwidth: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub bytes: u64,
    /// Duration of the phase in milliseconds
    #[serde(deserialize_with = "null_as_default")]
    pub elapsed: u64,
    pub latency: Option<LatencyStats>,
}

impl BandwidthStats {
    /// Bandwidth converted to megabits per second
    pub fn mbps(&self) -> f64 {
        self.bandwidth as f64 * BYTES_PER_SEC_TO_MBPS
    }
}

/// Idle latency measured before the transfers (milliseconds)
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PingStats {
    #[serde(deserialize_with = "null_as_default")]
    pub jitter: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub latency: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub low: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub high: f64,
}

/// Server the measurement ran against
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub id: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub location: String,
}

impl ServerInfo {
    /// Server id as used in the `server_id` metric label
    pub fn id_label(&self) -> String {
        self.id.to_string()
    }
}

/// One measurement as printed by the speedtest CLI
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpeedtestResult {
    pub server: Option<ServerInfo>,
    pub ping: Option<PingStats>,
    pub download: Option<BandwidthStats>,
    pub upload: Option<BandwidthStats>,
    #[serde(deserialize_with = "null_as_default")]
    pub packet_loss: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub isp: String,
}

/// Nested object absent from a speedtest result
///
/// Variants are declared in validation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MissingField {
    #[error("missing server details")]
    Server,
    #[error("missing ping details")]
    Ping,
    #[error("missing download details")]
    Download,
    #[error("missing download latency details")]
    DownloadLatency,
    #[error("missing upload details")]
    Upload,
    #[error("missing upload latency details")]
    UploadLatency,
}

impl MissingField {
    /// Dotted path of the missing object in the JSON document
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Ping => "ping",
            Self::Download => "download",
            Self::DownloadLatency => "download.latency",
            Self::Upload => "upload",
            Self::UploadLatency => "upload.latency",
        }
    }
}

/// One transfer direction with its latency guaranteed present
#[derive(Debug, Clone, Copy)]
pub struct CompleteBandwidth<'a> {
    pub stats: &'a BandwidthStats,
    pub latency: &'a LatencyStats,
}

impl CompleteBandwidth<'_> {
    pub fn mbps(&self) -> f64 {
        self.stats.mbps()
    }
}

/// Borrowed view of a result that passed [`SpeedtestResult::validate`]
#[derive(Debug, Clone, Copy)]
pub struct CompleteResult<'a> {
    pub server: &'a ServerInfo,
    pub ping: &'a PingStats,
    pub download: CompleteBandwidth<'a>,
    pub upload: CompleteBandwidth<'a>,
    pub packet_loss: f64,
    pub isp: &'a str,
}

impl SpeedtestResult {
    /// Parse the tool's JSON output
    ///
    /// Unknown fields are ignored and missing numbers default to zero. Missing
    /// objects are not a parse error; they are reported by `validate`.
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    /// Check that every object needed for publication is present
    ///
    /// Fails fast on the first missing object, in this order: server, ping,
    /// download, download.latency, upload, upload.latency.
    pub fn validate(&self) -> Result<CompleteResult<'_>, MissingField> {
        let server = self.server.as_ref().ok_or(MissingField::Server)?;
        let ping = self.ping.as_ref().ok_or(MissingField::Ping)?;
        let download = self.download.as_ref().ok_or(MissingField::Download)?;
        let download_latency = download
            .latency
            .as_ref()
            .ok_or(MissingField::DownloadLatency)?;
        let upload = self.upload.as_ref().ok_or(MissingField::Upload)?;
        let upload_latency = upload.latency.as_ref().ok_or(MissingField::UploadLatency)?;

        Ok(CompleteResult {
            server,
            ping,
            download: CompleteBandwidth {
                stats: download,
                latency: download_latency,
            },
            upload: CompleteBandwidth {
                stats: upload,
                latency: upload_latency,
            },
            packet_loss: self.packet_loss,
            isp: &self.isp,
        })
    }
}

impl fmt::Display for CompleteResult<'_> {
    /// Multi-line human-readable summary, one line per phase
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Server {}: {} (ISP: {})",
            self.server.id, self.server.name, self.isp
        )?;
        writeln!(
            f,
            "Download {:.2} Mbps (latency: {:.2}/{:.2} ms, jitter: {:.2} ms)",
            self.download.mbps(),
            self.download.latency.iqm,
            self.download.latency.high,
            self.download.latency.jitter
        )?;
        writeln!(
            f,
            "Upload {:.2} Mbps (latency: {:.2}/{:.2} ms, jitter: {:.2} ms)",
            self.upload.mbps(),
            self.upload.latency.iqm,
            self.upload.latency.high,
            self.upload.latency.jitter
        )?;
        write!(
            f,
            "Ping {:.2}/{:.2} ms (jitter: {:.2} ms)",
            self.ping.latency, self.ping.high, self.ping.jitter
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FULL_OUTPUT: &str = r#"{
        "type": "result",
        "timestamp": "2024-03-01T10:00:00Z",
        "ping": {"jitter": 1.25, "latency": 10.5, "low": 5.0, "high": 15.0},
        "download": {
            "bandwidth": 12500000, "bytes": 150000000, "elapsed": 12000,
            "latency": {"iqm": 5.5, "low": 2.0, "high": 8.0, "jitter": 1.0}
        },
        "upload": {
            "bandwidth": 2500000, "bytes": 30000000, "elapsed": 10000,
            "latency": {"iqm": 20.0, "low": 9.0, "high": 40.0, "jitter": 3.5}
        },
        "packetLoss": 0.5,
        "isp": "ACME",
        "interface": {"internalIp": "10.0.0.2", "isVpn": false},
        "server": {"id": 123, "host": "speed.example.net", "port": 8080, "name": "X", "location": "Y", "country": "Z"},
        "result": {"id": "abc", "url": "https://example.invalid/result/abc"}
    }"#;

    #[test]
    fn test_parse_full_output_ignores_unknown_fields() {
        let result = SpeedtestResult::parse(FULL_OUTPUT.as_bytes()).expect("should parse");

        let server = result.server.as_ref().expect("server present");
        assert_eq!(server.id, 123);
        assert_eq!(server.name, "X");
        assert_eq!(server.location, "Y");
        assert_eq!(result.isp, "ACME");
        assert_eq!(result.packet_loss, 0.5);

        let download = result.download.as_ref().expect("download present");
        assert_eq!(download.bandwidth, 12_500_000);
        assert_eq!(download.bytes, 150_000_000);
        assert_eq!(download.elapsed, 12_000);
        assert_eq!(download.latency.expect("latency").iqm, 5.5);
    }

    #[test]
    fn test_parse_missing_numbers_default_to_zero() {
        let result = SpeedtestResult::parse(br#"{"download": {}, "ping": {"latency": 3}}"#)
            .expect("should parse");

        assert_eq!(result.packet_loss, 0.0);
        assert_eq!(result.isp, "");
        let download = result.download.expect("download object present");
        assert_eq!(download.bandwidth, 0);
        assert!(download.latency.is_none());
        let ping = result.ping.expect("ping present");
        assert_eq!(ping.latency, 3.0);
        assert_eq!(ping.jitter, 0.0);
    }

    #[test]
    fn test_parse_null_scalars_default_to_zero() {
        let result = SpeedtestResult::parse(
            br#"{"packetLoss": null, "isp": null,
                "server": {"id": null, "name": "X", "location": null},
                "upload": {"bandwidth": null, "latency": {"iqm": null, "high": 4}}}"#,
        )
        .expect("null scalars should parse");

        assert_eq!(result.packet_loss, 0.0);
        assert_eq!(result.isp, "");
        let server = result.server.expect("server present");
        assert_eq!(server.id, 0);
        assert_eq!(server.location, "");
        let upload = result.upload.expect("upload present");
        assert_eq!(upload.bandwidth, 0);
        assert_eq!(upload.latency.map(|l| (l.iqm, l.high)), Some((0.0, 4.0)));
    }

    #[test]
    fn test_null_object_is_missing() {
        let result = SpeedtestResult::parse(br#"{"server": {"id": 1}, "ping": null}"#).unwrap();
        assert_eq!(result.validate().unwrap_err(), MissingField::Ping);
    }

    #[test]
    fn test_parse_rejects_malformed_output() {
        assert!(SpeedtestResult::parse(b"not json").is_err());
        assert!(SpeedtestResult::parse(b"").is_err());
        assert!(SpeedtestResult::parse(br#"{"server": {"id": "abc"}}"#).is_err());
    }

    #[test]
    fn test_validate_complete_result() {
        let result = SpeedtestResult::parse(FULL_OUTPUT.as_bytes()).unwrap();
        let complete = result.validate().expect("complete result");

        assert_eq!(complete.server.id_label(), "123");
        assert_eq!(complete.download.latency.high, 8.0);
        assert_eq!(complete.upload.latency.jitter, 3.5);
        assert_eq!(complete.isp, "ACME");
    }

    #[test]
    fn test_validate_reports_fields_in_order() {
        let mut result = SpeedtestResult::parse(FULL_OUTPUT.as_bytes()).unwrap();

        result.upload.as_mut().unwrap().latency = None;
        assert_eq!(result.validate().unwrap_err(), MissingField::UploadLatency);

        result.upload = None;
        assert_eq!(result.validate().unwrap_err(), MissingField::Upload);

        result.download.as_mut().unwrap().latency = None;
        assert_eq!(result.validate().unwrap_err(), MissingField::DownloadLatency);

        result.download = None;
        assert_eq!(result.validate().unwrap_err(), MissingField::Download);

        result.ping = None;
        assert_eq!(result.validate().unwrap_err(), MissingField::Ping);

        result.server = None;
        assert_eq!(result.validate().unwrap_err(), MissingField::Server);
    }

    #[test]
    fn test_validate_server_only_document() {
        let result = SpeedtestResult::parse(br#"{"server": {"id": 1, "name": "a", "location": "b"}}"#)
            .unwrap();
        assert_eq!(result.validate().unwrap_err(), MissingField::Ping);
    }

    #[test]
    fn test_mbps_conversion_matches_reference_value() {
        let stats = BandwidthStats {
            bandwidth: 12_500_000,
            ..Default::default()
        };
        assert_eq!(stats.mbps(), 100.0);
    }

    #[test]
    fn test_missing_field_names() {
        assert_eq!(MissingField::DownloadLatency.as_str(), "download.latency");
        assert_eq!(
            MissingField::UploadLatency.to_string(),
            "missing upload latency details"
        );
    }

    #[test]
    fn test_summary_lines() {
        let result = SpeedtestResult::parse(FULL_OUTPUT.as_bytes()).unwrap();
        let summary = result.validate().unwrap().to_string();
        let lines: Vec<&str> = summary.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Server 123: X (ISP: ACME)");
        assert_eq!(
            lines[1],
            "Download 100.00 Mbps (latency: 5.50/8.00 ms, jitter: 1.00 ms)"
        );
        assert_eq!(lines[3], "Ping 10.50/15.00 ms (jitter: 1.25 ms)");
    }

    proptest! {
        #[test]
        fn prop_mbps_uses_exact_factor(bandwidth in 0u64..10_000_000_000) {
            let stats = BandwidthStats { bandwidth, ..Default::default() };
            prop_assert_eq!(stats.mbps(), bandwidth as f64 * 8e-6);
        }

        #[test]
        fn prop_validate_returns_first_missing_field(mask in 0u8..64) {
            let mut result = SpeedtestResult::parse(FULL_OUTPUT.as_bytes()).unwrap();
            // Bit i removes the i-th object in validation order
            if mask & 0b10_0000 != 0 {
                result.upload.as_mut().unwrap().latency = None;
            }
            if mask & 0b01_0000 != 0 {
                result.upload = None;
            }
            if mask & 0b00_1000 != 0 {
                result.download.as_mut().unwrap().latency = None;
            }
            if mask & 0b00_0100 != 0 {
                result.download = None;
            }
            if mask & 0b00_0010 != 0 {
                result.ping = None;
            }
            if mask & 0b00_0001 != 0 {
                result.server = None;
            }

            let expected = if mask & 0b1 != 0 {
                Some(MissingField::Server)
            } else if mask & 0b10 != 0 {
                Some(MissingField::Ping)
            } else if mask & 0b100 != 0 {
                Some(MissingField::Download)
            } else if mask & 0b1000 != 0 {
                Some(MissingField::DownloadLatency)
            } else if mask & 0b1_0000 != 0 {
                Some(MissingField::Upload)
            } else if mask & 0b10_0000 != 0 {
                Some(MissingField::UploadLatency)
            } else {
                None
            };

            prop_assert_eq!(result.validate().err(), expected);
        }
    }
}
