//! Metrics records and time series produced from probe logs

use crate::types::{AppError, ProbeKind, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Value written for any metric that could not be determined
pub const SENTINEL: f64 = -1.0;

/// A probe's raw output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub kind: ProbeKind,
    pub path: PathBuf,
}

impl RawLog {
    pub fn new(kind: ProbeKind, run_dir: &Path) -> Self {
        Self {
            kind,
            path: run_dir.join(kind.log_file_name()),
        }
    }

    /// Read the log. A missing file yields `None`, other I/O errors propagate.
    pub fn read(&self) -> Result<Option<String>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::io(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

/// Where a time-series value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Measured,
    Synthetic,
    Missing,
}

/// Aggregate metrics of one completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub scheme: String,
    /// Average round-trip time in milliseconds, or -1
    pub avg_rtt_ms: f64,
    /// Loss as a fraction in [0, 1], or -1
    pub loss_rate: f64,
    /// Average throughput in bits per second, or -1
    pub throughput_bps: f64,
}

impl MetricsRecord {
    /// A record with every metric unavailable
    pub fn unavailable<S: Into<String>>(scheme: S) -> Self {
        Self {
            scheme: scheme.into(),
            avg_rtt_ms: SENTINEL,
            loss_rate: SENTINEL,
            throughput_bps: SENTINEL,
        }
    }

    pub fn has_rtt(&self) -> bool {
        self.avg_rtt_ms >= 0.0
    }

    pub fn has_loss(&self) -> bool {
        self.loss_rate >= 0.0
    }

    pub fn has_throughput(&self) -> bool {
        self.throughput_bps >= 0.0
    }

    /// Render the key/value metrics log
    pub fn to_report(&self) -> String {
        format!(
            "Scheme: {}\nRTT (ms): {:.2}\nLoss Rate: {:.4}\nThroughput (bps): {:.2}\n",
            self.scheme, self.avg_rtt_ms, self.loss_rate, self.throughput_bps
        )
    }

    /// Parse a metrics log previously written by [`MetricsRecord::to_report`]
    pub fn from_report(text: &str) -> Result<Self> {
        let mut scheme = None;
        let mut record = Self::unavailable("");

        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Scheme" => scheme = Some(value.to_string()),
                "RTT (ms)" => record.avg_rtt_ms = value.parse()?,
                "Loss Rate" => record.loss_rate = value.parse()?,
                "Throughput (bps)" => record.throughput_bps = value.parse()?,
                _ => {}
            }
        }

        record.scheme = scheme.ok_or_else(|| AppError::parse("metrics log has no Scheme line"))?;
        Ok(record)
    }

    /// Metrics log file name for `scheme`
    pub fn file_name(scheme: &str) -> String {
        format!("test_metrics_{}.log", scheme)
    }
}

/// One per-second row of a reconstructed time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRow {
    /// Whole seconds since the start of the run
    pub timestamp: u32,
    /// Throughput in Mbit/s, or -1
    pub throughput_mbps: f64,
    /// Mean RTT in ms, or -1
    pub rtt_ms: f64,
    /// Loss fraction in [0, 1], or -1
    pub loss_rate: f64,
    pub rtt_source: Provenance,
    pub loss_source: Provenance,
}

impl TimeSeriesRow {
    pub fn is_synthetic(&self) -> bool {
        self.rtt_source == Provenance::Synthetic || self.loss_source == Provenance::Synthetic
    }
}

/// Per-second time series covering `[0, duration)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub scheme: String,
    pub rows: Vec<TimeSeriesRow>,
    /// Whether the series was built with simulated gap filling
    pub simulated: bool,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn synthetic_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.is_synthetic()).count()
    }

    /// CSV file name for `scheme`
    pub fn file_name(scheme: &str) -> String {
        format!("{}_cc_log.csv", scheme)
    }

    /// Render as CSV. A `synthetic` column is appended only for simulated series.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("timestamp,throughput,rtt,loss_rate");
        if self.simulated {
            out.push_str(",synthetic");
        }
        out.push('\n');

        for row in &self.rows {
            let _ = write!(
                out,
                "{},{},{},{}",
                row.timestamp,
                format_value(row.throughput_mbps),
                format_value(row.rtt_ms),
                format_value(row.loss_rate)
            );
            if self.simulated {
                let _ = write!(out, ",{}", u8::from(row.is_synthetic()));
            }
            out.push('\n');
        }
        out
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_csv()).map_err(|e| {
            AppError::io(format!("Failed to write {}: {}", path.display(), e))
        })
    }
}

fn format_value(value: f64) -> String {
    if value < 0.0 {
        "-1".to_string()
    } else {
        format!("{:.4}", value)
    }
}
