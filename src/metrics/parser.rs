//! Aggregate metrics from raw probe logs
//!
//! Every extractor is tolerant: lines that do not match are skipped and an
//! absent value becomes the sentinel (or 0.0 for loss, which `ping` only
//! omits when it printed no summary at all).

use crate::models::{MetricsRecord, RawLog, SENTINEL};
use crate::types::{AppError, ProbeKind, Result};
use regex::Regex;
use std::path::Path;

/// Multiplier from a `[KMG]` prefix to bits/sec
pub(crate) fn unit_scale(prefix: &str) -> f64 {
    match prefix {
        "K" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        _ => 1.0,
    }
}

pub(crate) fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| AppError::internal(format!("Invalid pattern '{}': {}", pattern, e)))
}

/// Extracts average RTT, loss rate and throughput from probe output
#[derive(Debug, Clone)]
pub struct MetricsParser {
    rtt_summary: Regex,
    packet_loss: Regex,
    throughput: Regex,
}

impl MetricsParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            rtt_summary: compile(
                r"(?:rtt|round-trip) min/avg/max/(?:mdev|stddev) = (\d+(?:\.\d+)?)/(\d+(?:\.\d+)?)/",
            )?,
            packet_loss: compile(r"(\d+(?:\.\d+)?)% packet loss")?,
            throughput: compile(r"(\d+(?:\.\d+)?)\s+([KMG])bits/sec")?,
        })
    }

    /// Average RTT in ms from the ping summary line, or -1
    pub fn parse_avg_rtt(&self, ping_log: &str) -> f64 {
        self.rtt_summary
            .captures(ping_log)
            .and_then(|caps| caps[2].parse::<f64>().ok())
            .unwrap_or(SENTINEL)
    }

    /// Loss fraction from `N% packet loss`, or 0.0 when no such line exists
    pub fn parse_loss_rate(&self, ping_log: &str) -> f64 {
        self.packet_loss
            .captures(ping_log)
            .and_then(|caps| caps[1].parse::<f64>().ok())
            .map(|percent| percent / 100.0)
            .unwrap_or(0.0)
    }

    /// Throughput in bits/sec from the first line reporting a rate, or -1
    pub fn parse_throughput_bps(&self, iperf_log: &str) -> f64 {
        for line in iperf_log.lines().filter(|l| l.contains("bits/sec")) {
            let Some(caps) = self.throughput.captures(line) else {
                continue;
            };
            if let Ok(value) = caps[1].parse::<f64>() {
                return value * unit_scale(&caps[2]);
            }
        }
        SENTINEL
    }

    /// Build a record from log contents; `None` marks a missing log
    pub fn parse(&self, scheme: &str, ping_log: Option<&str>, iperf_log: Option<&str>) -> MetricsRecord {
        let mut record = MetricsRecord::unavailable(scheme);

        if let Some(ping) = ping_log {
            record.avg_rtt_ms = self.parse_avg_rtt(ping);
            record.loss_rate = self.parse_loss_rate(ping);
        }

        if let Some(iperf) = iperf_log {
            record.throughput_bps = self.parse_throughput_bps(iperf);
        }

        record
    }

    /// Read the raw logs of a run directory and parse them
    pub fn parse_run_dir(&self, scheme: &str, run_dir: &Path) -> Result<MetricsRecord> {
        let ping = RawLog::new(ProbeKind::Rtt, run_dir).read()?;
        let iperf = RawLog::new(ProbeKind::Throughput, run_dir).read()?;
        Ok(self.parse(scheme, ping.as_deref(), iperf.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PING_LOG: &str = "\
PING 127.0.0.1 (127.0.0.1) 56(84) bytes of data.
[1697040000.100000] 64 bytes from 127.0.0.1: icmp_seq=1 ttl=64 time=30.1 ms
[1697040000.300000] 64 bytes from 127.0.0.1: icmp_seq=2 ttl=64 time=29.9 ms

--- 127.0.0.1 ping statistics ---
3 packets transmitted, 2 received, 33.3333% packet loss, time 402ms
rtt min/avg/max/mdev = 29.900/30.000/30.100/0.100 ms
";

    const IPERF_LOG: &str = "\
Connecting to host 127.0.0.1, port 5201
[  5] local 127.0.0.1 port 40000 connected to 127.0.0.1 port 5201
[ ID] Interval           Transfer     Bitrate         Retr  Cwnd
[  5]   0.00-1.00   sec  1.12 MBytes  9.43 Mbits/sec    0   85.3 KBytes
[  5]   1.00-2.00   sec  1.25 MBytes  10.5 Mbits/sec    0   85.3 KBytes
";

    fn parser() -> MetricsParser {
        MetricsParser::new().unwrap()
    }

    #[test]
    fn test_avg_rtt() {
        assert_eq!(parser().parse_avg_rtt(PING_LOG), 30.0);
        assert_eq!(parser().parse_avg_rtt("no summary here"), SENTINEL);
    }

    #[test]
    fn test_bsd_round_trip_summary() {
        let log = "round-trip min/avg/max/stddev = 0.041/0.057/0.075/0.013 ms";
        assert_eq!(parser().parse_avg_rtt(log), 0.057);
    }

    #[test]
    fn test_loss_rate() {
        assert_eq!(parser().parse_loss_rate("10 packets transmitted, 9 received, 10% packet loss"), 0.10);
        assert!((parser().parse_loss_rate(PING_LOG) - 0.333333).abs() < 1e-9);
        assert_eq!(parser().parse_loss_rate(""), 0.0);
    }

    #[test]
    fn test_throughput_first_match_wins() {
        assert!((parser().parse_throughput_bps(IPERF_LOG) - 9.43e6).abs() < 1e-3);
    }

    #[test]
    fn test_throughput_units() {
        let p = parser();
        assert_eq!(p.parse_throughput_bps("0.00-1.00 sec 10 KBytes 80 Kbits/sec"), 80e3);
        assert_eq!(p.parse_throughput_bps("0.00-1.00 sec 1 GBytes 1.5 Gbits/sec"), 1.5e9);
        assert_eq!(p.parse_throughput_bps("Connecting to host"), SENTINEL);
    }

    #[test]
    fn test_throughput_skips_malformed_lines() {
        let log = "garbage bits/sec\n[  5] 0.00-1.00 sec 1 MBytes 8.00 Mbits/sec\n";
        assert_eq!(parser().parse_throughput_bps(log), 8e6);
    }

    #[test]
    fn test_missing_logs_yield_sentinels() {
        let record = parser().parse("cubic", None, None);
        assert_eq!(record, MetricsRecord::unavailable("cubic"));

        let record = parser().parse("cubic", Some(PING_LOG), None);
        assert_eq!(record.avg_rtt_ms, 30.0);
        assert_eq!(record.throughput_bps, SENTINEL);
    }

    #[test]
    fn test_parse_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("iperf.log"), IPERF_LOG).unwrap();

        let record = parser().parse_run_dir("vegas", dir.path()).unwrap();
        assert_eq!(record.scheme, "vegas");
        assert_eq!(record.avg_rtt_ms, SENTINEL);
        assert_eq!(record.loss_rate, SENTINEL);
        assert!(record.has_throughput());
    }

    proptest! {
        #[test]
        fn prop_avg_rtt_is_second_field(
            a in 0u32..100_000,
            b in 0u32..100_000,
            c in 0u32..100_000,
            d in 0u32..100_000,
        ) {
            let (a, b, c, d) = (a as f64 / 1000.0, b as f64 / 1000.0, c as f64 / 1000.0, d as f64 / 1000.0);
            let line = format!("rtt min/avg/max/mdev = {:.3}/{:.3}/{:.3}/{:.3} ms", a, b, c, d);
            let parsed = parser().parse_avg_rtt(&line);
            prop_assert!((parsed - b).abs() < 1e-9);
        }

        #[test]
        fn prop_loss_percent(n in 0u32..=100) {
            let line = format!("10 packets transmitted, 0 received, {}% packet loss", n);
            prop_assert!((parser().parse_loss_rate(&line) - n as f64 / 100.0).abs() < 1e-12);
        }
    }
}
