//! Per-second time series from interval throughput and ping replies
//!
//! The series always covers `[0, duration)` with one row per second. How
//! empty seconds are handled is decided by the [`GapPolicy`]:
//!
//! * `Measured` never invents data. An RTT bucket without replies is -1 and
//!   loss is computed from `icmp_seq` gaps among the probes scheduled in that
//!   second.
//! * `Simulated` reproduces the legacy placeholder model: empty RTT buckets
//!   are drawn from `N(30, 5)` and loss from a noisy sinusoid. Those values
//!   are marked synthetic.

use super::parser::{compile, unit_scale};
use crate::defaults::{
    SYNTHETIC_LOSS_AMPLITUDE, SYNTHETIC_LOSS_BASE, SYNTHETIC_LOSS_STD_DEV, SYNTHETIC_RTT_MEAN_MS,
    SYNTHETIC_RTT_STD_DEV_MS,
};
use crate::models::{Config, GapPolicy, Provenance, RawLog, TimeSeries, TimeSeriesRow, SENTINEL};
use crate::types::{AppError, ProbeKind, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

/// Tolerance when mapping a probe's scheduled offset onto a whole second
const SECOND_EPSILON: f64 = 1e-9;

/// One parsed ping reply
#[derive(Debug, Clone, PartialEq)]
pub struct PingReply {
    /// `ping -D` timestamp, when present
    pub epoch: Option<f64>,
    pub icmp_seq: u32,
    pub rtt_ms: f64,
}

/// Builds a [`TimeSeries`] from raw probe logs
#[derive(Debug, Clone)]
pub struct TimeSeriesReconstructor {
    duration_secs: u32,
    ping_interval_secs: f64,
    policy: GapPolicy,
    seed: Option<u64>,
    interval_line: Regex,
    reply_line: Regex,
    transmitted: Regex,
}

impl TimeSeriesReconstructor {
    pub fn new(duration_secs: u32, ping_interval_secs: f64, policy: GapPolicy, seed: Option<u64>) -> Result<Self> {
        if !ping_interval_secs.is_finite() || ping_interval_secs <= 0.0 {
            return Err(AppError::validation("Ping interval must be greater than 0"));
        }

        Ok(Self {
            duration_secs,
            ping_interval_secs,
            policy,
            seed,
            interval_line: compile(
                r"(\d+(?:\.\d+)?)-(\d+(?:\.\d+)?)\s+sec\b.*?(\d+(?:\.\d+)?)\s+([KMG]?)bits/sec",
            )?,
            reply_line: compile(
                r"^(?:\[(\d+(?:\.\d+)?)\]\s*)?.*\bicmp_seq=(\d+)\b.*\btime[=<](\d+(?:\.\d+)?)\s*ms",
            )?,
            transmitted: compile(r"(\d+) packets transmitted")?,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let duration = u32::try_from(config.duration_secs)
            .map_err(|_| AppError::validation("Test duration is too large"))?;
        Self::new(duration, config.probes.ping_interval_secs, config.gap_policy, config.seed)
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    /// Throughput in Mbit/s per second bucket. The first observation for a
    /// bucket wins so a trailing whole-run summary cannot overwrite bucket 0.
    pub fn throughput_buckets(&self, iperf_log: &str) -> Vec<Option<f64>> {
        let mut buckets = vec![None; self.duration_secs as usize];

        for line in iperf_log.lines() {
            let Some(caps) = self.interval_line.captures(line) else {
                continue;
            };
            let (Ok(start), Ok(value)) = (caps[1].parse::<f64>(), caps[3].parse::<f64>()) else {
                continue;
            };
            let bucket = start.floor() as usize;
            if let Some(slot) = buckets.get_mut(bucket) {
                if slot.is_none() {
                    *slot = Some(value * unit_scale(&caps[4]) / 1e6);
                }
            }
        }

        buckets
    }

    /// Parse every reply line of a ping log
    pub fn ping_replies(&self, ping_log: &str) -> Vec<PingReply> {
        ping_log
            .lines()
            .filter_map(|line| {
                let caps = self.reply_line.captures(line)?;
                Some(PingReply {
                    epoch: caps.get(1).and_then(|m| m.as_str().parse().ok()),
                    icmp_seq: caps[2].parse().ok()?,
                    rtt_ms: caps[3].parse().ok()?,
                })
            })
            .collect()
    }

    /// Mean RTT per second bucket
    pub fn rtt_buckets(&self, replies: &[PingReply]) -> Vec<Option<f64>> {
        let base = sequence_base(replies);
        let interval = self.ping_interval_secs;

        // Reply time zero: the scheduled send time of the first probe
        let origin = replies
            .iter()
            .filter_map(|r| r.epoch.map(|e| e - (r.icmp_seq - base) as f64 * interval))
            .reduce(f64::min);

        let mut sums = vec![(0.0_f64, 0_u32); self.duration_secs as usize];
        for reply in replies {
            let offset = match (origin, reply.epoch) {
                (Some(origin), Some(epoch)) => epoch - origin,
                _ => reply.icmp_seq.saturating_sub(base) as f64 * interval,
            };
            let second = (offset.max(0.0) + SECOND_EPSILON).floor() as usize;
            if let Some((sum, count)) = sums.get_mut(second) {
                *sum += reply.rtt_ms;
                *count += 1;
            }
        }

        sums.into_iter()
            .map(|(sum, count)| (count > 0).then(|| sum / count as f64))
            .collect()
    }

    /// Loss fraction per second derived from `icmp_seq` gaps. Seconds with no
    /// scheduled probe are `None`.
    ///
    /// Work is bounded by the window and the number of replies, not by the
    /// transmitted count, which comes straight from the log.
    pub fn loss_buckets(&self, ping_log: &str, replies: &[PingReply]) -> Vec<Option<f64>> {
        let base = sequence_base(replies);
        let transmitted = self
            .transmitted
            .captures(ping_log)
            .and_then(|caps| caps[1].parse::<u64>().ok())
            .or_else(|| replies.iter().map(|r| u64::from(r.icmp_seq - base) + 1).max())
            .unwrap_or(0);
        let interval = self.ping_interval_secs;

        // index of the first probe scheduled at or after `second`
        let first_index = |second: u32| -> u64 {
            let index = ((f64::from(second) - SECOND_EPSILON) / interval).ceil().max(0.0);
            (index as u64).min(transmitted)
        };

        let received: HashSet<u32> = replies.iter().map(|r| r.icmp_seq - base).collect();
        let mut answered = vec![0_u64; self.duration_secs as usize];
        for index in received {
            if u64::from(index) >= transmitted {
                continue;
            }
            let second = (f64::from(index) * interval + SECOND_EPSILON).floor() as usize;
            if let Some(count) = answered.get_mut(second) {
                *count += 1;
            }
        }

        (0..self.duration_secs)
            .zip(answered)
            .map(|(second, answered)| {
                let scheduled = first_index(second + 1) - first_index(second);
                (scheduled > 0)
                    .then(|| scheduled.saturating_sub(answered) as f64 / scheduled as f64)
            })
            .collect()
    }

    /// Reconstruct a series from log contents; `None` marks a missing log
    pub fn reconstruct(&self, scheme: &str, ping_log: Option<&str>, iperf_log: Option<&str>) -> Result<TimeSeries> {
        let len = self.duration_secs as usize;
        let throughput = iperf_log
            .map(|log| self.throughput_buckets(log))
            .unwrap_or_else(|| vec![None; len]);

        let replies = ping_log.map(|log| self.ping_replies(log)).unwrap_or_default();
        let rtt = self.rtt_buckets(&replies);
        let loss = match ping_log {
            Some(log) => self.loss_buckets(log, &replies),
            None => vec![None; len],
        };

        let mut filler = match self.policy {
            GapPolicy::Measured => None,
            GapPolicy::Simulated => Some(SyntheticFiller::new(self.seed, self.duration_secs)?),
        };

        let rows = (0..self.duration_secs)
            .map(|t| {
                let i = t as usize;
                let (rtt_ms, rtt_source) = match (rtt[i], filler.as_mut()) {
                    (Some(value), _) => (value, Provenance::Measured),
                    (None, Some(filler)) => (filler.rtt(), Provenance::Synthetic),
                    (None, None) => (SENTINEL, Provenance::Missing),
                };
                let (loss_rate, loss_source) = match (filler.as_mut(), loss[i]) {
                    (Some(filler), _) => (filler.loss(t), Provenance::Synthetic),
                    (None, Some(value)) => (value, Provenance::Measured),
                    (None, None) => (SENTINEL, Provenance::Missing),
                };
                TimeSeriesRow {
                    timestamp: t,
                    throughput_mbps: throughput[i].unwrap_or(SENTINEL),
                    rtt_ms,
                    loss_rate,
                    rtt_source,
                    loss_source,
                }
            })
            .collect();

        Ok(TimeSeries {
            scheme: scheme.to_string(),
            rows,
            simulated: self.policy == GapPolicy::Simulated,
        })
    }

    /// Read the raw logs of a run directory and reconstruct its series
    pub fn reconstruct_run_dir(&self, scheme: &str, run_dir: &Path) -> Result<TimeSeries> {
        let ping = RawLog::new(ProbeKind::Rtt, run_dir).read()?;
        let iperf = RawLog::new(ProbeKind::Throughput, run_dir).read()?;
        self.reconstruct(scheme, ping.as_deref(), iperf.as_deref())
    }
}

/// Linux ping numbers probes from 1, BSD ping from 0
fn sequence_base(replies: &[PingReply]) -> u32 {
    if replies.iter().any(|r| r.icmp_seq == 0) {
        0
    } else {
        1
    }
}

/// Placeholder value source for simulated gap filling
struct SyntheticFiller {
    rng: StdRng,
    rtt: Normal<f64>,
    duration: f64,
}

impl SyntheticFiller {
    fn new(seed: Option<u64>, duration_secs: u32) -> Result<Self> {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let rtt = Normal::new(SYNTHETIC_RTT_MEAN_MS, SYNTHETIC_RTT_STD_DEV_MS)
            .map_err(|e| AppError::internal(format!("Invalid RTT distribution: {}", e)))?;
        Ok(Self {
            rng,
            rtt,
            duration: f64::from(duration_secs.max(1)),
        })
    }

    fn rtt(&mut self) -> f64 {
        self.rtt.sample(&mut self.rng)
    }

    fn loss(&mut self, t: u32) -> f64 {
        let mean = SYNTHETIC_LOSS_BASE
            + SYNTHETIC_LOSS_AMPLITUDE * (2.0 * std::f64::consts::PI * f64::from(t) / self.duration).sin();
        match Normal::new(mean, SYNTHETIC_LOSS_STD_DEV) {
            Ok(dist) => dist.sample(&mut self.rng).max(0.0),
            Err(_) => mean.max(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstructor(duration: u32, policy: GapPolicy) -> TimeSeriesReconstructor {
        TimeSeriesReconstructor::new(duration, 0.2, policy, Some(7)).unwrap()
    }

    const IPERF_LOG: &str = "\
[ ID] Interval           Transfer     Bitrate         Retr  Cwnd
[  5]   0.00-1.00   sec  1.47 MBytes  12.3 Mbits/sec    0   85.3 KBytes
[  5]   1.00-2.00   sec   128 KBytes  1049 Kbits/sec    0   85.3 KBytes
[  5]   3.00-4.00   sec   120 MBytes  1.01 Gbits/sec    0   85.3 KBytes
- - - - - - - - - - - - - - - - - - - - - - - - -
[  5]   0.00-4.00   sec  122 MBytes   255 Mbits/sec    0             sender
";

    #[test]
    fn test_throughput_buckets() {
        let buckets = reconstructor(5, GapPolicy::Measured).throughput_buckets(IPERF_LOG);
        assert_eq!(buckets.len(), 5);
        assert!((buckets[0].unwrap() - 12.3).abs() < 1e-9);
        assert!((buckets[1].unwrap() - 1.049).abs() < 1e-9);
        assert_eq!(buckets[2], None);
        assert!((buckets[3].unwrap() - 1010.0).abs() < 1e-6);
        assert_eq!(buckets[4], None);
    }

    #[test]
    fn test_summary_line_does_not_overwrite_bucket_zero() {
        let log = "[  5] 0.00-1.00 sec 1 MBytes 8.00 Mbits/sec\n[  5] 0.00-60.00 sec 60 MBytes 99.0 Mbits/sec sender\n";
        let buckets = reconstructor(3, GapPolicy::Measured).throughput_buckets(log);
        assert_eq!(buckets[0], Some(8.0));
    }

    #[test]
    fn test_rtt_buckets_from_epoch_prefix() {
        let log = "\
[1000.05] 64 bytes from 127.0.0.1: icmp_seq=1 ttl=64 time=10.0 ms
[1000.25] 64 bytes from 127.0.0.1: icmp_seq=2 ttl=64 time=20.0 ms
[1001.10] 64 bytes from 127.0.0.1: icmp_seq=6 ttl=64 time=40.0 ms
";
        let r = reconstructor(3, GapPolicy::Measured);
        let replies = r.ping_replies(log);
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0].epoch, Some(1000.05));

        let buckets = r.rtt_buckets(&replies);
        assert_eq!(buckets[0], Some(15.0));
        assert_eq!(buckets[1], Some(40.0));
        assert_eq!(buckets[2], None);
    }

    #[test]
    fn test_rtt_buckets_from_sequence_numbers() {
        let log = "\
64 bytes from 127.0.0.1: icmp_seq=1 ttl=64 time=1.0 ms
64 bytes from 127.0.0.1: icmp_seq=5 ttl=64 time=3.0 ms
64 bytes from 127.0.0.1: icmp_seq=6 ttl=64 time=5.0 ms
";
        let r = reconstructor(2, GapPolicy::Measured);
        let buckets = r.rtt_buckets(&r.ping_replies(log));
        // seq 1 at 0.0s, seq 5 at 0.8s, seq 6 at 1.0s
        assert_eq!(buckets[0], Some(2.0));
        assert_eq!(buckets[1], Some(5.0));
    }

    #[test]
    fn test_loss_buckets_from_sequence_gaps() {
        let log = "\
64 bytes from 127.0.0.1: icmp_seq=1 ttl=64 time=1.0 ms
64 bytes from 127.0.0.1: icmp_seq=2 ttl=64 time=1.0 ms
64 bytes from 127.0.0.1: icmp_seq=4 ttl=64 time=1.0 ms
64 bytes from 127.0.0.1: icmp_seq=5 ttl=64 time=1.0 ms

--- 127.0.0.1 ping statistics ---
7 packets transmitted, 4 received, 42.8571% packet loss, time 1200ms
";
        let r = reconstructor(3, GapPolicy::Measured);
        let loss = r.loss_buckets(log, &r.ping_replies(log));
        // second 0: seqs 1..=5, seq 3 lost
        assert_eq!(loss[0], Some(0.2));
        // second 1: seqs 6 and 7, both lost
        assert_eq!(loss[1], Some(1.0));
        assert_eq!(loss[2], None);
    }

    #[test]
    fn test_loss_buckets_with_huge_transmitted_count() {
        let log = "\
64 bytes from 127.0.0.1: icmp_seq=1 ttl=64 time=1.0 ms

--- 127.0.0.1 ping statistics ---
4294967295 packets transmitted, 1 received, 99.9999% packet loss, time 1000ms
";
        let r = TimeSeriesReconstructor::new(2, 1e-6, GapPolicy::Measured, None).unwrap();
        let started = std::time::Instant::now();
        let loss = r.loss_buckets(log, &r.ping_replies(log));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        // a million pings scheduled per second, one of them answered
        assert_eq!(loss.len(), 2);
        assert!((loss[0].unwrap() - (1.0 - 1e-6)).abs() < 1e-9);
        assert_eq!(loss[1], Some(1.0));
    }

    #[test]
    fn test_measured_series_never_synthesizes() {
        let series = reconstructor(4, GapPolicy::Measured)
            .reconstruct("cubic", None, Some(IPERF_LOG))
            .unwrap();
        assert_eq!(series.len(), 4);
        assert!(!series.simulated);
        assert_eq!(series.synthetic_rows(), 0);
        for (t, row) in series.rows.iter().enumerate() {
            assert_eq!(row.timestamp as usize, t);
            assert_eq!(row.rtt_ms, SENTINEL);
            assert_eq!(row.loss_rate, SENTINEL);
            assert_eq!(row.rtt_source, Provenance::Missing);
        }
        assert_eq!(series.rows[2].throughput_mbps, SENTINEL);
    }

    #[test]
    fn test_simulated_series_is_seeded_and_flagged() {
        let log = "64 bytes from 127.0.0.1: icmp_seq=1 ttl=64 time=12.0 ms\n";
        let r = reconstructor(10, GapPolicy::Simulated);
        let a = r.reconstruct("cubic", Some(log), None).unwrap();
        let b = r.reconstruct("cubic", Some(log), None).unwrap();
        assert_eq!(a, b);
        assert!(a.simulated);

        assert_eq!(a.rows[0].rtt_ms, 12.0);
        assert_eq!(a.rows[0].rtt_source, Provenance::Measured);
        assert_eq!(a.rows[1].rtt_source, Provenance::Synthetic);
        assert!(a.rows.iter().all(|r| r.loss_rate >= 0.0 && r.loss_source == Provenance::Synthetic));
        assert_eq!(a.synthetic_rows(), 10);
    }

    #[test]
    fn test_row_count_matches_duration() {
        let r = TimeSeriesReconstructor::new(60, 0.2, GapPolicy::Measured, None).unwrap();
        let series = r.reconstruct("vegas", Some(""), Some("")).unwrap();
        assert_eq!(series.len(), 60);
        assert_eq!(series.rows.last().unwrap().timestamp, 59);
    }

    #[test]
    fn test_invalid_interval() {
        assert!(TimeSeriesReconstructor::new(10, 0.0, GapPolicy::Measured, None).is_err());
    }
}
