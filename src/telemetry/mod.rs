//! Concurrent RTT/loss and throughput probes

pub mod collector;

pub use collector::{ProbeSpec, TelemetryCollector, TelemetrySession};
