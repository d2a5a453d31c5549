//! Data models and structures for the benchmark harness

pub mod config;
pub mod metrics;

// Re-export main model types
pub use config::{
    Config, GapPolicy, NetworkProfile, ProbeCommand, ProbeConfig, SandboxConfig, Scheme,
};
pub use metrics::{MetricsRecord, Provenance, RawLog, TimeSeries, TimeSeriesRow, SENTINEL};
