//! Transport Bench
//!
//! Runs paired sender/receiver processes for a transport scheme under a fixed
//! test deadline, captures RTT/loss and throughput probe output, and turns it
//! into a normalized per-run metrics record and per-second time series.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod process;
pub mod sweep;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use error::{AppError, Result};
pub use metrics::{MetricsParser, TimeSeriesReconstructor};
pub use models::{Config, MetricsRecord, Scheme, TimeSeries, TimeSeriesRow};
pub use orchestrator::{DeadlineSupervisor, RoleNegotiator, RunPipeline, RunReport};
pub use process::{CleanupReaper, ProcessHandle};
pub use sweep::{SandboxExecutor, SweepDriver};
pub use types::{Outcome, Role, RunOrder};

/// Application version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Length of one test window.
    pub const DEFAULT_DURATION: Duration = Duration::from_secs(60);
    /// Delay between starting the first and the second role. There is no
    /// readiness handshake, the first role simply gets this long to bind.
    pub const DEFAULT_SETTLE: Duration = Duration::from_secs(3);
    /// Upper bound for the `run_first` capability query.
    pub const DEFAULT_ROLE_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
    /// Time a process group gets between SIGTERM and SIGKILL.
    pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);
    pub const DEFAULT_HOST: &str = "127.0.0.1";
    pub const DEFAULT_RESULTS_DIR: &str = "results";
    pub const DEFAULT_WRAPPERS_DIR: &str = "src/wrappers";
    pub const DEFAULT_SCHEMES: &[&str] = &["cubic", "fillp", "vegas"];
    pub const DEFAULT_ENABLE_COLOR: bool = true;
    pub const DEFAULT_DELAY_PROGRAM: &str = "mm-delay";
    pub const DEFAULT_LINK_PROGRAM: &str = "mm-link";
    /// Slack on top of the window for one sandboxed run to start up and exit.
    pub const DEFAULT_SANDBOX_MARGIN: Duration = Duration::from_secs(30);
    /// Built-in sweep profiles: name, one-way delay (ms), uplink and downlink trace.
    pub const DEFAULT_PROFILES: &[(&str, u32, &str, &str)] = &[
        (
            "Senario 1",
            5,
            "mahimahi/traces/TMobile-LTE-driving.up",
            "mahimahi/traces/TMobile-LTE-driving.down",
        ),
        (
            "Senario 2",
            200,
            "mahimahi/traces/TMobile-LTE-short.up",
            "mahimahi/traces/TMobile-LTE-short.down",
        ),
    ];

    /// Seconds between two ping probes.
    pub const DEFAULT_PING_INTERVAL: f64 = 0.2;
    pub const DEFAULT_PING_COUNT: u32 = 300;
    pub const DEFAULT_PING_ARGS: &[&str] = &["-D", "-i", "{interval}", "-c", "{count}", "{host}"];
    pub const DEFAULT_IPERF_SERVER_ARGS: &[&str] = &["-s"];
    pub const DEFAULT_IPERF_CLIENT_ARGS: &[&str] = &["-c", "{host}", "-t", "{duration}", "-i", "1"];
    /// Grace period for the iperf server to come up before the client connects.
    pub const DEFAULT_IPERF_SERVER_SETTLE: Duration = Duration::from_secs(1);

    /// Baseline used when synthesizing RTT for empty buckets.
    pub const SYNTHETIC_RTT_MEAN_MS: f64 = 30.0;
    pub const SYNTHETIC_RTT_STD_DEV_MS: f64 = 5.0;
    /// Sinusoidal loss model used in simulated gap-fill mode.
    pub const SYNTHETIC_LOSS_BASE: f64 = 0.02;
    pub const SYNTHETIC_LOSS_AMPLITUDE: f64 = 0.015;
    pub const SYNTHETIC_LOSS_STD_DEV: f64 = 0.005;
}
