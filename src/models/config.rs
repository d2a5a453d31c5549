//! Configuration data model and validation

use crate::logging::LogFormat;
use crate::types::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A transport scheme under test and the wrapper executable that drives it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheme {
    pub name: String,
    pub executable: PathBuf,
}

impl Scheme {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(name: S, executable: P) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
        }
    }
}

/// Shaping parameters handed to the network-emulation sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProfile {
    /// One-way delay in milliseconds
    pub delay_ms: u32,
    /// Uplink packet-delivery trace
    pub uplink: PathBuf,
    /// Downlink packet-delivery trace
    pub downlink: PathBuf,
}

/// Command line of an external probe. Arguments may contain the
/// placeholders `{host}`, `{duration}`, `{interval}` and `{count}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ProbeCommand {
    pub fn new<S: Into<String>>(program: S, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Substitute placeholders in the argument list
    pub fn render(&self, vars: &[(&str, String)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (key, value)| {
                    acc.replace(&format!("{{{}}}", key), value)
                })
            })
            .collect()
    }
}

/// Probe command lines and parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// RTT/loss probe
    #[serde(default = "default_ping")]
    pub ping: ProbeCommand,

    /// Seconds between two RTT probes
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: f64,

    /// Number of RTT probes to send
    #[serde(default = "default_ping_count")]
    pub ping_count: u32,

    /// Throughput server, started before the client. `None` when the client
    /// talks to something already listening.
    #[serde(default = "default_iperf_server")]
    pub throughput_server: Option<ProbeCommand>,

    /// Throughput client whose output is the throughput raw log
    #[serde(default = "default_iperf_client")]
    pub throughput_client: ProbeCommand,

    /// Delay between starting the throughput server and the client
    #[serde(default = "default_iperf_server_settle_ms")]
    pub server_settle_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping: default_ping(),
            ping_interval_secs: default_ping_interval(),
            ping_count: default_ping_count(),
            throughput_server: default_iperf_server(),
            throughput_client: default_iperf_client(),
            server_settle_ms: default_iperf_server_settle_ms(),
        }
    }
}

/// Programs that make up the network-emulation sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Delay shell, invoked as `<delay> <ms> <link> ...`
    #[serde(default = "default_delay_program")]
    pub delay_program: String,

    /// Link shell, invoked as `<link> <uplink> <downlink> -- <cmd>`
    #[serde(default = "default_link_program")]
    pub link_program: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            delay_program: default_delay_program(),
            link_program: default_link_program(),
        }
    }
}

/// What the time-series reconstructor does with seconds that have no data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// Empty buckets stay at the sentinel; loss comes from probe sequence gaps.
    #[default]
    Measured,
    /// Empty RTT buckets and every loss value are drawn from the fixed
    /// placeholder distributions. Rows are flagged synthetic.
    Simulated,
}

impl std::str::FromStr for GapPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "measured" => Ok(GapPolicy::Measured),
            "simulated" => Ok(GapPolicy::Simulated),
            _ => Err(AppError::parse(format!(
                "Invalid gap policy '{}': expected 'measured' or 'simulated'",
                s
            ))),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scheme names selected by `--all`
    #[serde(default = "default_schemes")]
    pub schemes: Vec<String>,

    /// Explicit executables for schemes that do not live in `wrappers_dir`
    #[serde(default)]
    pub scheme_executables: BTreeMap<String, PathBuf>,

    /// Directory holding `<scheme>.py` wrapper executables
    #[serde(default = "default_wrappers_dir")]
    pub wrappers_dir: PathBuf,

    /// Network profiles used by sweeps, keyed by profile name
    #[serde(default)]
    pub profiles: BTreeMap<String, NetworkProfile>,

    /// Length of one test window in seconds
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,

    /// Delay between the first and second role in seconds
    #[serde(default = "default_settle_secs")]
    pub settle_secs: f64,

    /// Upper bound for the `run_first` query in seconds
    #[serde(default = "default_role_query_timeout_secs")]
    pub role_query_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL in milliseconds
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Address the second role and the probes connect to
    #[serde(default = "default_host")]
    pub host: String,

    /// Root directory for per-run artifacts
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    #[serde(default)]
    pub probes: ProbeConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Extra directories whose processes the cleanup sweep may kill
    #[serde(default)]
    pub cleanup_dirs: Vec<PathBuf>,

    #[serde(default)]
    pub gap_policy: GapPolicy,

    /// Seed for simulated gap filling; random when unset
    #[serde(default)]
    pub seed: Option<u64>,

    /// Enable colored terminal output
    #[serde(default = "default_enable_color")]
    pub enable_color: bool,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub log_format: Option<LogFormat>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schemes: default_schemes(),
            scheme_executables: BTreeMap::new(),
            wrappers_dir: default_wrappers_dir(),
            profiles: BTreeMap::new(),
            duration_secs: default_duration_secs(),
            settle_secs: default_settle_secs(),
            role_query_timeout_secs: default_role_query_timeout_secs(),
            kill_grace_ms: default_kill_grace_ms(),
            host: default_host(),
            results_dir: default_results_dir(),
            probes: ProbeConfig::default(),
            sandbox: SandboxConfig::default(),
            cleanup_dirs: Vec::new(),
            gap_policy: GapPolicy::default(),
            seed: None,
            enable_color: default_enable_color(),
            verbose: false,
            debug: false,
            log_format: None,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration file (JSON). Missing fields fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            AppError::config(format!("Invalid config file '{}': {}", path.display(), e))
        })
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs_f64(self.settle_secs)
    }

    pub fn role_query_timeout(&self) -> Duration {
        Duration::from_secs(self.role_query_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Resolve a scheme name to its executable
    pub fn resolve_scheme(&self, name: &str) -> Scheme {
        let executable = self
            .scheme_executables
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.wrappers_dir.join(format!("{}.py", name)));
        Scheme::new(name, executable)
    }

    /// Every configured scheme, in configuration order
    pub fn all_schemes(&self) -> Vec<Scheme> {
        self.schemes.iter().map(|name| self.resolve_scheme(name)).collect()
    }

    /// Directory that receives the artifacts of one scheme's run
    pub fn run_dir(&self, scheme: &str) -> PathBuf {
        self.results_dir.join(scheme)
    }

    /// Path the sandboxed run of `scheme` under `profile` writes to
    pub fn profile_results_dir(&self, profile: &str) -> PathBuf {
        self.results_dir.join(format!("profile_{}", profile))
    }

    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Result<()> {
        for name in &self.schemes {
            validate_scheme_name(name)?;
        }

        if self.duration_secs == 0 {
            return Err(AppError::config("Test duration must be greater than 0"));
        }

        if self.duration_secs > 24 * 3600 {
            return Err(AppError::config("Test duration cannot exceed 24 hours"));
        }

        if !self.settle_secs.is_finite() || self.settle_secs < 0.0 {
            return Err(AppError::config("Settle delay must be a non-negative number of seconds"));
        }

        if self.settle_secs >= self.duration_secs as f64 {
            return Err(AppError::config(format!(
                "Settle delay ({}s) must be shorter than the test duration ({}s)",
                self.settle_secs, self.duration_secs
            )));
        }

        if self.role_query_timeout_secs == 0 {
            return Err(AppError::config("Role query timeout must be greater than 0"));
        }

        if self.host.trim().is_empty() {
            return Err(AppError::config("Host cannot be empty"));
        }

        if !self.probes.ping_interval_secs.is_finite() || self.probes.ping_interval_secs <= 0.0 {
            return Err(AppError::config("Ping interval must be greater than 0"));
        }

        if self.probes.ping.program.is_empty() || self.probes.throughput_client.program.is_empty() {
            return Err(AppError::config("Probe program cannot be empty"));
        }

        if self.sandbox.delay_program.is_empty() || self.sandbox.link_program.is_empty() {
            return Err(AppError::config("Sandbox program cannot be empty"));
        }

        for (name, profile) in &self.profiles {
            if name.trim().is_empty() {
                return Err(AppError::config("Profile name cannot be empty"));
            }
            if profile.uplink.as_os_str().is_empty() || profile.downlink.as_os_str().is_empty() {
                return Err(AppError::config(format!(
                    "Profile '{}' must name both an uplink and a downlink trace",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Merge environment variables into this configuration
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(schemes) = std::env::var("BENCH_SCHEMES") {
            self.schemes = split_list(&schemes);
        }

        if let Ok(dir) = std::env::var("BENCH_WRAPPERS_DIR") {
            self.wrappers_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("BENCH_RESULTS_DIR") {
            self.results_dir = PathBuf::from(dir);
        }

        if let Ok(host) = std::env::var("BENCH_HOST") {
            self.host = host;
        }

        if let Ok(duration) = std::env::var("BENCH_DURATION") {
            self.duration_secs = duration.parse().map_err(|e| {
                AppError::config(format!("Invalid BENCH_DURATION value '{}': {}", duration, e))
            })?;
        }

        if let Ok(settle) = std::env::var("BENCH_SETTLE_SECS") {
            self.settle_secs = settle.parse().map_err(|e| {
                AppError::config(format!("Invalid BENCH_SETTLE_SECS value '{}': {}", settle, e))
            })?;
        }

        if let Ok(policy) = std::env::var("BENCH_GAP_POLICY") {
            self.gap_policy = policy.parse()?;
        }

        if let Ok(enable_color) = std::env::var("ENABLE_COLOR") {
            self.enable_color = enable_color.parse().map_err(|e| {
                AppError::config(format!("Invalid ENABLE_COLOR value '{}': {}", enable_color, e))
            })?;
        }

        Ok(())
    }
}

/// Scheme names become file names and command arguments
pub fn validate_scheme_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::config("Scheme name cannot be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        || name.starts_with('.')
    {
        return Err(AppError::config(format!("Invalid scheme name '{}'", name)));
    }
    Ok(())
}

/// Split a space- or comma-separated list
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// Default value functions for serde
fn default_schemes() -> Vec<String> {
    crate::defaults::DEFAULT_SCHEMES
        .iter()
        .map(|&s| s.to_string())
        .collect()
}

fn default_wrappers_dir() -> PathBuf {
    PathBuf::from(crate::defaults::DEFAULT_WRAPPERS_DIR)
}

fn default_duration_secs() -> u64 {
    crate::defaults::DEFAULT_DURATION.as_secs()
}

fn default_settle_secs() -> f64 {
    crate::defaults::DEFAULT_SETTLE.as_secs_f64()
}

fn default_role_query_timeout_secs() -> u64 {
    crate::defaults::DEFAULT_ROLE_QUERY_TIMEOUT.as_secs()
}

fn default_kill_grace_ms() -> u64 {
    crate::defaults::DEFAULT_KILL_GRACE.as_millis() as u64
}

fn default_host() -> String {
    crate::defaults::DEFAULT_HOST.to_string()
}

fn default_results_dir() -> PathBuf {
    PathBuf::from(crate::defaults::DEFAULT_RESULTS_DIR)
}

fn default_enable_color() -> bool {
    crate::defaults::DEFAULT_ENABLE_COLOR
}

fn default_ping() -> ProbeCommand {
    ProbeCommand::new("ping", crate::defaults::DEFAULT_PING_ARGS)
}

fn default_ping_interval() -> f64 {
    crate::defaults::DEFAULT_PING_INTERVAL
}

fn default_ping_count() -> u32 {
    crate::defaults::DEFAULT_PING_COUNT
}

fn default_iperf_server() -> Option<ProbeCommand> {
    Some(ProbeCommand::new("iperf3", crate::defaults::DEFAULT_IPERF_SERVER_ARGS))
}

fn default_iperf_client() -> ProbeCommand {
    ProbeCommand::new("iperf3", crate::defaults::DEFAULT_IPERF_CLIENT_ARGS)
}

fn default_delay_program() -> String {
    crate::defaults::DEFAULT_DELAY_PROGRAM.to_string()
}

fn default_link_program() -> String {
    crate::defaults::DEFAULT_LINK_PROGRAM.to_string()
}

fn default_iperf_server_settle_ms() -> u64 {
    crate::defaults::DEFAULT_IPERF_SERVER_SETTLE.as_millis() as u64
}
