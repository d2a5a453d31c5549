//! Command-line interface

use crate::logging::LogFormat;
use crate::models::config::{split_list, GapPolicy};
use clap::{ArgAction, ArgGroup, Parser};
use std::path::PathBuf;

/// Transport Bench - runs paired transport-scheme processes under a fixed
/// deadline and extracts RTT, loss and throughput telemetry
#[derive(Parser, Debug, Clone)]
#[command(name = "tbench")]
#[command(version, about, long_about = None)]
#[command(group(
    ArgGroup::new("selection")
        .args(["all", "schemes"])
        .multiple(false)
))]
pub struct Cli {
    /// Test every scheme listed in the configuration
    #[arg(long, required_unless_present_any = ["schemes", "cleanup_dirs"])]
    pub all: bool,

    /// Test a space-separated list of schemes, e.g. "cubic vegas"
    #[arg(long, value_name = "\"SCHEME1 SCHEME2...\"")]
    pub schemes: Option<String>,

    /// Run every selected scheme inside each network profile's sandbox
    #[arg(long)]
    pub sweep: bool,

    /// Restrict a sweep to the named profile (can be used multiple times)
    #[arg(long = "profile", action = ArgAction::Append, requires = "sweep")]
    pub profiles: Vec<String>,

    /// JSON configuration file with schemes and network profiles
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Root directory for run artifacts
    #[arg(long, value_name = "DIR")]
    pub results_dir: Option<PathBuf>,

    /// Directory holding the scheme wrapper executables
    #[arg(long, value_name = "DIR")]
    pub wrappers_dir: Option<PathBuf>,

    /// Test window length in seconds
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<u64>,

    /// Delay between starting the first and the second role, in seconds
    #[arg(long, value_parser = parse_settle)]
    pub settle: Option<f64>,

    /// Gap handling of the time series: measured or simulated
    #[arg(long, value_parser = parse_gap_policy)]
    pub gap_policy: Option<GapPolicy>,

    /// Seed for simulated gap filling
    #[arg(long)]
    pub seed: Option<u64>,

    /// Address the second role and the probes connect to
    #[arg(long)]
    pub host: Option<String>,

    /// Kill leftover processes under this directory and exit (can be used multiple times)
    #[arg(long = "cleanup-dir", value_name = "DIR", action = ArgAction::Append)]
    pub cleanup_dirs: Vec<PathBuf>,

    /// Enable verbose output
    #[arg(long)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Log format: console, json or compact
    #[arg(long, value_parser = parse_log_format)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Validate CLI arguments for conflicts and requirements
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref schemes) = self.schemes {
            if split_list(schemes).is_empty() {
                return Err("--schemes needs at least one scheme name".to_string());
            }
        }

        if self.is_cleanup_only() && self.sweep {
            return Err("--cleanup-dir cannot be combined with --sweep".to_string());
        }

        if self.profiles.iter().any(|p| p.trim().is_empty()) {
            return Err("--profile cannot be empty".to_string());
        }

        Ok(())
    }

    /// Scheme names given with `--schemes`. `None` means every configured scheme.
    pub fn scheme_names(&self) -> Option<Vec<String>> {
        if self.all {
            return None;
        }
        self.schemes.as_deref().map(split_list)
    }

    /// Only a cleanup sweep was requested
    pub fn is_cleanup_only(&self) -> bool {
        !self.cleanup_dirs.is_empty() && !self.all && self.schemes.is_none()
    }

    /// Check if colors should be enabled
    pub fn use_colors(&self) -> bool {
        if self.no_color {
            false
        } else {
            supports_color()
        }
    }

    /// Get configuration summary for display
    pub fn get_config_summary(&self) -> String {
        let mut summary = String::new();

        summary.push_str("Configuration Summary:\n");
        match self.scheme_names() {
            Some(names) => summary.push_str(&format!("  Schemes: {}\n", names.join(", "))),
            None if self.all => summary.push_str("  Schemes: all configured\n"),
            None => {}
        }
        if self.sweep {
            if self.profiles.is_empty() {
                summary.push_str("  Sweep: all profiles\n");
            } else {
                summary.push_str(&format!("  Sweep: {}\n", self.profiles.join(", ")));
            }
        }
        if let Some(duration) = self.duration {
            summary.push_str(&format!("  Duration: {}s\n", duration));
        }
        if let Some(ref config) = self.config {
            summary.push_str(&format!("  Config file: {}\n", config.display()));
        }
        summary.push_str(&format!("  Colored output: {}\n", self.use_colors()));
        summary.push_str(&format!("  Verbose mode: {}\n", self.verbose));
        summary.push_str(&format!("  Debug mode: {}\n", self.debug));

        summary
    }
}

/// Parse a window length in seconds
fn parse_duration(s: &str) -> Result<u64, String> {
    if s.starts_with('+') || s.starts_with("0x") || s.starts_with("0X") {
        return Err(format!("Invalid duration: {}", s));
    }

    s.parse::<u64>()
        .map_err(|_| format!("Invalid duration: {}", s))
        .and_then(|secs| {
            if secs == 0 {
                Err("Duration must be greater than 0".to_string())
            } else if secs > 24 * 3600 {
                Err("Duration cannot exceed 24 hours".to_string())
            } else {
                Ok(secs)
            }
        })
}

fn parse_settle(s: &str) -> Result<f64, String> {
    let secs: f64 = s.parse().map_err(|_| format!("Invalid settle delay: {}", s))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err("Settle delay must be a non-negative number of seconds".to_string());
    }
    Ok(secs)
}

fn parse_gap_policy(s: &str) -> Result<GapPolicy, String> {
    s.parse().map_err(|e: crate::error::AppError| e.to_string())
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse().map_err(|e: crate::error::AppError| e.to_string())
}

/// Check if the terminal supports color output
fn supports_color() -> bool {
    if let Ok(term) = std::env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    cfg!(unix)
}
