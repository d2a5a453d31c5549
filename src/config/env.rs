//! Environment variable handling and .env file management

use crate::error::{AppError, Result};
use crate::models::config::{split_list, validate_scheme_name, GapPolicy};
use std::path::Path;

/// Environment variable configuration manager
pub struct EnvManager;

impl EnvManager {
    /// Load .env file if it exists
    pub fn load_env_file(debug: bool) -> Result<()> {
        Self::load_env_file_from(Path::new(".env"), debug)
    }

    /// Load a specific env file if it exists. Variables already set in the
    /// process environment win over the file.
    pub fn load_env_file_from(path: &Path, debug: bool) -> Result<()> {
        if path.exists() {
            dotenv::from_path(path)
                .map_err(|e| AppError::config(format!("Failed to load {}: {}", path.display(), e)))?;

            if debug {
                println!("Loaded configuration from {}", path.display());
            }
        } else if debug {
            println!("No .env file found, using defaults and CLI arguments");
        }

        Ok(())
    }

    /// Create example .env file content
    pub fn create_example_env_content() -> String {
        r#"# Transport Bench Configuration
#
# Values here are defaults for every run. A JSON file passed with --config
# is read first, these variables override it, and command-line arguments
# override both.

# Schemes tested by --all (space- or comma-separated)
# BENCH_SCHEMES=cubic fillp vegas

# Directory holding <scheme>.py wrapper executables
# BENCH_WRAPPERS_DIR=src/wrappers

# Root directory for run artifacts
# BENCH_RESULTS_DIR=results

# Address the second role and the probes connect to
# BENCH_HOST=127.0.0.1

# Test window length in seconds
# BENCH_DURATION=60

# Delay between starting the first and the second role, in seconds
# BENCH_SETTLE_SECS=3

# Time-series gap handling: measured or simulated
# BENCH_GAP_POLICY=measured

# Enable colored output (true/false)
# ENABLE_COLOR=true

# Example configurations for different scenarios:
#
# Quick smoke run of a single scheme:
# BENCH_SCHEMES=cubic
# BENCH_DURATION=10
# BENCH_SETTLE_SECS=1
"#
        .to_string()
    }

    /// Save example .env file to disk
    pub fn save_example_env_file(path: &Path) -> Result<()> {
        let content = Self::create_example_env_content();
        std::fs::write(path, content)
            .map_err(|e| AppError::config(format!("Failed to write example .env file: {}", e)))?;

        Ok(())
    }

    /// Validate environment variable format before parsing
    pub fn validate_env_var(key: &str, value: &str) -> Result<()> {
        match key {
            "BENCH_SCHEMES" => {
                let schemes = split_list(value);
                if schemes.is_empty() {
                    return Err(AppError::config("BENCH_SCHEMES cannot be empty"));
                }
                for scheme in &schemes {
                    validate_scheme_name(scheme)?;
                }
            }
            "BENCH_WRAPPERS_DIR" | "BENCH_RESULTS_DIR" | "BENCH_HOST" => {
                if value.trim().is_empty() {
                    return Err(AppError::config(format!("{} cannot be empty", key)));
                }
            }
            "BENCH_DURATION" => {
                let secs: u64 = value.parse().map_err(|e| {
                    AppError::config(format!("Invalid BENCH_DURATION value '{}': {}", value, e))
                })?;
                if secs == 0 || secs > 24 * 3600 {
                    return Err(AppError::config(format!(
                        "BENCH_DURATION must be between 1 and 86400, got: {}",
                        secs
                    )));
                }
            }
            "BENCH_SETTLE_SECS" => {
                let secs: f64 = value.parse().map_err(|e| {
                    AppError::config(format!("Invalid BENCH_SETTLE_SECS value '{}': {}", value, e))
                })?;
                if !secs.is_finite() || secs < 0.0 {
                    return Err(AppError::config(format!(
                        "BENCH_SETTLE_SECS must be a non-negative number, got: {}",
                        value
                    )));
                }
            }
            "BENCH_GAP_POLICY" => {
                value.parse::<GapPolicy>()?;
            }
            "ENABLE_COLOR" => {
                value.parse::<bool>().map_err(|e| {
                    AppError::config(format!("Invalid ENABLE_COLOR value '{}': {}", value, e))
                })?;
            }
            _ => {}
        }

        Ok(())
    }

    /// Get list of all supported environment variables with descriptions
    pub fn get_supported_env_vars() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("BENCH_SCHEMES", "Schemes tested by --all", "cubic fillp vegas"),
            ("BENCH_WRAPPERS_DIR", "Directory of scheme wrappers", "src/wrappers"),
            ("BENCH_RESULTS_DIR", "Root directory for run artifacts", "results"),
            ("BENCH_HOST", "Address roles and probes connect to", "127.0.0.1"),
            ("BENCH_DURATION", "Test window in seconds (1-86400)", "60"),
            ("BENCH_SETTLE_SECS", "Delay before the second role, seconds", "3"),
            ("BENCH_GAP_POLICY", "measured or simulated", "measured"),
            ("ENABLE_COLOR", "Enable colored output", "true"),
        ]
    }

    /// Display environment variable help
    pub fn display_env_help() -> String {
        let mut help = String::new();
        help.push_str("Supported Environment Variables:\n\n");

        for (var, description, example) in Self::get_supported_env_vars() {
            help.push_str(&format!("  {:<20} {}\n", var, description));
            help.push_str(&format!("  {:<20} Example: {}\n\n", "", example));
        }

        help.push_str("Configuration Priority (highest to lowest):\n");
        help.push_str("  1. Command-line arguments\n");
        help.push_str("  2. Environment variables\n");
        help.push_str("  3. .env file values\n");
        help.push_str("  4. --config file\n");
        help.push_str("  5. Default values\n");

        help
    }

    /// Validate all currently set environment variables
    pub fn validate_current_env() -> Vec<String> {
        Self::get_supported_env_vars()
            .into_iter()
            .filter_map(|(var_name, _, _)| {
                let value = std::env::var(var_name).ok()?;
                Self::validate_env_var(var_name, &value)
                    .err()
                    .map(|e| format!("Warning: {}", e))
            })
            .collect()
    }

    /// Check an env file and validate its contents. `None` if it does not exist.
    pub fn check_env_file(path: &Path) -> Result<Option<Vec<String>>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::config(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut warnings = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                if let Err(e) = Self::validate_env_var(key.trim(), value.trim()) {
                    warnings.push(format!("Line '{}': {}", line, e));
                }
            }
        }

        Ok(Some(warnings))
    }
}
