//! Configuration validation utilities and rules
//!
//! `Config::validate` rejects configurations that cannot run at all. The
//! checks here only produce warnings for configurations that will run but
//! probably not the way the user expects.

use crate::{error::Result, models::Config};
use colored::Colorize;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Smallest ping interval an unprivileged user may request
const MIN_UNPRIVILEGED_PING_INTERVAL: f64 = 0.2;

/// Windows longer than this are flagged
const LONG_WINDOW_SECS: u64 = 3600;

/// Sweeps longer than this are flagged
const LONG_SWEEP_SECS: u64 = 4 * 3600;

/// Configuration validator with advanced validation rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration with comprehensive checks
    pub fn validate_comprehensive(config: &Config) -> Result<Vec<ValidationWarning>> {
        config.validate()?;

        let mut warnings = Vec::new();
        warnings.extend(Self::validate_wrappers(config));
        warnings.extend(Self::validate_profiles(config));
        warnings.extend(Self::validate_timing(config));

        Ok(warnings)
    }

    /// Every configured scheme should resolve to an executable file
    fn validate_wrappers(config: &Config) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        for scheme in config.all_schemes() {
            match std::fs::metadata(&scheme.executable) {
                Ok(meta) if !meta.is_file() => warnings.push(ValidationWarning::new(
                    ValidationLevel::Warning,
                    format!(
                        "Wrapper for '{}' at {} is not a file",
                        scheme.name,
                        scheme.executable.display()
                    ),
                )),
                Ok(meta) if meta.permissions().mode() & 0o111 == 0 => {
                    warnings.push(ValidationWarning::new(
                        ValidationLevel::Warning,
                        format!(
                            "Wrapper for '{}' at {} is not executable",
                            scheme.name,
                            scheme.executable.display()
                        ),
                    ))
                }
                Ok(_) => {}
                Err(_) => warnings.push(ValidationWarning::new(
                    ValidationLevel::Warning,
                    format!(
                        "Wrapper for '{}' not found at {}",
                        scheme.name,
                        scheme.executable.display()
                    ),
                )),
            }
        }

        warnings
    }

    /// Trace files of every profile should exist
    fn validate_profiles(config: &Config) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        for (name, profile) in &config.profiles {
            for trace in [&profile.uplink, &profile.downlink] {
                if !Path::new(trace).is_file() {
                    warnings.push(ValidationWarning::new(
                        ValidationLevel::Warning,
                        format!("Profile '{}': trace file {} not found", name, trace.display()),
                    ));
                }
            }

            if profile.delay_ms > 1000 {
                warnings.push(ValidationWarning::new(
                    ValidationLevel::Info,
                    format!(
                        "Profile '{}' adds {} ms of one-way delay",
                        name, profile.delay_ms
                    ),
                ));
            }
        }

        if !config.profiles.is_empty() {
            let runs = config.profiles.len() as u64 * config.schemes.len() as u64;
            let total = runs * config.duration_secs;
            if total > LONG_SWEEP_SECS {
                warnings.push(ValidationWarning::new(
                    ValidationLevel::Warning,
                    format!(
                        "A full sweep runs {} windows and takes at least {} minutes",
                        runs,
                        total / 60
                    ),
                ));
            }
        }

        warnings
    }

    /// Probe timing relative to the window
    fn validate_timing(config: &Config) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        let interval = config.probes.ping_interval_secs;

        if interval < MIN_UNPRIVILEGED_PING_INTERVAL {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!(
                    "Ping interval of {}s is below {}s and needs root privileges",
                    interval, MIN_UNPRIVILEGED_PING_INTERVAL
                ),
            ));
        }

        let ping_span = interval * config.probes.ping_count as f64;
        if ping_span < config.duration_secs as f64 {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                format!(
                    "RTT probe stops after {:.0}s, before the {}s window ends",
                    ping_span, config.duration_secs
                ),
            ));
        }

        if config.duration_secs > LONG_WINDOW_SECS {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                format!("Long test window of {}s per scheme", config.duration_secs),
            ));
        }

        if config.settle_secs * 2.0 > config.duration_secs as f64 {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!(
                    "Settle delay of {}s takes more than half of the {}s window",
                    config.settle_secs, config.duration_secs
                ),
            ));
        }

        warnings
    }
}

/// Validation warning levels
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationLevel {
    Info,
    Warning,
    Error,
}

impl ValidationLevel {
    /// Get display string for level
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Configuration validation warning
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub level: ValidationLevel,
    pub message: String,
}

impl ValidationWarning {
    /// Create a new validation warning
    pub fn new(level: ValidationLevel, message: String) -> Self {
        Self { level, message }
    }

    /// Format warning for display
    pub fn format(&self, use_color: bool) -> String {
        let tag = format!("[{}]", self.level.as_str());
        if !use_color {
            return format!("{} {}", tag, self.message);
        }
        let tag = match self.level {
            ValidationLevel::Info => tag.blue(),
            ValidationLevel::Warning => tag.yellow(),
            ValidationLevel::Error => tag.red().bold(),
        };
        format!("{} {}", tag, self.message)
    }
}

/// Convenience function for comprehensive configuration validation
pub fn validate_config(config: &Config) -> Result<Vec<ValidationWarning>> {
    ConfigValidator::validate_comprehensive(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NetworkProfile;
    use std::path::PathBuf;

    fn config_with_wrappers(dir: &Path) -> Config {
        let mut config = Config::default();
        config.wrappers_dir = dir.to_path_buf();
        config.schemes = vec!["cubic".to_string()];
        config
    }

    fn write_wrapper(dir: &Path, name: &str, mode: u32) {
        let path = dir.join(format!("{}.py", name));
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn test_validation_warning_format() {
        let warning = ValidationWarning::new(ValidationLevel::Warning, "trace missing".to_string());
        assert_eq!(warning.format(false), "[WARNING] trace missing");
        assert!(warning.format(true).contains("trace missing"));
    }

    #[test]
    fn test_missing_wrapper_warns() {
        let dir = tempfile::tempdir().unwrap();
        let warnings = validate_config(&config_with_wrappers(dir.path())).unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.level == ValidationLevel::Warning && w.message.contains("not found")));
    }

    #[test]
    fn test_non_executable_wrapper_warns() {
        let dir = tempfile::tempdir().unwrap();
        write_wrapper(dir.path(), "cubic", 0o644);
        let warnings = validate_config(&config_with_wrappers(dir.path())).unwrap();
        assert!(warnings.iter().any(|w| w.message.contains("not executable")));
    }

    #[test]
    fn test_clean_configuration() {
        let dir = tempfile::tempdir().unwrap();
        write_wrapper(dir.path(), "cubic", 0o755);
        let warnings = validate_config(&config_with_wrappers(dir.path())).unwrap();
        assert!(warnings.is_empty(), "{:?}", warnings);
    }

    #[test]
    fn test_missing_trace_files_warn() {
        let dir = tempfile::tempdir().unwrap();
        write_wrapper(dir.path(), "cubic", 0o755);
        let mut config = config_with_wrappers(dir.path());
        config.profiles.insert(
            "lte".to_string(),
            NetworkProfile {
                delay_ms: 5,
                uplink: PathBuf::from("/nonexistent/lte.up"),
                downlink: PathBuf::from("/nonexistent/lte.down"),
            },
        );

        let warnings = validate_config(&config).unwrap();
        let trace_warnings = warnings
            .iter()
            .filter(|w| w.message.contains("trace file"))
            .count();
        assert_eq!(trace_warnings, 2);
    }

    #[test]
    fn test_fast_ping_interval_warns() {
        let dir = tempfile::tempdir().unwrap();
        write_wrapper(dir.path(), "cubic", 0o755);
        let mut config = config_with_wrappers(dir.path());
        config.probes.ping_interval_secs = 0.01;
        config.probes.ping_count = 10_000;

        let warnings = validate_config(&config).unwrap();
        assert!(warnings.iter().any(|w| w.message.contains("root privileges")));
    }

    #[test]
    fn test_long_window_and_short_probe() {
        let dir = tempfile::tempdir().unwrap();
        write_wrapper(dir.path(), "cubic", 0o755);
        let mut config = config_with_wrappers(dir.path());
        config.duration_secs = 7200;

        let warnings = validate_config(&config).unwrap();
        assert!(warnings.iter().any(|w| w.message.contains("Long test window")));
        // 300 probes at 0.2s cover one minute only
        assert!(warnings.iter().any(|w| w.message.contains("RTT probe stops")));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let mut config = Config::default();
        config.duration_secs = 0;
        assert!(validate_config(&config).is_err());
    }
}
