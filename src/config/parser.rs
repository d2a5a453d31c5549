//! Configuration parsing from a config file, the environment and CLI arguments

use crate::{
    cli::Cli,
    config::env::EnvManager,
    error::{AppError, Result},
    models::{Config, NetworkProfile},
};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Configuration parser that layers a config file, environment variables
/// and CLI arguments over the defaults
pub struct ConfigParser {
    cli: Cli,
}

impl ConfigParser {
    /// Create a new configuration parser with CLI arguments
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Parse and build the complete configuration
    pub fn parse(&self) -> Result<Config> {
        let mut config = match self.cli.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };

        self.load_env_file()?;
        config.merge_from_env()?;
        self.apply_cli_overrides(&mut config)?;

        config.validate()?;

        Ok(config)
    }

    /// Load .env file if it exists
    fn load_env_file(&self) -> Result<()> {
        EnvManager::load_env_file(self.cli.debug)
    }

    /// Apply CLI argument overrides to configuration
    fn apply_cli_overrides(&self, config: &mut Config) -> Result<()> {
        if let Some(names) = self.cli.scheme_names() {
            config.schemes = names;
        }

        if let Some(ref dir) = self.cli.results_dir {
            config.results_dir = dir.clone();
        }

        if let Some(ref dir) = self.cli.wrappers_dir {
            config.wrappers_dir = dir.clone();
        }

        if let Some(duration) = self.cli.duration {
            config.duration_secs = duration;
        }

        if let Some(settle) = self.cli.settle {
            config.settle_secs = settle;
        }

        if let Some(policy) = self.cli.gap_policy {
            config.gap_policy = policy;
        }

        if let Some(seed) = self.cli.seed {
            config.seed = Some(seed);
        }

        if let Some(ref host) = self.cli.host {
            config.host = host.clone();
        }

        config.cleanup_dirs.extend(self.cli.cleanup_dirs.iter().cloned());

        if self.cli.no_color {
            config.enable_color = false;
        }

        if let Some(format) = self.cli.log_format {
            config.log_format = Some(format);
        }

        // CLI-only flags
        config.verbose = self.cli.verbose;
        config.debug = self.cli.debug;

        if self.cli.sweep {
            if config.profiles.is_empty() {
                config.profiles = default_profiles();
            }
            if !self.cli.profiles.is_empty() {
                config.profiles = select_profiles(&config.profiles, &self.cli.profiles)?;
            }
        }

        if config.debug {
            println!("Applied CLI overrides to configuration");
            println!(
                "Final config: schemes={}, duration={}s, settle={}s, results_dir={}",
                config.schemes.join(" "),
                config.duration_secs,
                config.settle_secs,
                config.results_dir.display()
            );
        }

        Ok(())
    }
}

/// The built-in LTE profiles used when a sweep is requested without any
/// configured profiles
pub fn default_profiles() -> BTreeMap<String, NetworkProfile> {
    crate::defaults::DEFAULT_PROFILES
        .iter()
        .map(|&(name, delay_ms, uplink, downlink)| {
            (
                name.to_string(),
                NetworkProfile {
                    delay_ms,
                    uplink: PathBuf::from(uplink),
                    downlink: PathBuf::from(downlink),
                },
            )
        })
        .collect()
}

/// Keep only the requested profiles, in configuration order
fn select_profiles(
    profiles: &BTreeMap<String, NetworkProfile>,
    wanted: &[String],
) -> Result<BTreeMap<String, NetworkProfile>> {
    let mut selected = BTreeMap::new();
    for name in wanted {
        let profile = profiles.get(name).ok_or_else(|| {
            AppError::config(format!(
                "Unknown profile '{}'. Configured profiles: {}",
                name,
                profiles.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })?;
        selected.insert(name.clone(), profile.clone());
    }
    Ok(selected)
}

/// Convenience function to load complete configuration from CLI arguments
pub fn load_config(cli: Cli) -> Result<Config> {
    let parser = ConfigParser::new(cli);
    parser.parse()
}

/// Display configuration summary for debug purposes
pub fn display_config_summary(config: &Config) -> String {
    let mut summary = Vec::new();

    summary.push(format!("Schemes: {}", config.schemes.join(", ")));
    summary.push(format!("Wrappers: {}", config.wrappers_dir.display()));
    summary.push(format!("Results: {}", config.results_dir.display()));
    summary.push(format!("Duration: {}s", config.duration_secs));
    summary.push(format!("Settle: {}s", config.settle_secs));
    summary.push(format!("Host: {}", config.host));
    summary.push(format!("Gap Policy: {:?}", config.gap_policy));
    if !config.profiles.is_empty() {
        summary.push(format!(
            "Profiles: {}",
            config.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    summary.push(format!("Color Output: {}", config.enable_color));
    summary.push(format!("Verbose: {}", config.verbose));
    summary.push(format!("Debug: {}", config.debug));

    summary.join("\n")
}
