//! Profile sweeps: every selected scheme under every network profile
//!
//! Each run is a child invocation of this binary wrapped in the emulation
//! sandbox (`mm-delay <ms> mm-link <up> <down> -- tbench --schemes X ...`).
//! The child does the whole in-process pipeline; the parent only waits for it
//! and reads back the metrics log and time series it wrote.

use crate::error::ErrorContext;
use crate::logging::LoggerFactory;
use crate::models::{Config, MetricsRecord, NetworkProfile, Scheme, TimeSeries};
use crate::orchestrator::{run_batch, stopped_early, BatchEntry, BatchEvent, RunExecutor, RunReport};
use crate::process::{CleanupReaper, Interrupt, ProcessHandle, SweepTargets};
use crate::types::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Config file handed to the sandboxed child, written into the profile directory
pub const SANDBOX_CONFIG_FILE: &str = "sandbox_config.json";

/// The full sandbox invocation for one run
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxCommand {
    pub delay_program: String,
    pub link_program: String,
    pub profile: NetworkProfile,
    pub inner_program: PathBuf,
    pub inner_args: Vec<String>,
}

impl SandboxCommand {
    /// Argument vector, program first. The link shell takes the uplink
    /// trace before the downlink trace.
    pub fn argv(&self) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec![
            self.delay_program.clone().into(),
            self.profile.delay_ms.to_string().into(),
            self.link_program.clone().into(),
            self.profile.uplink.clone().into_os_string(),
            self.profile.downlink.clone().into_os_string(),
            "--".into(),
            self.inner_program.clone().into_os_string(),
        ];
        argv.extend(self.inner_args.iter().map(OsString::from));
        argv
    }

    pub fn to_command(&self) -> Command {
        let argv = self.argv();
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        command
    }
}

impl std::fmt::Display for SandboxCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .argv()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        f.write_str(&parts.join(" "))
    }
}

/// Runs one scheme inside one profile's sandbox
pub struct SandboxExecutor {
    config: Config,
    profile_name: String,
    profile: NetworkProfile,
    self_exe: PathBuf,
    timeout: Duration,
    reaper: CleanupReaper,
    loggers: LoggerFactory,
    interrupt: Interrupt,
}

impl SandboxExecutor {
    pub fn new(config: Config, profile_name: &str, profile: NetworkProfile, self_exe: PathBuf) -> Self {
        let timeout = sandbox_timeout(&config);
        Self {
            loggers: LoggerFactory::new(config.clone()),
            config,
            profile_name: profile_name.to_string(),
            profile,
            self_exe,
            timeout,
            reaper: CleanupReaper::new(),
            interrupt: Interrupt::never(),
        }
    }

    /// Stop the sandboxed run when `interrupt` fires
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    /// Absolute results directory of this profile
    pub fn results_dir(&self) -> Result<PathBuf> {
        absolute(&self.config.profile_results_dir(&self.profile_name))
    }

    /// Arguments of the sandboxed child. Settings that the environment could
    /// override are passed explicitly so the child sees the parent's values.
    pub fn inner_args(&self, scheme: &Scheme, results_dir: &Path, config_file: &Path) -> Result<Vec<String>> {
        let mut args = vec![
            "--schemes".to_string(),
            scheme.name.clone(),
            "--config".to_string(),
            config_file.display().to_string(),
            "--results-dir".to_string(),
            results_dir.display().to_string(),
            "--wrappers-dir".to_string(),
            absolute(&self.config.wrappers_dir)?.display().to_string(),
            "--duration".to_string(),
            self.config.duration_secs.to_string(),
            "--settle".to_string(),
            self.config.settle_secs.to_string(),
            "--host".to_string(),
            self.config.host.clone(),
            "--gap-policy".to_string(),
            format!("{:?}", self.config.gap_policy).to_lowercase(),
        ];

        if let Some(seed) = self.config.seed {
            args.push("--seed".to_string());
            args.push(seed.to_string());
        }
        if !self.config.enable_color {
            args.push("--no-color".to_string());
        }
        if self.config.verbose {
            args.push("--verbose".to_string());
        }
        if self.config.debug {
            args.push("--debug".to_string());
        }

        Ok(args)
    }

    pub fn command(&self, scheme: &Scheme, results_dir: &Path, config_file: &Path) -> Result<SandboxCommand> {
        Ok(SandboxCommand {
            delay_program: self.config.sandbox.delay_program.clone(),
            link_program: self.config.sandbox.link_program.clone(),
            profile: self.profile.clone(),
            inner_program: self.self_exe.clone(),
            inner_args: self.inner_args(scheme, results_dir, config_file)?,
        })
    }

    /// Write the configuration the child reads. Profiles are dropped; the
    /// child never sweeps.
    fn write_child_config(&self, results_dir: &Path) -> Result<PathBuf> {
        let mut child = self.config.clone();
        child.profiles.clear();
        child.scheme_executables = child
            .scheme_executables
            .iter()
            .map(|(name, exe)| Ok((name.clone(), absolute(exe)?)))
            .collect::<Result<_>>()?;

        let path = results_dir.join(SANDBOX_CONFIG_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(&child)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    async fn execute(&self, scheme: &Scheme, command: &SandboxCommand) -> Result<()> {
        let mut handle = ProcessHandle::spawn(
            format!("{} sandbox ({})", scheme.name, self.profile_name),
            command.to_command(),
            true,
        )
        .map_err(|e| AppError::sandbox(format!("Cannot start {}: {}", command.delay_program, e)))?;

        let waited = tokio::select! {
            waited = tokio::time::timeout(self.timeout, handle.wait()) => waited,
            signal = self.interrupt.wait() => {
                // SIGTERM lets the child tbench stop its own roles and probes
                handle.shutdown(child_stop_grace(&self.config)).await?;
                return Err(AppError::interrupted(signal));
            }
        };
        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                handle.kill().await?;
                return Err(e);
            }
            Err(_) => {
                handle.shutdown(self.config.kill_grace()).await?;
                return Err(AppError::sandbox(format!(
                    "{} in profile '{}' did not finish within {}s",
                    scheme.name,
                    self.profile_name,
                    self.timeout.as_secs()
                )));
            }
        };

        // leftovers in the sandbox's group
        handle.kill().await?;

        if !status.success() {
            return Err(AppError::sandbox(format!(
                "{} in profile '{}': sandboxed run exited with {}",
                scheme.name, self.profile_name, status
            )));
        }
        Ok(())
    }

    fn sweep_targets(&self, run_dir: &Path) -> SweepTargets {
        let mut wrapper_dirs = vec![self.config.wrappers_dir.clone()];
        wrapper_dirs.extend(self.config.cleanup_dirs.iter().cloned());
        let run_dir = run_dir.canonicalize().unwrap_or_else(|_| run_dir.to_path_buf());
        SweepTargets::new(wrapper_dirs, Some(run_dir))
    }
}

#[async_trait]
impl RunExecutor for SandboxExecutor {
    async fn run_scheme(&self, scheme: &Scheme) -> Result<RunReport> {
        let results_dir = self.results_dir()?;
        std::fs::create_dir_all(&results_dir).map_err(|e| {
            AppError::io(format!("Failed to create {}: {}", results_dir.display(), e))
        })?;
        let run_dir = results_dir.join(&scheme.name);

        let mut log = self.loggers.create_run_logger(&scheme.name).await;
        let started_at = Utc::now();

        log.begin_stage("sandbox").await;
        let executed = match self.write_child_config(&results_dir) {
            Ok(config_file) => match self.command(scheme, &results_dir, &config_file) {
                Ok(command) => {
                    log.logger()
                        .debug(&format!("Sandbox command: {}", command))
                        .correlation_id(log.correlation_id())
                        .log()
                        .await;
                    self.execute(scheme, &command).await
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        log.end_stage("sandbox").await;

        let collected = executed.and_then(|()| read_artifacts(&scheme.name, &run_dir));
        let (metrics, metrics_path, csv_path, series_rows, synthetic_rows) = match collected {
            Ok(artifacts) => artifacts,
            Err(e) => {
                let errors = self.loggers.create_error_logger();
                let context = format!("Testing {} in {}", scheme.name, self.profile_name);
                errors.log_error(&e, Some(&context), Some(log.correlation_id())).await;
                match self.reaper.sweep(&self.sweep_targets(&run_dir)) {
                    Ok(killed) => errors.log_sweep(killed, Some(log.correlation_id())).await,
                    Err(sweep_err) => {
                        errors
                            .log_error(&sweep_err, Some("Cleanup sweep"), Some(log.correlation_id()))
                            .await
                    }
                }
                log.finish(false).await;
                return Err(e);
            }
        };

        log.metrics(&metrics).await;
        let elapsed = log.finish(true).await;

        Ok(RunReport {
            scheme: scheme.name.clone(),
            roles: None,
            started_at,
            elapsed,
            metrics,
            run_dir,
            metrics_path,
            csv_path,
            series_rows,
            synthetic_rows,
        })
    }

    fn describe(&self) -> String {
        format!(
            "profile '{}': {} ms delay, uplink {}, downlink {}",
            self.profile_name,
            self.profile.delay_ms,
            self.profile.uplink.display(),
            self.profile.downlink.display()
        )
    }
}

type Artifacts = (MetricsRecord, PathBuf, PathBuf, usize, usize);

/// Read what the sandboxed child left in its run directory
fn read_artifacts(scheme: &str, run_dir: &Path) -> Result<Artifacts> {
    let metrics_path = run_dir.join(MetricsRecord::file_name(scheme));
    let text = std::fs::read_to_string(&metrics_path).map_err(|e| {
        AppError::sandbox(format!("No metrics log at {}: {}", metrics_path.display(), e))
    })?;
    let metrics = MetricsRecord::from_report(&text)?;

    let csv_path = run_dir.join(TimeSeries::file_name(scheme));
    let (series_rows, synthetic_rows) = match std::fs::read_to_string(&csv_path) {
        Ok(csv) => csv_row_counts(&csv),
        Err(_) => (0, 0),
    };

    Ok((metrics, metrics_path, csv_path, series_rows, synthetic_rows))
}

/// Data rows and rows flagged synthetic in a time-series CSV
fn csv_row_counts(csv: &str) -> (usize, usize) {
    let mut lines = csv.lines();
    let flagged = lines
        .next()
        .map(|header| header.ends_with(",synthetic"))
        .unwrap_or(false);

    let mut rows = 0;
    let mut synthetic = 0;
    for line in lines.filter(|l| !l.trim().is_empty()) {
        rows += 1;
        if flagged && line.ends_with(",1") {
            synthetic += 1;
        }
    }
    (rows, synthetic)
}

/// Time an interrupted sandboxed child gets to shut down its own processes:
/// both roles, then the probes, each within the kill grace
fn child_stop_grace(config: &Config) -> Duration {
    config.kill_grace() * 3 + Duration::from_secs(1)
}

/// Upper bound on one sandboxed run
fn sandbox_timeout(config: &Config) -> Duration {
    config.role_query_timeout()
        + config.settle()
        + config.duration()
        + Duration::from_millis(config.probes.server_settle_ms)
        + config.kill_grace() * 4
        + crate::defaults::DEFAULT_SANDBOX_MARGIN
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| AppError::io(format!("Cannot resolve {}: {}", path.display(), e)))?;
    Ok(cwd.join(path))
}

/// Results of every scheme in one profile
#[derive(Debug)]
pub struct ProfileRun {
    pub profile: String,
    pub entries: Vec<BatchEntry>,
}

/// Iterates profiles x schemes. Failed runs are reported and the sweep moves on.
pub struct SweepDriver {
    config: Config,
    self_exe: PathBuf,
    interrupt: Interrupt,
}

impl SweepDriver {
    pub fn new(config: Config, self_exe: PathBuf) -> Self {
        Self {
            config,
            self_exe,
            interrupt: Interrupt::never(),
        }
    }

    /// Stop the sweep, after cleaning up the current run, when `interrupt` fires
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Sweep driver that re-invokes the running binary
    pub fn from_current_exe(config: Config) -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| AppError::internal(format!("Cannot locate own executable: {}", e)))?;
        Ok(Self::new(config, exe))
    }

    pub fn executor(&self, name: &str, profile: &NetworkProfile) -> SandboxExecutor {
        SandboxExecutor::new(self.config.clone(), name, profile.clone(), self.self_exe.clone())
            .with_interrupt(self.interrupt.clone())
    }

    /// Run `schemes` under every configured profile, in profile order. A
    /// fatal error ends the sweep after the profile it happened in.
    pub async fn run<F>(&self, schemes: &[Scheme], mut observe: F) -> Result<Vec<ProfileRun>>
    where
        F: FnMut(&str, BatchEvent<'_>),
    {
        if self.config.profiles.is_empty() {
            return Err(AppError::config("No network profiles configured for the sweep"));
        }

        let mut runs = Vec::with_capacity(self.config.profiles.len());
        for (name, profile) in &self.config.profiles {
            let executor = self.executor(name, profile);
            let entries = run_batch(&executor, schemes, |event| observe(name, event)).await;
            let stop = stopped_early(&entries);
            runs.push(ProfileRun {
                profile: name.clone(),
                entries,
            });
            if stop {
                break;
            }
        }
        Ok(runs)
    }
}
