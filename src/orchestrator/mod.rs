//! Run pipeline: negotiate roles, supervise the window, collect telemetry,
//! and turn the raw logs into artifacts
//!
//! This module contains the per-scheme execution components:
//! - Role negotiation through the `run_first` query
//! - Deadline supervision of the two role processes
//! - The pipeline gluing both to telemetry, parsing and the leak sweep

pub mod roles;
pub mod supervisor;

pub use roles::RoleNegotiator;
pub use supervisor::{Deadline, DeadlineSupervisor, RunHandle, RunWindow};

use crate::error::ErrorContext;
use crate::logging::{LoggerFactory, RunLogger};
use crate::metrics::{MetricsParser, TimeSeriesReconstructor};
use crate::models::{Config, MetricsRecord, Scheme, TimeSeries};
use crate::process::{CleanupReaper, Interrupt, SweepTargets};
use crate::telemetry::TelemetryCollector;
use crate::types::{AppError, Outcome, Result, RoleAssignment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything a successful run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub scheme: String,
    /// `None` when the run happened in a sandboxed child invocation
    pub roles: Option<RoleAssignment>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub metrics: MetricsRecord,
    pub run_dir: PathBuf,
    pub metrics_path: PathBuf,
    pub csv_path: PathBuf,
    pub series_rows: usize,
    pub synthetic_rows: usize,
}

/// Runs one scheme end to end
#[async_trait]
pub trait RunExecutor: Send + Sync {
    /// Run `scheme` and return its report. Failed outcomes are errors.
    async fn run_scheme(&self, scheme: &Scheme) -> Result<RunReport>;

    /// Short description shown before a batch starts
    fn describe(&self) -> String;
}

/// Outcome of one scheme in a batch
#[derive(Debug)]
pub struct BatchEntry {
    pub scheme: String,
    pub result: Result<RunReport>,
}

/// Progress of a batch, reported as it happens
#[derive(Debug)]
pub enum BatchEvent<'a> {
    Starting {
        index: usize,
        total: usize,
        scheme: &'a Scheme,
    },
    Finished {
        index: usize,
        total: usize,
        entry: &'a BatchEntry,
    },
}

/// Run every scheme in order. A failed scheme does not stop the batch; a
/// fatal error such as an interrupt does, after its entry is recorded.
/// Indices passed to `observe` start at 1.
pub async fn run_batch<F>(executor: &dyn RunExecutor, schemes: &[Scheme], mut observe: F) -> Vec<BatchEntry>
where
    F: FnMut(BatchEvent<'_>),
{
    let total = schemes.len();
    let mut entries = Vec::with_capacity(total);
    for (i, scheme) in schemes.iter().enumerate() {
        observe(BatchEvent::Starting {
            index: i + 1,
            total,
            scheme,
        });
        let entry = BatchEntry {
            scheme: scheme.name.clone(),
            result: executor.run_scheme(scheme).await,
        };
        observe(BatchEvent::Finished {
            index: i + 1,
            total,
            entry: &entry,
        });
        let fatal = matches!(entry.result, Err(ref e) if e.is_fatal());
        entries.push(entry);
        if fatal {
            break;
        }
    }
    entries
}

/// Whether any entry ended with an error that stops the invocation
pub fn stopped_early(entries: &[BatchEntry]) -> bool {
    entries
        .iter()
        .any(|entry| matches!(entry.result, Err(ref e) if e.is_fatal()))
}

/// The in-process pipeline for a single scheme
pub struct RunPipeline {
    config: Config,
    negotiator: RoleNegotiator,
    supervisor: DeadlineSupervisor,
    telemetry: TelemetryCollector,
    parser: MetricsParser,
    reconstructor: TimeSeriesReconstructor,
    reaper: CleanupReaper,
    loggers: LoggerFactory,
    interrupt: Interrupt,
}

impl RunPipeline {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            negotiator: RoleNegotiator::new(config.role_query_timeout()),
            supervisor: DeadlineSupervisor::from_config(&config),
            telemetry: TelemetryCollector::from_config(&config),
            parser: MetricsParser::new()?,
            reconstructor: TimeSeriesReconstructor::from_config(&config)?,
            reaper: CleanupReaper::new(),
            loggers: LoggerFactory::new(config.clone()),
            interrupt: Interrupt::never(),
            config,
        })
    }

    /// Stop the current run when `interrupt` fires
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.supervisor = self.supervisor.with_interrupt(interrupt.clone());
        self.interrupt = interrupt;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn sweep_targets(&self, run_dir: &Path) -> SweepTargets {
        let mut wrapper_dirs = vec![self.config.wrappers_dir.clone()];
        let explicit = self.config.scheme_executables.values().filter_map(|exe| exe.parent());
        for dir in explicit.chain(self.config.cleanup_dirs.iter().map(PathBuf::as_path)) {
            if !wrapper_dirs.iter().any(|known| known == dir) {
                wrapper_dirs.push(dir.to_path_buf());
            }
        }
        let run_dir = run_dir.canonicalize().unwrap_or_else(|_| run_dir.to_path_buf());
        SweepTargets::new(wrapper_dirs, Some(run_dir))
    }

    /// Negotiate, supervise and collect. Role processes and probes are
    /// stopped before this returns on every path.
    async fn execute(&self, scheme: &Scheme, run_dir: &Path, log: &mut RunLogger) -> Result<(RoleAssignment, DateTime<Utc>)> {
        log.begin_stage("negotiate").await;
        let roles = self.interrupt.guard(self.negotiator.negotiate(scheme)).await?;
        crate::log_debug!(log.logger(), "{}: {} runs first, {} second", scheme.name, roles.first, roles.second);
        log.end_stage("negotiate").await;

        log.begin_stage("window").await;
        let handle = self
            .interrupt
            .guard(self.supervisor.start(scheme, roles, run_dir))
            .await?;
        let started_at = handle.window.started_at;
        log.process_started(handle.first()).await;
        log.process_started(handle.second()).await;

        let session = match self.telemetry.start(run_dir).await {
            Ok(session) => session,
            Err(e) => {
                // the window result is irrelevant once telemetry failed
                let _ = self.supervisor.await_completion(handle).await;
                return Err(e);
            }
        };
        for skipped in session.skipped() {
            log.logger()
                .warn(&format!("{}: probe not started: {}", scheme.name, skipped))
                .error_info(skipped)
                .log()
                .await;
        }

        let outcome = self.supervisor.await_completion(handle).await;
        let stopped = session.stop().await;
        log.end_stage("window").await;

        let outcome = outcome?;
        log.outcome(&outcome).await;
        outcome.into_result(&scheme.name)?;
        stopped?;

        Ok((roles, started_at))
    }

    fn write_artifacts(&self, scheme: &str, run_dir: &Path, record: &MetricsRecord, series: &TimeSeries) -> Result<(PathBuf, PathBuf)> {
        let metrics_path = run_dir.join(MetricsRecord::file_name(scheme));
        std::fs::write(&metrics_path, record.to_report())
            .with_context(|| format!("Failed to write {}", metrics_path.display()))?;

        let csv_path = run_dir.join(TimeSeries::file_name(scheme));
        series.write_csv(&csv_path)?;
        Ok((metrics_path, csv_path))
    }
}

#[async_trait]
impl RunExecutor for RunPipeline {
    async fn run_scheme(&self, scheme: &Scheme) -> Result<RunReport> {
        let run_dir = self.config.run_dir(&scheme.name);
        std::fs::create_dir_all(&run_dir)
            .with_context(|| format!("Failed to create {}", run_dir.display()))?;

        let mut log = self.loggers.create_run_logger(&scheme.name).await;

        let (roles, started_at) = match self.execute(scheme, &run_dir, &mut log).await {
            Ok(done) => done,
            Err(e) => {
                let errors = self.loggers.create_error_logger();
                errors
                    .log_error(&e, Some(&format!("Testing {}", scheme.name)), Some(log.correlation_id()))
                    .await;
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

        log.begin_stage("parse").await;
        let metrics = self.parser.parse_run_dir(&scheme.name, &run_dir)?;
        log.metrics(&metrics).await;
        let series = self.reconstructor.reconstruct_run_dir(&scheme.name, &run_dir)?;
        let (metrics_path, csv_path) = self.write_artifacts(&scheme.name, &run_dir, &metrics, &series)?;
        log.end_stage("parse").await;

        let elapsed = log.finish(true).await;

        Ok(RunReport {
            scheme: scheme.name.clone(),
            roles: Some(roles),
            started_at,
            elapsed,
            metrics,
            run_dir,
            metrics_path,
            csv_path,
            series_rows: series.len(),
            synthetic_rows: series.synthetic_rows(),
        })
    }

    fn describe(&self) -> String {
        format!(
            "{}s window, {}s settle, results in {}",
            self.config.duration_secs,
            self.config.settle_secs,
            self.config.results_dir.display()
        )
    }
}

/// Outcome helper used by callers that only need the classification
pub fn outcome_of(result: &Result<RunReport>) -> Option<Outcome> {
    match result {
        Ok(_) => Some(Outcome::TimedOutAsExpected),
        Err(AppError::EarlyExit { .. }) => Some(Outcome::EarlyExit),
        Err(AppError::ProcessFailure { order, role, code, .. }) => Some(Outcome::ProcessFailure {
            order: *order,
            role: *role,
            code: *code,
        }),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, RunOrder};
    use std::sync::Mutex;

    /// Fails every scheme whose name starts with "bad"
    struct ScriptedExecutor {
        calls: Mutex<Vec<String>>,
    }

    fn report(scheme: &str) -> RunReport {
        RunReport {
            scheme: scheme.to_string(),
            roles: Some(RoleAssignment::from_first(Role::Receiver)),
            started_at: Utc::now(),
            elapsed: Duration::from_secs(1),
            metrics: MetricsRecord::unavailable(scheme),
            run_dir: PathBuf::from("results").join(scheme),
            metrics_path: PathBuf::from(MetricsRecord::file_name(scheme)),
            csv_path: PathBuf::from(TimeSeries::file_name(scheme)),
            series_rows: 1,
            synthetic_rows: 0,
        }
    }

    #[async_trait]
    impl RunExecutor for ScriptedExecutor {
        async fn run_scheme(&self, scheme: &Scheme) -> Result<RunReport> {
            self.calls.lock().unwrap().push(scheme.name.clone());
            if scheme.name.starts_with("bad") {
                Err(AppError::early_exit(&scheme.name))
            } else {
                Ok(report(&scheme.name))
            }
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    #[tokio::test]
    async fn test_run_batch_keeps_going() {
        let executor = ScriptedExecutor {
            calls: Mutex::new(Vec::new()),
        };
        let schemes = vec![
            Scheme::new("bad_one", "/bin/false"),
            Scheme::new("cubic", "/bin/true"),
            Scheme::new("bad_two", "/bin/false"),
        ];

        let mut seen = Vec::new();
        let entries = run_batch(&executor, &schemes, |event| match event {
            BatchEvent::Starting { index, total, .. } => seen.push((index, total, None)),
            BatchEvent::Finished { index, total, entry } => {
                seen.push((index, total, Some(entry.result.is_ok())))
            }
        })
        .await;

        assert_eq!(*executor.calls.lock().unwrap(), vec!["bad_one", "cubic", "bad_two"]);
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries.iter().map(|e| e.result.is_ok()).collect::<Vec<_>>(),
            vec![false, true, false]
        );
        assert_eq!(
            seen,
            vec![
                (1, 3, None),
                (1, 3, Some(false)),
                (2, 3, None),
                (2, 3, Some(true)),
                (3, 3, None),
                (3, 3, Some(false)),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_batch_stops_on_fatal_error() {
        struct Interrupted;

        #[async_trait]
        impl RunExecutor for Interrupted {
            async fn run_scheme(&self, scheme: &Scheme) -> Result<RunReport> {
                if scheme.name == "cubic" {
                    Err(AppError::interrupted(crate::process::StopSignal::Interrupt))
                } else {
                    Ok(report(&scheme.name))
                }
            }

            fn describe(&self) -> String {
                "interrupted".to_string()
            }
        }

        let schemes = vec![
            Scheme::new("vegas", "/bin/true"),
            Scheme::new("cubic", "/bin/true"),
            Scheme::new("fillp", "/bin/true"),
        ];
        let entries = run_batch(&Interrupted, &schemes, |_| {}).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].scheme, "cubic");
        assert!(stopped_early(&entries));
        assert!(!stopped_early(&entries[..1]));
    }

    #[tokio::test]
    async fn test_run_batch_empty() {
        let executor = ScriptedExecutor {
            calls: Mutex::new(Vec::new()),
        };
        let entries = run_batch(&executor, &[], |_| panic!("no events expected")).await;
        assert!(entries.is_empty());
    }

    #[test]
    fn test_outcome_of() {
        assert_eq!(outcome_of(&Ok(report("cubic"))), Some(Outcome::TimedOutAsExpected));
        assert_eq!(outcome_of(&Err(AppError::early_exit("cubic"))), Some(Outcome::EarlyExit));
        assert_eq!(
            outcome_of(&Err(AppError::process_failure("cubic", RunOrder::Second, Role::Sender, None))),
            Some(Outcome::ProcessFailure {
                order: RunOrder::Second,
                role: Role::Sender,
                code: None,
            })
        );
        assert_eq!(outcome_of(&Err(AppError::role_query("cubic", "no answer"))), None);
        assert_eq!(outcome_of(&Err(AppError::sandbox("mm-link exited with 1"))), None);
    }

    #[test]
    fn test_pipeline_sweep_targets() {
        let mut config = Config::default();
        config.wrappers_dir = PathBuf::from("/opt/wrappers");
        config
            .scheme_executables
            .insert("extra".to_string(), PathBuf::from("/opt/extra/extra.py"));
        config.cleanup_dirs = vec![PathBuf::from("/opt/wrappers"), PathBuf::from("/srv/tools")];
        let pipeline = RunPipeline::new(config).unwrap();

        let targets = pipeline.sweep_targets(Path::new("/nonexistent/run"));
        assert_eq!(
            targets.wrapper_dirs,
            vec![
                PathBuf::from("/opt/wrappers"),
                PathBuf::from("/opt/extra"),
                PathBuf::from("/srv/tools")
            ]
        );
        assert_eq!(targets.run_dir, Some(PathBuf::from("/nonexistent/run")));
    }
}
