//! Transport Bench - Main CLI Application
//!
//! Runs each selected transport scheme for one test window, either directly
//! or inside every configured network-emulation profile, and prints the
//! extracted RTT, loss and throughput metrics.

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use transport_bench::{
    cli::Cli,
    config::{load_config, validate_config, ValidationLevel},
    error::{AppError, ErrorReporter, Result},
    orchestrator::{run_batch, BatchEntry, BatchEvent, RunExecutor},
    output::{OutputFormatter, OutputFormatterFactory, SummaryRow},
    process::{Interrupt, SweepTargets},
    CleanupReaper, RunPipeline, SweepDriver, PKG_NAME, VERSION,
};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panic: {}", panic_info);
        process::exit(1);
    }));

    let cli = Cli::parse();

    if let Err(message) = cli.validate() {
        eprintln!("Error: {}", message);
        process::exit(2);
    }

    let reporter = ErrorReporter::new(cli.use_colors(), cli.verbose);

    match run_application(cli).await {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(e) => {
            reporter.report_error(&e);

            if let Some(source) = e.source() {
                eprintln!("Caused by: {}", source);
            }

            if !reporter.verbose {
                print_error_suggestions(&e);
            }

            process::exit(e.exit_code());
        }
    }
}

/// Main application logic. Returns the process exit code: zero when every
/// run succeeded, otherwise the code of the first failed run, or 128 plus
/// the signal number when SIGINT or SIGTERM stopped the batch.
async fn run_application(cli: Cli) -> Result<i32> {
    if cli.debug {
        println!("{} v{} ({}, built {})", PKG_NAME, VERSION, env!("GIT_COMMIT"), env!("BUILD_TIME"));
        println!("Debug mode enabled");
        println!("{}", cli.get_config_summary());
    }

    if cli.is_cleanup_only() {
        return cleanup_dirs(&cli.cleanup_dirs);
    }

    let sweep = cli.sweep;
    let config = load_config(cli)?;
    let formatter = OutputFormatterFactory::create_formatter(config.enable_color, config.verbose);
    let reporter = ErrorReporter::new(config.enable_color, config.verbose);

    for warning in validate_config(&config)? {
        if warning.level != ValidationLevel::Info || config.verbose {
            eprintln!("{}", warning.format(config.enable_color));
        }
    }

    if config.debug {
        println!("Configuration loaded successfully:");
        println!("{}", transport_bench::config::display_config_summary(&config));
        println!();
    }

    let schemes = config.all_schemes();
    let interrupt = Interrupt::install()?;
    let mut rows = Vec::new();
    let mut exit_code = 0;

    let runs = if sweep {
        let driver = SweepDriver::from_current_exe(config.clone())?.with_interrupt(interrupt.clone());
        driver
            .run(&schemes, |profile, event| report_event(formatter.as_ref(), Some(profile), event))
            .await?
            .into_iter()
            .map(|run| (Some(run.profile), run.entries))
            .collect::<Vec<(Option<String>, Vec<BatchEntry>)>>()
    } else {
        let pipeline = RunPipeline::new(config.clone())?.with_interrupt(interrupt.clone());
        if config.verbose {
            println!("Starting {} run(s): {}", schemes.len(), pipeline.describe());
        }

        let entries = run_batch(&pipeline, &schemes, |event| {
            report_event(formatter.as_ref(), None, event)
        })
        .await;
        vec![(None, entries)]
    };

    let mut failures: Vec<&AppError> = Vec::new();
    for (profile, entries) in &runs {
        for entry in entries {
            if let Err(ref e) = entry.result {
                exit_code = first_failure(exit_code, e);
                failures.push(e);
            }
            rows.push(SummaryRow::from_entry(entry, profile.as_deref()));
        }
    }

    if rows.len() > 1 || config.verbose {
        println!();
        println!("{}", formatter.format_header("Run Summary")?);
        println!("{}", formatter.format_summary(&rows)?);
    }

    if failures.len() > 1 {
        eprintln!();
        eprintln!("{}", reporter.format_error_summary(&failures));
    }

    if let Some(signal) = interrupt.received() {
        let notice = format!("Stopped by {}; the interrupted run was cleaned up", signal);
        eprintln!("{}", formatter.format_warning(&notice).unwrap_or_else(|_| notice.clone()));
        exit_code = signal.exit_code();
    }

    Ok(exit_code)
}

fn first_failure(current: i32, error: &AppError) -> i32 {
    if current == 0 {
        error.exit_code()
    } else {
        current
    }
}

/// Print progress and per-run results as the batch advances
fn report_event(formatter: &dyn OutputFormatter, profile: Option<&str>, event: BatchEvent<'_>) {
    match event {
        BatchEvent::Starting { index, total, scheme } => {
            let text = formatter.format_run_start(&scheme.name, profile, index, total);
            println!("{}", text.unwrap_or_else(|e| e.to_string()));
        }
        BatchEvent::Finished { entry, .. } => match entry.result {
            Ok(ref report) => {
                let text = formatter.format_run_report(report);
                println!("{}", text.unwrap_or_else(|e| e.to_string()));
            }
            Err(ref error) => {
                let text = formatter.format_error(&format!("{} failed: {}", entry.scheme, error));
                eprintln!("{}", text.unwrap_or_else(|e| e.to_string()));
            }
        },
    }
}

/// Standalone leftover-process sweep over the given directories
fn cleanup_dirs(dirs: &[PathBuf]) -> Result<i32> {
    let reaper = CleanupReaper::new();
    for dir in dirs {
        let canonical = dir.canonicalize().map_err(|e| {
            AppError::validation(format!("Cannot sweep {}: {}", dir.display(), e))
        })?;
        let killed = reaper.sweep(&SweepTargets::new(vec![canonical.clone()], Some(canonical)))?;
        println!("Killed {} leftover process(es) under {}", killed, dir.display());
    }
    Ok(0)
}

/// Print helpful suggestions for common errors
fn print_error_suggestions(error: &AppError) {
    match error {
        AppError::Config(_) => {
            eprintln!();
            eprintln!("Configuration help:");
            eprintln!("  - Check your .env file and BENCH_* variables");
            eprintln!("  - Validate the JSON passed with --config");
            eprintln!("  - The settle delay must be shorter than the test duration");
        }
        AppError::RoleQuery { .. } => {
            eprintln!();
            eprintln!("Role negotiation help:");
            eprintln!("  - '<wrapper> run_first' must print 'sender' or 'receiver'");
            eprintln!("  - Make sure the wrapper is executable");
        }
        AppError::ProcessFailure { .. } | AppError::EarlyExit { .. } => {
            eprintln!();
            eprintln!("Run troubleshooting:");
            eprintln!("  - Run the wrapper by hand with the same role arguments");
            eprintln!("  - Increase --settle if the second role connects too early");
        }
        AppError::Sandbox(_) => {
            eprintln!();
            eprintln!("Sandbox troubleshooting:");
            eprintln!("  - Check that mm-delay and mm-link are installed and on PATH");
            eprintln!("  - Verify the uplink and downlink trace files of the profile");
        }
        AppError::Io(_) => {
            eprintln!();
            eprintln!("Check that the results directory is writable");
        }
        _ => {}
    }
}
