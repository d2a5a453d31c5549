//! Best-effort sweep of processes a run may have left behind
//!
//! Emulators and throughput probes are frequently spawned by the scheme
//! wrappers themselves and never show up in a handle we own. The reaper walks
//! the process table and signals anything that matches a known tool name, a
//! wrapper invocation, or that is running inside the run directory.

use crate::types::Result;
use std::path::{Path, PathBuf};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};

/// Command-line fragments of sandbox and probe tools
pub const KNOWN_PATTERNS: &[&str] = &[
    "mm-delay",
    "mm-link",
    "mm-loss",
    "mm-tunnelclient",
    "mm-tunnelserver",
    "iperf",
];

/// Wrapper sub-commands that identify scheme processes
pub const WRAPPER_COMMANDS: &[&str] = &["run_first", "run_second", "run_sender", "run_receiver"];

/// Matching rules for one sweep
#[derive(Debug, Clone, Default)]
pub struct SweepTargets {
    /// Directories holding scheme wrappers; role invocations under them are swept
    pub wrapper_dirs: Vec<PathBuf>,
    /// Any process whose working directory lies under this path is swept
    pub run_dir: Option<PathBuf>,
}

impl SweepTargets {
    pub fn new(wrapper_dirs: Vec<PathBuf>, run_dir: Option<PathBuf>) -> Self {
        Self {
            wrapper_dirs,
            run_dir,
        }
    }

    /// Whether a process with this command line and working directory is swept
    pub fn matches(&self, cmdline: &str, cwd: Option<&Path>) -> bool {
        if KNOWN_PATTERNS.iter().any(|p| cmdline.contains(p)) {
            return true;
        }

        let is_role_invocation = cmdline
            .split_whitespace()
            .any(|arg| WRAPPER_COMMANDS.contains(&arg) || is_role_token(arg));
        if is_role_invocation
            && self.wrapper_dirs.iter().any(|dir| {
                let dir = dir.to_string_lossy();
                !dir.is_empty() && cmdline.contains(dir.as_ref())
            })
        {
            return true;
        }

        match (&self.run_dir, cwd) {
            (Some(run_dir), Some(cwd)) => cwd.starts_with(run_dir),
            _ => false,
        }
    }
}

fn is_role_token(arg: &str) -> bool {
    arg == "sender" || arg == "receiver"
}

/// Process-table sweeper
#[derive(Debug, Default)]
pub struct CleanupReaper;

impl CleanupReaper {
    pub fn new() -> Self {
        Self
    }

    /// SIGKILL every matching process except this one and its ancestors.
    /// Returns the number of processes killed. Failures to signal an
    /// individual process are ignored.
    pub fn sweep(&self, targets: &SweepTargets) -> Result<usize> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cmd(UpdateKind::Always)
                .with_cwd(UpdateKind::Always),
        );

        let protected = protected_pids(&system);
        let mut killed = 0;

        for (pid, process) in system.processes() {
            if protected.contains(pid) {
                continue;
            }

            let cmdline = process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ");
            if cmdline.is_empty() {
                continue;
            }

            if targets.matches(&cmdline, process.cwd())
                && process.kill_with(Signal::Kill).unwrap_or(false)
            {
                killed += 1;
            }
        }

        Ok(killed)
    }
}

/// This process and every ancestor. A sandboxed run is itself a descendant of
/// an emulator shell and must not take it down.
fn protected_pids(system: &System) -> Vec<Pid> {
    let mut protected = Vec::new();
    let mut current = sysinfo::get_current_pid().ok();
    while let Some(pid) = current {
        if protected.contains(&pid) {
            break;
        }
        protected.push(pid);
        current = system.process(pid).and_then(|p| p.parent());
    }
    protected
}
