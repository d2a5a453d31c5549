//! Supervision of the two role processes over one test window

use crate::models::{Config, Scheme};
use crate::process::{Interrupt, ProcessHandle};
use crate::types::{AppError, Outcome, ProbeKind, Result, RoleAssignment, RunOrder};
use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;

/// Monotonic point in time after which a window is over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Timing of an armed test window
#[derive(Debug, Clone)]
pub struct RunWindow {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub deadline: Deadline,
}

/// Both role processes of a running window
#[derive(Debug)]
pub struct RunHandle {
    pub scheme: Scheme,
    pub roles: RoleAssignment,
    pub port: u16,
    pub window: RunWindow,
    first: ProcessHandle,
    second: ProcessHandle,
}

impl RunHandle {
    pub fn first(&self) -> &ProcessHandle {
        &self.first
    }

    pub fn second(&self) -> &ProcessHandle {
        &self.second
    }
}

/// Starts the roles and watches them until the deadline
#[derive(Debug, Clone)]
pub struct DeadlineSupervisor {
    duration: Duration,
    settle: Duration,
    kill_grace: Duration,
    host: String,
    interrupt: Interrupt,
}

impl DeadlineSupervisor {
    pub fn new(duration: Duration, settle: Duration, kill_grace: Duration, host: String) -> Self {
        Self {
            duration,
            settle,
            kill_grace,
            host,
            interrupt: Interrupt::never(),
        }
    }

    /// End the window early, as a failure, when `interrupt` fires
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.duration(),
            config.settle(),
            config.kill_grace(),
            config.host.clone(),
        )
    }

    fn role_command(&self, scheme: &Scheme, args: &[String], run_dir: &Path) -> Command {
        let mut command = Command::new(&scheme.executable);
        command
            .args(args)
            .current_dir(run_dir)
            .env(
                "IPERF_LOG_FILE",
                OsString::from(run_dir.join(ProbeKind::Throughput.log_file_name())),
            )
            .stdin(Stdio::null());
        command
    }

    /// Spawn the first role, let it settle, spawn the second and arm the
    /// deadline. Each role leads its own process group.
    pub async fn start(&self, scheme: &Scheme, roles: RoleAssignment, run_dir: &Path) -> Result<RunHandle> {
        let port = ephemeral_port()?;
        let run_dir = absolute(run_dir)?;

        let first_args = vec![roles.first.to_string(), port.to_string()];
        let mut first = ProcessHandle::spawn(
            format!("{} {} (first)", scheme.name, roles.first),
            self.role_command(scheme, &first_args, &run_dir),
            true,
        )?;

        tokio::time::sleep(self.settle).await;

        let second_args = vec![roles.second.to_string(), self.host.clone(), port.to_string()];
        let second = match ProcessHandle::spawn(
            format!("{} {} (second)", scheme.name, roles.second),
            self.role_command(scheme, &second_args, &run_dir),
            true,
        ) {
            Ok(handle) => handle,
            Err(e) => {
                first.shutdown(self.kill_grace).await?;
                return Err(e);
            }
        };

        Ok(RunHandle {
            scheme: scheme.clone(),
            roles,
            port,
            window: RunWindow {
                started_at: Utc::now(),
                duration: self.duration,
                deadline: Deadline::after(self.duration),
            },
            first,
            second,
        })
    }

    /// Wait for the window to end and classify how it ended. An interrupt
    /// ends the wait with an error. Both roles are terminated before this
    /// returns, whatever the outcome.
    pub async fn await_completion(&self, handle: RunHandle) -> Result<Outcome> {
        let RunHandle {
            roles,
            window,
            mut first,
            mut second,
            ..
        } = handle;

        let outcome = watch(&mut first, &mut second, roles, window.deadline, &self.interrupt).await;

        let (first_stop, second_stop) = futures::join!(
            first.shutdown(self.kill_grace),
            second.shutdown(self.kill_grace)
        );

        let outcome = outcome?;
        first_stop?;
        second_stop?;
        Ok(outcome)
    }
}

async fn watch(
    first: &mut ProcessHandle,
    second: &mut ProcessHandle,
    roles: RoleAssignment,
    deadline: Deadline,
    interrupt: &Interrupt,
) -> Result<Outcome> {
    let mut first_done = false;
    let mut second_done = false;

    loop {
        let (order, status) = tokio::select! {
            _ = tokio::time::sleep_until(deadline.instant()) => {
                return Ok(Outcome::TimedOutAsExpected);
            }
            signal = interrupt.wait() => return Err(AppError::interrupted(signal)),
            status = first.wait(), if !first_done => (RunOrder::First, status?),
            status = second.wait(), if !second_done => (RunOrder::Second, status?),
        };

        if !status.success() {
            return Ok(Outcome::ProcessFailure {
                order,
                role: roles.role_for(order),
                code: status.code(),
            });
        }

        match order {
            RunOrder::First => first_done = true,
            RunOrder::Second => second_done = true,
        }

        if first_done && second_done {
            return Ok(Outcome::EarlyExit);
        }
    }
}

/// Ask the OS for a free TCP port. The port is released before the roles
/// bind it, so another process may grab it in between.
fn ephemeral_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("0.0.0.0", 0))?;
    Ok(listener.local_addr()?.port())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| AppError::io(format!("Cannot resolve {}: {}", path.display(), e)))?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{group_members, StopSignal};
    use crate::types::{ProcessState, Role};
    use std::os::unix::fs::PermissionsExt;

    fn scheme(dir: &Path, body: &str) -> Scheme {
        let path = dir.join("fake.py");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Scheme::new("fake", path)
    }

    fn supervisor(duration_ms: u64) -> DeadlineSupervisor {
        DeadlineSupervisor::new(
            Duration::from_millis(duration_ms),
            Duration::from_millis(50),
            Duration::from_millis(200),
            "127.0.0.1".to_string(),
        )
    }

    #[test]
    fn test_deadline() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining() <= Duration::from_secs(60));

        let expired = Deadline::after(Duration::ZERO);
        assert!(expired.is_expired());
        assert_eq!(expired.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_ephemeral_port() {
        assert!(ephemeral_port().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_timed_out_as_expected() {
        let dir = tempfile::tempdir().unwrap();
        let scheme = scheme(dir.path(), "exec sleep 30");
        let sup = supervisor(300);

        let handle = sup
            .start(&scheme, RoleAssignment::from_first(Role::Receiver), dir.path())
            .await
            .unwrap();
        assert_eq!(handle.first().state(), ProcessState::Running);
        assert!(handle.port > 0);

        let outcome = sup.await_completion(handle).await.unwrap();
        assert_eq!(outcome, Outcome::TimedOutAsExpected);
    }

    #[tokio::test]
    async fn test_first_role_failure_is_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let scheme = scheme(dir.path(), r#"[ "$1" = receiver ] && exit 1; exec sleep 30"#);
        let sup = supervisor(10_000);

        let started = std::time::Instant::now();
        let handle = sup
            .start(&scheme, RoleAssignment::from_first(Role::Receiver), dir.path())
            .await
            .unwrap();
        let outcome = sup.await_completion(handle).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::ProcessFailure {
                order: RunOrder::First,
                role: Role::Receiver,
                code: Some(1),
            }
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_early_exit() {
        let dir = tempfile::tempdir().unwrap();
        let scheme = scheme(dir.path(), "exit 0");
        let sup = supervisor(10_000);

        let handle = sup
            .start(&scheme, RoleAssignment::from_first(Role::Sender), dir.path())
            .await
            .unwrap();
        assert_eq!(sup.await_completion(handle).await.unwrap(), Outcome::EarlyExit);
    }

    #[tokio::test]
    async fn test_roles_receive_arguments_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let scheme = scheme(
            dir.path(),
            r#"echo "$@" >> args.txt; echo "$IPERF_LOG_FILE" >> env.txt; exec sleep 30"#,
        );
        let sup = supervisor(300);

        let handle = sup
            .start(&scheme, RoleAssignment::from_first(Role::Receiver), dir.path())
            .await
            .unwrap();
        let port = handle.port;
        sup.await_completion(handle).await.unwrap();

        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        let lines: Vec<&str> = args.lines().collect();
        assert_eq!(lines[0], format!("receiver {}", port));
        assert_eq!(lines[1], format!("sender 127.0.0.1 {}", port));

        let env = std::fs::read_to_string(dir.path().join("env.txt")).unwrap();
        assert!(env.lines().all(|l| l.ends_with("iperf.log")));
    }

    /// Process groups of both roles, read before the handle is consumed
    fn role_groups(handle: &RunHandle) -> [i32; 2] {
        [handle.first().pgid().unwrap(), handle.second().pgid().unwrap()]
    }

    async fn assert_groups_gone(groups: [i32; 2]) {
        // SIGKILLed orphans may take a moment to leave the process table
        tokio::time::sleep(Duration::from_millis(100)).await;
        for pgid in groups {
            assert_eq!(group_members(pgid), 0, "group {} still has members", pgid);
        }
    }

    #[tokio::test]
    async fn test_stubborn_roles_are_gone_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let scheme = scheme(dir.path(), "trap '' TERM; sleep 300 & wait");
        let sup = supervisor(300);

        let handle = sup
            .start(&scheme, RoleAssignment::from_first(Role::Receiver), dir.path())
            .await
            .unwrap();
        let groups = role_groups(&handle);

        assert_eq!(sup.await_completion(handle).await.unwrap(), Outcome::TimedOutAsExpected);
        assert_groups_gone(groups).await;
    }

    #[tokio::test]
    async fn test_roles_are_gone_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        // the failing role leaves an orphan in its group
        let scheme = scheme(
            dir.path(),
            r#"[ "$1" = receiver ] && { sleep 300 & exit 1; }; trap '' TERM; sleep 300 & wait"#,
        );
        let sup = supervisor(10_000);

        let handle = sup
            .start(&scheme, RoleAssignment::from_first(Role::Receiver), dir.path())
            .await
            .unwrap();
        let groups = role_groups(&handle);

        let outcome = sup.await_completion(handle).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::ProcessFailure {
                order: RunOrder::First,
                role: Role::Receiver,
                code: Some(1),
            }
        );
        assert_groups_gone(groups).await;
    }

    #[tokio::test]
    async fn test_interrupt_ends_window_and_stops_roles() {
        let dir = tempfile::tempdir().unwrap();
        let scheme = scheme(dir.path(), "trap '' TERM; sleep 300 & wait");
        let (trigger, interrupt) = Interrupt::manual();
        let sup = supervisor(30_000).with_interrupt(interrupt);

        let handle = sup
            .start(&scheme, RoleAssignment::from_first(Role::Sender), dir.path())
            .await
            .unwrap();
        let groups = role_groups(&handle);

        let started = std::time::Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.fire(StopSignal::Interrupt);
        });
        let err = sup.await_completion(handle).await.unwrap_err();

        assert_eq!(err.category(), "INTERRUPTED");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_groups_gone(groups).await;
    }
}
