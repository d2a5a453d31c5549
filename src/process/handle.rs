//! Owned handle to a spawned child and its process group
//!
//! Every child the harness starts is wrapped in a [`ProcessHandle`]. A handle
//! created with `own_group` puts the child in a fresh session, so signals sent
//! through the handle reach the child and everything it spawned. Teardown is
//! idempotent: terminating or killing an already-stopped handle is a no-op and
//! a group that vanished underneath us (`ESRCH`) counts as success.

use crate::types::{AppError, ProcessState, Result};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{Child, ChildStdout, Command};

pub struct ProcessHandle {
    label: String,
    child: Child,
    pid: u32,
    pgid: Option<i32>,
    state: ProcessState,
    status: Option<ExitStatus>,
    killed: bool,
}

impl ProcessHandle {
    /// Spawn `command`. With `own_group` the child becomes the leader of a new
    /// session and process group.
    pub fn spawn<S: Into<String>>(label: S, mut command: Command, own_group: bool) -> Result<Self> {
        let label = label.into();

        if own_group {
            // SAFETY: setsid is async-signal-safe and touches no parent state.
            unsafe {
                command.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let child = command
            .spawn()
            .map_err(|e| AppError::spawn(format!("Failed to start {}: {}", label, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| AppError::spawn(format!("{} exited before its pid was read", label)))?;

        Ok(Self {
            label,
            child,
            pid,
            pgid: own_group.then_some(pid as i32),
            state: ProcessState::Running,
            status: None,
            killed: false,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Process group id, when the child leads its own group
    pub fn pgid(&self) -> Option<i32> {
        self.pgid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Exit status, once reaped
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Wait for the child to exit. Cancel-safe.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| AppError::io(format!("Failed to wait for {}: {}", self.label, e)))?;
        self.mark_reaped(status);
        Ok(status)
    }

    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        let status = self
            .child
            .try_wait()
            .map_err(|e| AppError::io(format!("Failed to poll {}: {}", self.label, e)))?;
        if let Some(status) = status {
            self.mark_reaped(status);
        }
        Ok(status)
    }

    /// Ask the group to stop with SIGTERM. Only acts on a running handle.
    pub fn terminate(&mut self) -> Result<()> {
        self.request_stop(libc::SIGTERM)
    }

    /// Ask the group to stop with SIGINT, the way a terminal Ctrl-C would.
    /// Only acts on a running handle.
    pub fn interrupt(&mut self) -> Result<()> {
        self.request_stop(libc::SIGINT)
    }

    fn request_stop(&mut self, signal: libc::c_int) -> Result<()> {
        if self.state != ProcessState::Running {
            return Ok(());
        }
        self.signal(signal)?;
        self.state = ProcessState::Terminating;
        Ok(())
    }

    /// SIGKILL the group. The group is still signalled after the leader has
    /// been reaped so that orphaned members go too, but only while it has
    /// live members; repeated calls are no-ops.
    ///
    /// Once the leader is reaped its pid is free again. The kernel does not
    /// hand out a pid that is still some group's id, so a group with members
    /// cannot have been recycled. The remaining window is between the member
    /// scan and `killpg`, where the last member may exit and the id be reused.
    pub fn hard_kill(&mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }
        if self.state == ProcessState::Reaped {
            let orphans = self.pgid.map(group_members).unwrap_or(0);
            if orphans == 0 {
                self.killed = true;
                return Ok(());
            }
        }
        self.signal(libc::SIGKILL)?;
        self.killed = true;
        if self.state == ProcessState::Running {
            self.state = ProcessState::Terminating;
        }
        Ok(())
    }

    /// SIGKILL the group and reap the leader
    pub async fn kill(&mut self) -> Result<Option<ExitStatus>> {
        self.hard_kill()?;
        if self.state != ProcessState::Reaped {
            self.wait().await?;
        }
        Ok(self.status)
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL and reap
    pub async fn shutdown(&mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        self.terminate()?;
        self.finish_within(grace).await
    }

    /// Same as [`shutdown`](Self::shutdown) but opens with SIGINT
    pub async fn interrupt_shutdown(&mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        self.interrupt()?;
        self.finish_within(grace).await
    }

    async fn finish_within(&mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        if self.state != ProcessState::Reaped {
            // the grace period elapsing is not an error
            if let Ok(result) = tokio::time::timeout(grace, self.wait()).await {
                result?;
            }
        }
        self.kill().await
    }

    fn mark_reaped(&mut self, status: ExitStatus) {
        self.status = Some(status);
        self.state = ProcessState::Reaped;
    }

    fn signal(&self, signal: libc::c_int) -> Result<()> {
        // SAFETY: plain syscalls on ids we own; errors are read from errno.
        let ret = unsafe {
            match self.pgid {
                Some(pgid) => libc::killpg(pgid, signal),
                None => libc::kill(self.pid as libc::pid_t, signal),
            }
        };
        if ret == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(AppError::io(format!(
            "Failed to send signal {} to {} (pid {}): {}",
            signal, self.label, self.pid, err
        )))
    }
}

/// Live (non-zombie) members of process group `pgid`, read from `/proc`.
/// Returns 0 where `/proc` is unavailable.
pub fn group_members(pgid: i32) -> usize {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };
    let pgid = pgid.to_string();
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|e| std::fs::read_to_string(e.path().join("stat")).ok())
        .filter(|stat| {
            // the command name may contain spaces and parentheses
            let Some((_, rest)) = stat.rsplit_once(')') else {
                return false;
            };
            let fields: Vec<&str> = rest.split_whitespace().collect();
            fields.len() > 2 && fields[0] != "Z" && fields[2] == pgid
        })
        .count()
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("label", &self.label)
            .field("pid", &self.pid)
            .field("pgid", &self.pgid)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.state == ProcessState::Reaped {
            return;
        }
        if let Some(pgid) = self.pgid {
            // SAFETY: see `signal`
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
        let _ = self.child.start_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
        cmd
    }

    #[tokio::test]
    async fn test_wait_reaps() {
        let mut handle = ProcessHandle::spawn("true", sh("exit 3"), true).unwrap();
        assert_eq!(handle.pgid(), Some(handle.pid() as i32));
        let status = handle.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(handle.state(), ProcessState::Reaped);
        // second wait returns the cached status
        assert_eq!(handle.wait().await.unwrap().code(), Some(3));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut handle = ProcessHandle::spawn("sleeper", sh("sleep 30"), true).unwrap();
        handle.shutdown(Duration::from_millis(500)).await.unwrap();
        assert_eq!(handle.state(), ProcessState::Reaped);

        handle.terminate().unwrap();
        handle.hard_kill().unwrap();
        handle.shutdown(Duration::from_millis(10)).await.unwrap();
        assert_eq!(handle.state(), ProcessState::Reaped);
    }

    #[tokio::test]
    async fn test_shutdown_escalates_when_term_is_ignored() {
        let mut handle =
            ProcessHandle::spawn("stubborn", sh("trap '' TERM; while :; do sleep 1; done"), true)
                .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = handle
            .shutdown(Duration::from_millis(200))
            .await
            .unwrap()
            .unwrap();
        assert!(status.code().is_none());
        assert_eq!(handle.state(), ProcessState::Reaped);
    }

    #[tokio::test]
    async fn test_kill_reaches_grandchildren() {
        let mut handle =
            ProcessHandle::spawn("parent", sh("sleep 30 & sleep 30 & wait"), true).unwrap();
        let pgid = handle.pgid().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        handle.kill().await.unwrap();
        // give the kernel a moment to tear down the orphaned sleeps
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(group_members(pgid), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let cmd = Command::new("/nonexistent/binary/for/tests");
        let err = ProcessHandle::spawn("missing", cmd, true).unwrap_err();
        assert_eq!(err.category(), "SPAWN");
    }

    #[tokio::test]
    async fn test_drop_kills_running_group() {
        let handle = ProcessHandle::spawn("dropped", sh("sleep 30"), true).unwrap();
        let pgid = handle.pgid().unwrap();
        drop(handle);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(group_members(pgid), 0);
    }

    #[tokio::test]
    async fn test_hard_kill_after_reap_takes_orphans() {
        let mut handle =
            ProcessHandle::spawn("leaves orphans", sh("sleep 30 & exit 0"), true).unwrap();
        let pgid = handle.pgid().unwrap();
        handle.wait().await.unwrap();
        assert_eq!(handle.state(), ProcessState::Reaped);
        assert_eq!(group_members(pgid), 1);

        handle.hard_kill().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(group_members(pgid), 0);
    }

    #[tokio::test]
    async fn test_hard_kill_skips_empty_reaped_group() {
        let mut handle = ProcessHandle::spawn("done", sh("exit 0"), true).unwrap();
        let pgid = handle.pgid().unwrap();
        handle.wait().await.unwrap();
        assert_eq!(group_members(pgid), 0);

        handle.hard_kill().unwrap();
        handle.hard_kill().unwrap();
        assert_eq!(handle.state(), ProcessState::Reaped);
    }

    #[tokio::test]
    async fn test_interrupt_shutdown_lets_child_finish() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let script = format!(
            "trap 'echo interrupted > {}; exit 0' INT; trap '' TERM; while :; do sleep 0.05; done",
            out.display()
        );
        let mut handle = ProcessHandle::spawn("polite", sh(&script), true).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = handle
            .interrupt_shutdown(Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.code(), Some(0));
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "interrupted");

        // already stopped: no further signals
        handle.interrupt().unwrap();
        handle.interrupt_shutdown(Duration::from_millis(10)).await.unwrap();
    }
}
