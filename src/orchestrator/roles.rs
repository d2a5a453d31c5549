//! Role negotiation through the scheme's `run_first` query

use crate::models::Scheme;
use crate::process::ProcessHandle;
use crate::types::{AppError, Result, Role, RoleAssignment};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;

/// Upper bound on how much query output is read
const MAX_QUERY_OUTPUT: u64 = 4096;

/// Asks a scheme which role it wants to start first
#[derive(Debug, Clone)]
pub struct RoleNegotiator {
    timeout: Duration,
}

impl RoleNegotiator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `<exe> run_first` and map the first non-empty line of its output
    /// to a role assignment. The query must answer within the timeout; if it
    /// also exits within it, the exit status has to be zero. The query's
    /// process group is always killed and reaped before this returns.
    pub async fn negotiate(&self, scheme: &Scheme) -> Result<RoleAssignment> {
        let mut command = Command::new(&scheme.executable);
        command
            .arg("run_first")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut handle = ProcessHandle::spawn(format!("{} run_first", scheme.name), command, true)
            .map_err(|e| AppError::role_query(&scheme.name, e.to_string()))?;
        let stdout = handle
            .take_stdout()
            .ok_or_else(|| AppError::role_query(&scheme.name, "query stdout was not captured"))?;

        let started = Instant::now();
        let answer = tokio::time::timeout(self.timeout, first_line(stdout)).await;
        let line = match answer {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                handle.kill().await?;
                return Err(AppError::role_query(&scheme.name, e.to_string()));
            }
            Err(_) => {
                handle.kill().await?;
                return Err(AppError::role_query(
                    &scheme.name,
                    format!("no answer within {}s", self.timeout.as_secs_f64()),
                ));
            }
        };

        // the exit status counts only if the query finishes in time
        let remaining = self.timeout.saturating_sub(started.elapsed());
        let status = match tokio::time::timeout(remaining, handle.wait()).await {
            Ok(status) => Some(status?),
            Err(_) => None,
        };
        // stragglers the query may have forked
        handle.kill().await?;

        if let Some(status) = status.filter(|s| !s.success()) {
            return Err(AppError::role_query(
                &scheme.name,
                format!("run_first exited with {}", status),
            ));
        }

        let first = parse_answer(line.as_deref().unwrap_or(""))
            .map_err(|e| AppError::role_query(&scheme.name, e.to_string()))?;
        Ok(RoleAssignment::from_first(first))
    }
}

/// Read up to the first non-empty line. `None` when output ends first.
async fn first_line<R>(stdout: R) -> Result<Option<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout.take(MAX_QUERY_OUTPUT)).lines();
    while let Some(line) = lines.next_line().await? {
        if !line.trim().is_empty() {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

/// The first non-empty line of the answer names the role
fn parse_answer(output: &str) -> Result<Role> {
    let token = output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| AppError::parse("empty answer"))?;
    token.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn script(dir: &Path, name: &str, body: &str) -> Scheme {
        let path = dir.join(format!("{}.py", name));
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Scheme::new(name, path)
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("receiver\n").unwrap(), Role::Receiver);
        assert_eq!(parse_answer("\n  sender  \n").unwrap(), Role::Sender);
        assert!(parse_answer("").is_err());
        assert!(parse_answer("client\n").is_err());
    }

    #[tokio::test]
    async fn test_negotiate_receiver_first() {
        let dir = tempfile::tempdir().unwrap();
        let scheme = script(dir.path(), "cubic", r#"[ "$1" = run_first ] && echo receiver"#);

        let roles = RoleNegotiator::new(Duration::from_secs(5))
            .negotiate(&scheme)
            .await
            .unwrap();
        assert_eq!(roles.first, Role::Receiver);
        assert_eq!(roles.second, Role::Sender);
    }

    #[tokio::test]
    async fn test_unrecognized_token() {
        let dir = tempfile::tempdir().unwrap();
        let scheme = script(dir.path(), "odd", "echo server");

        let err = RoleNegotiator::new(Duration::from_secs(5))
            .negotiate(&scheme)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "ROLE_QUERY");
        assert_eq!(err.scheme(), Some("odd"));
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let scheme = script(dir.path(), "broken", "echo sender; exit 4");

        let err = RoleNegotiator::new(Duration::from_secs(5))
            .negotiate(&scheme)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "ROLE_QUERY");
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let scheme = script(dir.path(), "hung", "sleep 30");

        let started = std::time::Instant::now();
        let err = RoleNegotiator::new(Duration::from_millis(300))
            .negotiate(&scheme)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "ROLE_QUERY");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_answer_with_helper_holding_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let scheme = script(dir.path(), "helper", "echo receiver; sleep 30 & exit 0");

        let started = std::time::Instant::now();
        let roles = RoleNegotiator::new(Duration::from_secs(2))
            .negotiate(&scheme)
            .await
            .unwrap();
        assert_eq!(roles.first, Role::Receiver);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_query_group_is_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let scheme = script(
            dir.path(),
            "lingering",
            &format!("echo $$ > {}; echo sender; exec sleep 30", pid_file.display()),
        );

        let roles = RoleNegotiator::new(Duration::from_millis(500))
            .negotiate(&scheme)
            .await
            .unwrap();
        assert_eq!(roles.first, Role::Sender);

        let pgid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(crate::process::group_members(pgid), 0);
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let scheme = Scheme::new("ghost", "/nonexistent/ghost.py");
        let err = RoleNegotiator::new(Duration::from_secs(1))
            .negotiate(&scheme)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "ROLE_QUERY");
    }
}
