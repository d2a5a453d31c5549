//! Starts the probes for one run window and tears them down afterwards
//!
//! Each probe writes stdout and stderr to its own raw log in the run
//! directory and runs in its own process group. A probe that cannot be
//! started is recorded as skipped; its metrics then come out as sentinels.

use crate::models::{Config, ProbeCommand, ProbeConfig, RawLog};
use crate::process::ProcessHandle;
use crate::types::{AppError, ProbeKind, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Raw log of the throughput server
pub const THROUGHPUT_SERVER_LOG: &str = "iperf_server.log";

/// A fully rendered probe invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSpec {
    pub label: &'static str,
    pub program: String,
    pub args: Vec<String>,
    pub log_path: PathBuf,
}

impl ProbeSpec {
    fn spawn(&self) -> Result<ProcessHandle> {
        let log = File::create(&self.log_path).map_err(|e| {
            AppError::io(format!("Failed to create {}: {}", self.log_path.display(), e))
        })?;
        let err_log = log.try_clone()?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err_log));

        ProcessHandle::spawn(self.label, command, true)
    }
}

/// Renders and starts the configured probes
#[derive(Debug, Clone)]
pub struct TelemetryCollector {
    probes: ProbeConfig,
    host: String,
    duration: Duration,
    kill_grace: Duration,
}

impl TelemetryCollector {
    pub fn new(probes: ProbeConfig, host: String, duration: Duration, kill_grace: Duration) -> Self {
        Self {
            probes,
            host,
            duration,
            kill_grace,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.probes.clone(),
            config.host.clone(),
            config.duration(),
            config.kill_grace(),
        )
    }

    fn render(&self, label: &'static str, probe: &ProbeCommand, log_path: PathBuf) -> ProbeSpec {
        let vars = [
            ("host", self.host.clone()),
            ("duration", self.duration.as_secs().to_string()),
            ("interval", self.probes.ping_interval_secs.to_string()),
            ("count", self.probes.ping_count.to_string()),
        ];
        ProbeSpec {
            label,
            program: probe.program.clone(),
            args: probe.render(&vars),
            log_path,
        }
    }

    pub fn rtt_probe(&self, run_dir: &Path) -> ProbeSpec {
        let log = RawLog::new(ProbeKind::Rtt, run_dir);
        self.render("rtt probe", &self.probes.ping, log.path)
    }

    pub fn throughput_server(&self, run_dir: &Path) -> Option<ProbeSpec> {
        self.probes
            .throughput_server
            .as_ref()
            .map(|probe| self.render("throughput server", probe, run_dir.join(THROUGHPUT_SERVER_LOG)))
    }

    pub fn throughput_client(&self, run_dir: &Path) -> ProbeSpec {
        let log = RawLog::new(ProbeKind::Throughput, run_dir);
        self.render("throughput client", &self.probes.throughput_client, log.path)
    }

    /// Start every probe. Probes that fail to spawn are listed in
    /// [`TelemetrySession::skipped`].
    pub async fn start(&self, run_dir: &Path) -> Result<TelemetrySession> {
        let mut session = TelemetrySession {
            rtt: None,
            throughput_server: None,
            throughput_client: None,
            skipped: Vec::new(),
            kill_grace: self.kill_grace,
        };

        match self.rtt_probe(run_dir).spawn() {
            Ok(handle) => session.rtt = Some(handle),
            Err(e) => session.skipped.push(e),
        }

        if let Some(server) = self.throughput_server(run_dir) {
            match server.spawn() {
                Ok(handle) => {
                    session.throughput_server = Some(handle);
                    tokio::time::sleep(Duration::from_millis(self.probes.server_settle_ms)).await;
                }
                Err(e) => session.skipped.push(e),
            }
        }

        match self.throughput_client(run_dir).spawn() {
            Ok(handle) => session.throughput_client = Some(handle),
            Err(e) => session.skipped.push(e),
        }

        Ok(session)
    }
}

/// Running probes of one window
#[derive(Debug)]
pub struct TelemetrySession {
    rtt: Option<ProcessHandle>,
    throughput_server: Option<ProcessHandle>,
    throughput_client: Option<ProcessHandle>,
    skipped: Vec<AppError>,
    kill_grace: Duration,
}

impl TelemetrySession {
    /// Errors of probes that never started
    pub fn skipped(&self) -> &[AppError] {
        &self.skipped
    }

    /// Number of probes that are running or ran
    pub fn started(&self) -> usize {
        [&self.rtt, &self.throughput_server, &self.throughput_client]
            .iter()
            .filter(|h| h.is_some())
            .count()
    }

    /// Stop all probes. The RTT probe gets SIGINT, the only stop signal on
    /// which `ping` still prints its statistics; throughput probes are
    /// killed outright.
    pub async fn stop(mut self) -> Result<()> {
        let grace = self.kill_grace;
        let mut first_error = None;

        if let Some(rtt) = self.rtt.as_mut() {
            if let Err(e) = rtt.interrupt_shutdown(grace).await {
                first_error.get_or_insert(e);
            }
        }

        for handle in [self.throughput_client.as_mut(), self.throughput_server.as_mut()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = handle.kill().await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector(probes: ProbeConfig) -> TelemetryCollector {
        TelemetryCollector::new(
            probes,
            "10.0.0.2".to_string(),
            Duration::from_secs(60),
            Duration::from_millis(200),
        )
    }

    #[test]
    fn test_default_probe_rendering() {
        let dir = Path::new("/tmp/run");
        let c = collector(ProbeConfig::default());

        let ping = c.rtt_probe(dir);
        assert_eq!(ping.program, "ping");
        assert_eq!(ping.args, vec!["-D", "-i", "0.2", "-c", "300", "10.0.0.2"]);
        assert_eq!(ping.log_path, PathBuf::from("/tmp/run/ping.log"));

        let client = c.throughput_client(dir);
        assert_eq!(client.args, vec!["-c", "10.0.0.2", "-t", "60", "-i", "1"]);
        assert_eq!(client.log_path, PathBuf::from("/tmp/run/iperf.log"));

        let server = c.throughput_server(dir).unwrap();
        assert_eq!(server.args, vec!["-s"]);
        assert_eq!(server.log_path, PathBuf::from("/tmp/run/iperf_server.log"));
    }

    #[tokio::test]
    async fn test_session_writes_logs_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let probes = ProbeConfig {
            ping: ProbeCommand::new("sh", &["-c", "echo probing {host}; exec sleep 30"]),
            ping_interval_secs: 0.2,
            ping_count: 300,
            throughput_server: None,
            throughput_client: ProbeCommand::new("sh", &["-c", "echo rate for {duration}s; exec sleep 30"]),
            server_settle_ms: 0,
        };

        let session = collector(probes).start(dir.path()).await.unwrap();
        assert!(session.skipped().is_empty());
        assert_eq!(session.started(), 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        session.stop().await.unwrap();

        let ping = std::fs::read_to_string(dir.path().join("ping.log")).unwrap();
        assert!(ping.contains("probing 10.0.0.2"));
        let rate = std::fs::read_to_string(dir.path().join("iperf.log")).unwrap();
        assert!(rate.contains("rate for 60s"));
    }

    #[tokio::test]
    async fn test_missing_probe_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let probes = ProbeConfig {
            ping: ProbeCommand::new("/nonexistent/ping", &[]),
            throughput_server: Some(ProbeCommand::new("/nonexistent/server", &[])),
            throughput_client: ProbeCommand::new("/nonexistent/client", &[]),
            server_settle_ms: 0,
            ..ProbeConfig::default()
        };

        let session = collector(probes).start(dir.path()).await.unwrap();
        assert_eq!(session.skipped().len(), 3);
        assert_eq!(session.started(), 0);
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_rtt_summary_survives_stop() {
        let dir = tempfile::tempdir().unwrap();
        let summary = "echo '3 packets transmitted, 2 received, 33% packet loss, time 400ms'; \
                       echo 'rtt min/avg/max/mdev = 1.000/2.000/3.000/0.500 ms'; exit 0";
        let script = format!(
            "trap \"{}\" INT; trap 'exit 1' TERM; echo 'PING {{host}}'; while :; do sleep 0.05; done",
            summary
        );
        let tools = ProbeConfig {
            ping: ProbeCommand::new("sh", &["-c", &script]),
            throughput_server: None,
            throughput_client: ProbeCommand::new("sh", &["-c", "exec sleep 30"]),
            server_settle_ms: 0,
            ..ProbeConfig::default()
        };

        let session = collector(tools).start(dir.path()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        session.stop().await.unwrap();

        let ping = std::fs::read_to_string(dir.path().join("ping.log")).unwrap();
        assert!(ping.contains("PING 10.0.0.2"));
        assert!(ping.contains("33% packet loss"));
        assert!(ping.contains("rtt min/avg/max/mdev = 1.000/2.000/3.000/0.500 ms"));
    }
}
