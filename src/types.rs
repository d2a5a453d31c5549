//! Type definitions shared across the pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export commonly used types
pub use crate::error::{AppError, Result};

/// Semantic role a scheme endpoint plays during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    /// The role the other endpoint must play
    pub fn complement(self) -> Self {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }

    /// Token passed to the scheme executable on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Sender => "sender",
            Role::Receiver => "receiver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "sender" => Ok(Role::Sender),
            "receiver" => Ok(Role::Receiver),
            other => Err(AppError::parse(format!("unrecognized role token '{}'", other))),
        }
    }
}

/// Start order of the two cooperating endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOrder {
    First,
    Second,
}

impl fmt::Display for RunOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOrder::First => f.write_str("first"),
            RunOrder::Second => f.write_str("second"),
        }
    }
}

/// Negotiated mapping of start order to semantic role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub first: Role,
    pub second: Role,
}

impl RoleAssignment {
    /// Build the assignment from the role the scheme wants to run first
    pub fn from_first(first: Role) -> Self {
        Self {
            first,
            second: first.complement(),
        }
    }

    pub fn role_for(&self, order: RunOrder) -> Role {
        match order {
            RunOrder::First => self.first,
            RunOrder::Second => self.second,
        }
    }
}

/// How a supervised run window ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// The deadline fired while the roles were still running; the normal,
    /// successful end of a sustained test.
    TimedOutAsExpected,
    /// Both roles exited cleanly before the deadline.
    EarlyExit,
    /// A role exited with a non-zero status (or was killed by a signal).
    ProcessFailure {
        order: RunOrder,
        role: Role,
        code: Option<i32>,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::TimedOutAsExpected)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::TimedOutAsExpected => "timed-out-as-expected",
            Outcome::EarlyExit => "early-exit",
            Outcome::ProcessFailure { .. } => "process-failure",
        }
    }

    /// Turn a failed outcome into the fatal error reported for `scheme`
    pub fn into_result(self, scheme: &str) -> Result<()> {
        match self {
            Outcome::TimedOutAsExpected => Ok(()),
            Outcome::EarlyExit => Err(AppError::early_exit(scheme)),
            Outcome::ProcessFailure { order, role, code } => {
                Err(AppError::process_failure(scheme, order, role, code))
            }
        }
    }
}

/// Lifecycle of a spawned process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Running,
    Terminating,
    Reaped,
}

/// Kind of telemetry probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// ping-style RTT/loss probe
    Rtt,
    /// iperf-style throughput probe
    Throughput,
}

impl ProbeKind {
    pub fn log_file_name(&self) -> &'static str {
        match self {
            ProbeKind::Rtt => "ping.log",
            ProbeKind::Throughput => "iperf.log",
        }
    }
}
