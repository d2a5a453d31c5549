//! Error handling for the transport benchmark harness

use crate::process::StopSignal;
use crate::types::{Role, RunOrder};
use thiserror::Error;

/// Custom error types for the benchmark harness
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// The scheme executable did not answer the `run_first` query usefully
    #[error("Role query failed for {scheme}: {reason}")]
    RoleQuery { scheme: String, reason: String },

    /// A role process exited with a non-zero status
    #[error("{scheme} failed in tests: {order} role ({role}) exited with {}", describe_code(.code))]
    ProcessFailure {
        scheme: String,
        order: RunOrder,
        role: Role,
        code: Option<i32>,
    },

    /// Both roles exited before the test window closed
    #[error("{scheme}: test exited before time limit")]
    EarlyExit { scheme: String },

    /// A process could not be started
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// The network-emulation wrapper failed
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Parsing errors (tokens, numbers, JSON)
    #[error("Parsing error: {0}")]
    Parse(String),

    /// SIGINT or SIGTERM arrived; the run was stopped and cleaned up
    #[error("Interrupted by {signal}")]
    Interrupted { signal: StopSignal },

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

impl AppError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// Create a new role query error
    pub fn role_query<S: Into<String>, R: Into<String>>(scheme: S, reason: R) -> Self {
        Self::RoleQuery {
            scheme: scheme.into(),
            reason: reason.into(),
        }
    }

    /// Create a new process failure error
    pub fn process_failure<S: Into<String>>(
        scheme: S,
        order: RunOrder,
        role: Role,
        code: Option<i32>,
    ) -> Self {
        Self::ProcessFailure {
            scheme: scheme.into(),
            order,
            role,
            code,
        }
    }

    /// Create a new early exit error
    pub fn early_exit<S: Into<String>>(scheme: S) -> Self {
        Self::EarlyExit {
            scheme: scheme.into(),
        }
    }

    /// Create a new spawn error
    pub fn spawn<S: Into<String>>(message: S) -> Self {
        Self::Spawn(message.into())
    }

    /// Create a new sandbox error
    pub fn sandbox<S: Into<String>>(message: S) -> Self {
        Self::Sandbox(message.into())
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io(message.into())
    }

    /// Create a new parsing error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse(message.into())
    }

    /// Create a new interruption error
    pub fn interrupted(signal: StopSignal) -> Self {
        Self::Interrupted { signal }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Get error category for logging and reporting
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG",
            Self::Validation(_) => "VALIDATION",
            Self::RoleQuery { .. } => "ROLE_QUERY",
            Self::ProcessFailure { .. } => "PROCESS_FAILURE",
            Self::EarlyExit { .. } => "EARLY_EXIT",
            Self::Spawn(_) => "SPAWN",
            Self::Sandbox(_) => "SANDBOX",
            Self::Io(_) => "IO",
            Self::Parse(_) => "PARSE",
            Self::Interrupted { .. } => "INTERRUPTED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Scheme the error is attributed to, if any
    pub fn scheme(&self) -> Option<&str> {
        match self {
            Self::RoleQuery { scheme, .. }
            | Self::ProcessFailure { scheme, .. }
            | Self::EarlyExit { scheme } => Some(scheme),
            _ => None,
        }
    }

    /// Whether the error stops the whole invocation instead of a single run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Validation(_) | Self::Interrupted { .. } | Self::Internal(_)
        )
    }

    /// Get user-friendly error message with suggestions
    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::Config(msg) => {
                format!("Configuration problem: {}\n\nSuggestion: Check your config file, .env file or command line arguments.", msg)
            }
            Self::Validation(msg) => {
                format!("Invalid input: {}\n\nSuggestion: Check durations, paths and scheme names.", msg)
            }
            Self::RoleQuery { scheme, reason } => {
                format!("Scheme '{}' did not report a starting role: {}\n\nSuggestion: Run '<wrapper> run_first' by hand; it must print 'sender' or 'receiver'.", scheme, reason)
            }
            Self::ProcessFailure { scheme, order, role, .. } => {
                format!("{}\n\nSuggestion: Run the {} role of '{}' ({}) by hand and inspect its output.", self, order, scheme, role)
            }
            Self::EarlyExit { scheme } => {
                format!("Both roles of '{}' exited before the test window closed.\n\nSuggestion: The scheme must keep transferring for the whole window; check its run duration.", scheme)
            }
            Self::Spawn(msg) => {
                format!("Could not start a process: {}\n\nSuggestion: Check that the executable exists and is executable.", msg)
            }
            Self::Sandbox(msg) => {
                format!("Network emulation failed: {}\n\nSuggestion: Check that mm-delay/mm-link are installed and the trace files exist.", msg)
            }
            Self::Io(msg) => {
                format!("File operation failed: {}\n\nSuggestion: Check file permissions and disk space.", msg)
            }
            Self::Parse(msg) => {
                format!("Failed to parse data: {}\n\nSuggestion: Check the format of your input data or configuration files.", msg)
            }
            Self::Interrupted { signal } => {
                format!("Stopped by {}. Role processes and probes of the current run were shut down.\n\nSuggestion: Re-run the remaining schemes with --schemes.", signal)
            }
            Self::Internal(msg) => {
                format!("Internal error: {}\n\nThis is likely a bug. Please report this issue with the error details.", msg)
            }
        }
    }

    /// Get exit code for this error type
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Validation(_) | Self::Parse(_) => 1,
            Self::ProcessFailure { .. } | Self::EarlyExit { .. } => 2,
            Self::RoleQuery { .. } | Self::Spawn(_) => 3,
            Self::Sandbox(_) => 4,
            Self::Io(_) => 5,
            Self::Interrupted { signal } => signal.exit_code(),
            Self::Internal(_) => 99,
        }
    }

    /// Format error for console display with color coding
    pub fn format_for_console(&self, use_color: bool) -> String {
        let category = self.category();
        let message = self.to_string();

        if use_color {
            use colored::Colorize;
            match self {
                Self::Config(_) | Self::Validation(_) | Self::Parse(_) => {
                    format!("[{}] {}", category.red().bold(), message.red())
                }
                Self::ProcessFailure { .. } | Self::EarlyExit { .. } => {
                    format!("[{}] {}", category.yellow().bold(), message.yellow())
                }
                Self::RoleQuery { .. } | Self::Spawn(_) | Self::Sandbox(_) => {
                    format!("[{}] {}", category.magenta().bold(), message.magenta())
                }
                Self::Io(_) | Self::Interrupted { .. } => {
                    format!("[{}] {}", category.cyan().bold(), message.cyan())
                }
                Self::Internal(_) => {
                    format!("[{}] {}", category.bright_red().bold(), message.bright_red())
                }
            }
        } else {
            format!("[{}] {}", category, message)
        }
    }
}

// Standard library error conversions
impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::io(error.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::parse(format!("JSON parse error: {}", error))
    }
}

impl From<dotenv::Error> for AppError {
    fn from(error: dotenv::Error) -> Self {
        Self::config(format!("Environment file error: {}", error))
    }
}

impl From<std::num::ParseIntError> for AppError {
    fn from(error: std::num::ParseIntError) -> Self {
        Self::parse(format!("Integer parse error: {}", error))
    }
}

impl From<std::num::ParseFloatError> for AppError {
    fn from(error: std::num::ParseFloatError) -> Self {
        Self::parse(format!("Float parse error: {}", error))
    }
}

impl From<std::str::ParseBoolError> for AppError {
    fn from(error: std::str::ParseBoolError) -> Self {
        Self::parse(format!("Boolean parse error: {}", error))
    }
}

/// Custom Result type for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Error context trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error
    fn context(self, message: &'static str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<AppError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let original_error = e.into();
            let context = f();
            match original_error {
                // I/O keeps its category so callers can still match on it
                AppError::Io(msg) => AppError::io(format!("{}: {}", context, msg)),
                other => AppError::internal(format!("{}: {}", context, other)),
            }
        })
    }

    fn context(self, message: &'static str) -> Result<T> {
        self.with_context(|| message.to_string())
    }
}

/// Error reporter for user feedback at the end of a run or sweep
pub struct ErrorReporter {
    pub use_color: bool,
    pub verbose: bool,
}

impl ErrorReporter {
    /// Create a new error reporter
    pub fn new(use_color: bool, verbose: bool) -> Self {
        Self { use_color, verbose }
    }

    /// Report an error to the user
    pub fn report_error(&self, error: &AppError) {
        eprintln!("{}", error.format_for_console(self.use_color));

        if self.verbose {
            eprintln!();
            eprintln!("{}", error.user_friendly_message());
        }
    }

    /// Get formatted error summary
    pub fn format_error_summary(&self, errors: &[&AppError]) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        let mut summary = format!("Found {} error(s):", errors.len());

        let mut error_groups: std::collections::BTreeMap<&'static str, Vec<&AppError>> =
            std::collections::BTreeMap::new();
        for &error in errors {
            error_groups.entry(error.category()).or_default().push(error);
        }

        for (category, group_errors) in error_groups {
            summary.push_str(&format!("\n  {}: {} error(s)", category, group_errors.len()));
            if self.verbose {
                for error in group_errors {
                    summary.push_str(&format!("\n    - {}", error));
                }
            }
        }

        summary
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}
