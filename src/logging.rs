//! Structured logging for benchmark runs
//!
//! This module provides:
//! - Leveled, structured log entries with correlation IDs
//! - Console, JSON and compact renderings
//! - Stage timing and process lifecycle events for a run (`RunLogger`)
//! - Error event logging with error categories and exit codes

use crate::error::{AppError, Result};
use crate::models::{Config, MetricsRecord};
use crate::process::ProcessHandle;
use crate::types::Outcome;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }

    fn colored_label(&self) -> String {
        let label = format!("{:>5}", self.as_str());
        match self {
            LogLevel::Trace => label.white().to_string(),
            LogLevel::Debug => label.cyan().to_string(),
            LogLevel::Info => label.green().to_string(),
            LogLevel::Warn => label.yellow().to_string(),
            LogLevel::Error => label.red().to_string(),
            LogLevel::Fatal => label.magenta().bold().to_string(),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "FATAL" => Ok(LogLevel::Fatal),
            _ => Err(AppError::parse(format!("Invalid log level: {}", s))),
        }
    }
}

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console format
    Console,
    /// One JSON object per line
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "console" => Ok(LogFormat::Console),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(AppError::parse(format!(
                "Invalid log format '{}': expected console, json or compact",
                s
            ))),
        }
    }
}

/// Log entry structure for structured logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Logger name/component
    pub logger: String,
    /// Correlation ID for tracking related events
    pub correlation_id: Option<String>,
    pub fields: BTreeMap<String, serde_json::Value>,
    pub location: Option<LogLocation>,
}

/// Source code location information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLocation {
    pub file: String,
    pub line: u32,
    pub module: Option<String>,
}

/// Shared logging context for correlation and session tracking
#[derive(Debug, Default)]
struct LogContext {
    session_id: Option<String>,
    context_fields: BTreeMap<String, serde_json::Value>,
}

/// Logger implementation with multiple output formats
#[derive(Clone)]
pub struct Logger {
    min_level: LogLevel,
    use_color: bool,
    include_location: bool,
    format: LogFormat,
    name: String,
    context: Arc<RwLock<LogContext>>,
}

impl Logger {
    pub fn new(name: String) -> Self {
        Self {
            min_level: LogLevel::Info,
            use_color: true,
            include_location: false,
            format: LogFormat::Console,
            name,
            context: Arc::new(RwLock::new(LogContext::default())),
        }
    }

    /// Create a logger whose level and format follow the configuration
    pub fn with_config(name: String, config: &Config) -> Self {
        let min_level = if config.debug {
            LogLevel::Debug
        } else if config.verbose {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };

        Self {
            min_level,
            use_color: config.enable_color,
            include_location: config.debug,
            format: config.log_format.unwrap_or(LogFormat::Console),
            name,
            context: Arc::new(RwLock::new(LogContext::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    pub fn set_color(&mut self, use_color: bool) {
        self.use_color = use_color;
    }

    pub async fn set_session_id(&self, session_id: String) {
        let mut context = self.context.write().await;
        context.session_id = Some(session_id);
    }

    /// Add context field for all subsequent log entries
    pub async fn add_context_field<T: Serialize>(&self, key: String, value: T) {
        if let Ok(json_value) = serde_json::to_value(value) {
            let mut context = self.context.write().await;
            context.context_fields.insert(key, json_value);
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) -> LogEntryBuilder<'_> {
        LogEntryBuilder::new(self, level, message.to_string())
    }

    pub fn trace(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Trace, message)
    }

    pub fn debug(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Error, message)
    }

    pub fn fatal(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Fatal, message)
    }

    pub fn would_log(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    async fn write_entry(&self, mut entry: LogEntry) {
        if entry.level < self.min_level {
            return;
        }

        let context = self.context.read().await;
        if let Some(session_id) = &context.session_id {
            entry
                .fields
                .insert("session_id".to_string(), serde_json::Value::String(session_id.clone()));
        }
        for (key, value) in &context.context_fields {
            entry.fields.insert(key.clone(), value.clone());
        }
        drop(context);

        let output = self.render(&entry);

        // Warnings and errors go to stderr
        if entry.level >= LogLevel::Warn {
            let _ = writeln!(io::stderr(), "{}", output);
        } else {
            let _ = writeln!(io::stdout(), "{}", output);
        }
    }

    fn render(&self, entry: &LogEntry) -> String {
        match self.format {
            LogFormat::Console => self.format_console(entry),
            LogFormat::Json => self.format_json(entry),
            LogFormat::Compact => self.format_compact(entry),
        }
    }

    fn format_console(&self, entry: &LogEntry) -> String {
        let timestamp = entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
        let level = if self.use_color {
            entry.level.colored_label()
        } else {
            format!("{:>5}", entry.level.as_str())
        };

        let mut output = format!("{} {} [{}] {}", timestamp, level, entry.logger, entry.message);

        if let Some(correlation_id) = &entry.correlation_id {
            let short = correlation_id.get(..8).unwrap_or(correlation_id);
            output.push_str(&format!(" [{}]", short));
        }

        if !entry.fields.is_empty() {
            let fields: Vec<String> = entry
                .fields
                .iter()
                .filter(|(k, _)| k.as_str() != "session_id")
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            if !fields.is_empty() {
                output.push_str(&format!(" {{{}}}", fields.join(", ")));
            }
        }

        if self.include_location {
            if let Some(location) = &entry.location {
                output.push_str(&format!(" @ {}:{}", location.file, location.line));
            }
        }

        output
    }

    fn format_json(&self, entry: &LogEntry) -> String {
        serde_json::to_string(entry).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"Failed to serialize log entry\", \"message\": {:?}}}",
                entry.message
            )
        })
    }

    fn format_compact(&self, entry: &LogEntry) -> String {
        format!(
            "{} {} {}: {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.level.as_str().chars().next().unwrap_or('?'),
            entry.logger,
            entry.message
        )
    }
}

/// Builder pattern for creating log entries
pub struct LogEntryBuilder<'a> {
    logger: &'a Logger,
    entry: LogEntry,
}

impl<'a> LogEntryBuilder<'a> {
    fn new(logger: &'a Logger, level: LogLevel, message: String) -> Self {
        Self {
            logger,
            entry: LogEntry {
                timestamp: Utc::now(),
                level,
                message,
                logger: logger.name.clone(),
                correlation_id: None,
                fields: BTreeMap::new(),
                location: None,
            },
        }
    }

    pub fn correlation_id(mut self, id: &str) -> Self {
        self.entry.correlation_id = Some(id.to_string());
        self
    }

    /// Add a structured field
    pub fn field<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.entry.fields.insert(key.to_string(), json_value);
        }
        self
    }

    pub fn location(mut self, file: &str, line: u32, module: Option<&str>) -> Self {
        self.entry.location = Some(LogLocation {
            file: file.to_string(),
            line,
            module: module.map(String::from),
        });
        self
    }

    pub fn outcome(self, outcome: &Outcome) -> Self {
        self.field("outcome", outcome.label())
            .field("success", outcome.is_success())
    }

    pub fn metrics(self, record: &MetricsRecord) -> Self {
        self.field("scheme", &record.scheme)
            .field("rtt_ms", record.avg_rtt_ms)
            .field("loss_rate", record.loss_rate)
            .field("throughput_bps", record.throughput_bps)
    }

    pub fn process(self, handle: &ProcessHandle) -> Self {
        self.field("process", handle.label())
            .field("pid", handle.pid())
            .field("pgid", handle.pgid())
            .field("state", handle.state())
    }

    pub fn error_info(self, error: &AppError) -> Self {
        self.field("error_category", error.category())
            .field("error_exit_code", error.exit_code())
            .field("error_scheme", error.scheme())
    }

    pub async fn log(self) {
        self.logger.write_entry(self.entry).await;
    }

    #[cfg(test)]
    fn into_entry(self) -> LogEntry {
        self.entry
    }
}

/// Stage timing and lifecycle events for one run
pub struct RunLogger {
    logger: Logger,
    correlation_id: String,
    scheme: String,
    started: Instant,
    stages: Vec<(String, Instant)>,
}

impl RunLogger {
    pub fn new(logger: Logger, scheme: &str) -> Self {
        Self {
            logger,
            correlation_id: Uuid::new_v4().to_string(),
            scheme: scheme.to_string(),
            started: Instant::now(),
            stages: Vec::new(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub async fn begin_stage(&mut self, stage: &str) {
        self.stages.push((stage.to_string(), Instant::now()));
        self.logger
            .debug(&format!("{}: {} started", self.scheme, stage))
            .correlation_id(&self.correlation_id)
            .field("scheme", &self.scheme)
            .field("stage", stage)
            .log()
            .await;
    }

    /// Close the most recently opened stage with that name
    pub async fn end_stage(&mut self, stage: &str) -> Option<Duration> {
        let position = self.stages.iter().rposition(|(name, _)| name == stage);
        let Some(position) = position else {
            self.logger
                .warn(&format!("Attempted to end unknown stage: {}", stage))
                .field("stage", stage)
                .log()
                .await;
            return None;
        };

        let (_, started) = self.stages.remove(position);
        let elapsed = started.elapsed();
        self.logger
            .info(&format!("{}: {} done in {}ms", self.scheme, stage, elapsed.as_millis()))
            .correlation_id(&self.correlation_id)
            .field("scheme", &self.scheme)
            .field("stage", stage)
            .field("duration_ms", elapsed.as_secs_f64() * 1000.0)
            .log()
            .await;
        Some(elapsed)
    }

    pub async fn process_started(&self, handle: &ProcessHandle) {
        self.logger
            .debug(&format!("Started {}", handle.label()))
            .correlation_id(&self.correlation_id)
            .process(handle)
            .log()
            .await;
    }

    pub async fn outcome(&self, outcome: &Outcome) {
        let level = if outcome.is_success() { LogLevel::Info } else { LogLevel::Warn };
        self.logger
            .log(level, &format!("{}: run ended ({})", self.scheme, outcome.label()))
            .correlation_id(&self.correlation_id)
            .field("scheme", &self.scheme)
            .outcome(outcome)
            .log()
            .await;
    }

    pub async fn metrics(&self, record: &MetricsRecord) {
        self.logger
            .info(&format!("{}: metrics parsed", self.scheme))
            .correlation_id(&self.correlation_id)
            .metrics(record)
            .log()
            .await;
    }

    pub async fn finish(&self, success: bool) -> Duration {
        let elapsed = self.started.elapsed();
        self.logger
            .info(&format!(
                "{}: finished in {:.1}s (success: {})",
                self.scheme,
                elapsed.as_secs_f64(),
                success
            ))
            .correlation_id(&self.correlation_id)
            .field("scheme", &self.scheme)
            .field("success", success)
            .field("duration_ms", elapsed.as_secs_f64() * 1000.0)
            .log()
            .await;
        elapsed
    }
}

/// Error event logger with enhanced context
pub struct ErrorEventLogger {
    logger: Logger,
}

impl ErrorEventLogger {
    pub fn new(config: &Config) -> Self {
        Self {
            logger: Logger::with_config("ERR".to_string(), config),
        }
    }

    pub async fn log_error(&self, error: &AppError, context: Option<&str>, correlation_id: Option<&str>) {
        let message = match context {
            Some(ctx) => format!("{}: {}", ctx, error),
            None => error.to_string(),
        };

        let builder = if error.is_fatal() {
            self.logger.fatal(&message)
        } else {
            self.logger.error(&message)
        };
        let mut builder = builder.error_info(error);
        if let Some(id) = correlation_id {
            builder = builder.correlation_id(id);
        }
        if let Some(ctx) = context {
            builder = builder.field("context", ctx);
        }
        builder.log().await;
    }

    /// Record the result of a leak sweep
    pub async fn log_sweep(&self, killed: usize, correlation_id: Option<&str>) {
        let level = if killed > 0 { LogLevel::Warn } else { LogLevel::Debug };
        let mut builder = self
            .logger
            .log(level, &format!("Cleanup sweep killed {} stray process(es)", killed))
            .field("killed", killed);
        if let Some(id) = correlation_id {
            builder = builder.correlation_id(id);
        }
        builder.log().await;
    }
}

/// Hands out loggers sharing one session id
pub struct LoggerFactory {
    config: Config,
    session_id: String,
}

impl LoggerFactory {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            session_id: Uuid::new_v4().to_string(),
        }
    }

    pub async fn create_logger(&self, name: &str) -> Logger {
        let logger = Logger::with_config(name.to_string(), &self.config);
        logger.set_session_id(self.session_id.clone()).await;
        logger
    }

    /// Logger for one run; every entry carries the scheme name
    pub async fn create_run_logger(&self, scheme: &str) -> RunLogger {
        let logger = self.create_logger("RUN").await;
        logger.add_context_field("scheme".to_string(), scheme).await;
        RunLogger::new(logger, scheme)
    }

    pub fn create_error_logger(&self) -> ErrorEventLogger {
        ErrorEventLogger::new(&self.config)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Convenience macros for logging with location information
#[macro_export]
macro_rules! log_trace {
    ($logger:expr, $($arg:tt)*) => {
        $logger.trace(&format!($($arg)*))
            .location(file!(), line!(), Some(module_path!()))
            .log()
            .await
    };
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {
        $logger.debug(&format!($($arg)*))
            .location(file!(), line!(), Some(module_path!()))
            .log()
            .await
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {
        $logger.info(&format!($($arg)*))
            .location(file!(), line!(), Some(module_path!()))
            .log()
            .await
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {
        $logger.warn(&format!($($arg)*))
            .location(file!(), line!(), Some(module_path!()))
            .log()
            .await
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {
        $logger.error(&format!($($arg)*))
            .location(file!(), line!(), Some(module_path!()))
            .log()
            .await
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, RunOrder};
    use std::str::FromStr;

    fn entry(message: &str) -> LogEntry {
        let mut fields = BTreeMap::new();
        fields.insert("scheme".to_string(), serde_json::Value::String("cubic".to_string()));
        LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: message.to_string(),
            logger: "RUN".to_string(),
            correlation_id: Some("0123456789abcdef".to_string()),
            fields,
            location: None,
        }
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("DEBUG").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert!(LogLevel::from_str("loud").is_err());
        assert!(LogLevel::Debug < LogLevel::Warn);
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("compact").unwrap(), LogFormat::Compact);
        assert!(LogFormat::from_str("xml").is_err());
    }

    #[test]
    fn test_logger_with_config() {
        let config = Config {
            debug: true,
            enable_color: false,
            log_format: Some(LogFormat::Compact),
            ..Default::default()
        };
        let logger = Logger::with_config("TEST".to_string(), &config);
        assert_eq!(logger.min_level, LogLevel::Debug);
        assert_eq!(logger.format, LogFormat::Compact);
        assert!(!logger.use_color);
        assert!(logger.include_location);

        let quiet = Logger::with_config("TEST".to_string(), &Config::default());
        assert!(!quiet.would_log(LogLevel::Info));
        assert!(quiet.would_log(LogLevel::Warn));
    }

    #[test]
    fn test_console_format() {
        let mut logger = Logger::new("RUN".to_string());
        logger.set_color(false);
        let output = logger.format_console(&entry("run ended"));
        assert!(output.contains(" INFO [RUN] run ended"));
        assert!(output.contains("[01234567]"));
        assert!(output.contains("scheme=\"cubic\""));
    }

    #[test]
    fn test_json_and_compact_formats() {
        let logger = Logger::new("RUN".to_string());
        let json = logger.format_json(&entry("hello"));
        let parsed: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.message, "hello");
        assert_eq!(parsed.level, LogLevel::Info);

        let compact = logger.format_compact(&entry("hello"));
        assert!(compact.ends_with("I RUN: hello"));
    }

    #[test]
    fn test_builder_domain_helpers() {
        let logger = Logger::new("RUN".to_string());
        let outcome = Outcome::ProcessFailure {
            order: RunOrder::Second,
            role: Role::Sender,
            code: Some(2),
        };
        let record = MetricsRecord::unavailable("vegas");
        let error = AppError::early_exit("vegas");

        let entry = logger
            .warn("run failed")
            .outcome(&outcome)
            .metrics(&record)
            .error_info(&error)
            .into_entry();

        assert_eq!(entry.fields["outcome"], "process-failure");
        assert_eq!(entry.fields["success"], false);
        assert_eq!(entry.fields["rtt_ms"], -1.0);
        assert_eq!(entry.fields["error_category"], "EARLY_EXIT");
        assert_eq!(entry.fields["error_scheme"], "vegas");
    }

    #[tokio::test]
    async fn test_run_logger_stages() {
        let mut run = RunLogger::new(Logger::new("RUN".to_string()), "cubic");
        assert!(!run.correlation_id().is_empty());

        run.begin_stage("negotiate").await;
        let elapsed = run.end_stage("negotiate").await;
        assert!(elapsed.is_some());
        assert!(run.end_stage("negotiate").await.is_none());

        run.outcome(&Outcome::TimedOutAsExpected).await;
        run.finish(true).await;
    }

    #[tokio::test]
    async fn test_logger_factory_shares_session() {
        let factory = LoggerFactory::new(Config::default());
        let logger = factory.create_logger("TEST").await;
        assert_eq!(logger.name(), "TEST");

        let context = logger.context.read().await;
        assert_eq!(context.session_id.as_deref(), Some(factory.session_id()));
    }

    #[tokio::test]
    async fn test_run_logger_carries_scheme() {
        let factory = LoggerFactory::new(Config::default());
        let run = factory.create_run_logger("vegas").await;
        let context = run.logger().context.read().await;
        assert_eq!(context.context_fields["scheme"], "vegas");
        assert_eq!(context.session_id.as_deref(), Some(factory.session_id()));
    }

    #[tokio::test]
    async fn test_error_logging() {
        let err_logger = ErrorEventLogger::new(&Config::default());
        let error = AppError::role_query("cubic", "no answer");
        err_logger.log_error(&error, Some("negotiating roles"), Some("corr")).await;
        err_logger.log_sweep(0, None).await;

        let fatal = AppError::interrupted(crate::process::StopSignal::Interrupt);
        let factory = LoggerFactory::new(Config::default());
        factory.create_error_logger().log_error(&fatal, None, None).await;
    }

    #[tokio::test]
    async fn test_location_macros() {
        let mut logger = Logger::new("MACRO".to_string());
        logger.set_color(false);
        logger.set_level(LogLevel::Trace);
        crate::log_trace!(logger, "probe {} spawned", "rtt");
        crate::log_debug!(logger, "window armed for {}s", 60);
        crate::log_info!(logger, "run {} finished", "cubic");
        crate::log_warn!(logger, "{} probe skipped", "throughput");
        crate::log_error!(logger, "sweep failed: {}", "permission denied");
    }
}
