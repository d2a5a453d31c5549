//! Output formatting and display system
//!
//! Per-run `[METRICS]` blocks and the final summary table, in colored or
//! plain text.

mod colored;
mod formatter;

pub use colored::{ColorScheme, ColoredFormatter};
pub use formatter::{Alignment, Column, FormattingOptions, OutputFormatter, PlainFormatter, RowData};

use crate::models::MetricsRecord;
use crate::orchestrator::{outcome_of, BatchEntry};
use std::time::Duration;

/// Output formatting factory for creating appropriate formatters
pub struct OutputFormatterFactory;

impl OutputFormatterFactory {
    /// Create a formatter based on color support and preferences
    pub fn create_formatter(enable_color: bool, verbose: bool) -> Box<dyn OutputFormatter> {
        let options = FormattingOptions {
            enable_color,
            verbose_mode: verbose,
            table_borders: true,
        };

        if enable_color {
            Box::new(ColoredFormatter::new(options))
        } else {
            Box::new(PlainFormatter::new(options))
        }
    }

    /// Create a plain text formatter for scripts/logs
    pub fn create_plain_formatter() -> Box<dyn OutputFormatter> {
        Self::create_formatter(false, true)
    }
}

/// One line of the run summary
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub profile: Option<String>,
    pub scheme: String,
    /// Outcome label, or the error category for runs that never got a window
    pub status: String,
    pub succeeded: bool,
    pub metrics: Option<MetricsRecord>,
    pub elapsed: Option<Duration>,
}

impl SummaryRow {
    pub fn from_entry(entry: &BatchEntry, profile: Option<&str>) -> Self {
        let status = match (outcome_of(&entry.result), &entry.result) {
            (Some(outcome), _) => outcome.label().to_string(),
            (None, Err(e)) => e.category().to_lowercase().replace('_', "-"),
            (None, Ok(_)) => "ok".to_string(),
        };

        let (metrics, elapsed) = match entry.result {
            Ok(ref report) => (Some(report.metrics.clone()), Some(report.elapsed)),
            Err(_) => (None, None),
        };

        Self {
            profile: profile.map(str::to_string),
            scheme: entry.scheme.clone(),
            status,
            succeeded: entry.result.is_ok(),
            metrics,
            elapsed,
        }
    }
}
