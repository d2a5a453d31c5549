//! Formatter trait and the plain-text implementation

use super::SummaryRow;
use crate::error::{AppError, Result};
use crate::models::MetricsRecord;
use crate::orchestrator::RunReport;
use std::fmt::Write;

/// Renders run progress, metrics and the final summary
pub trait OutputFormatter {
    /// Format a banner
    fn format_header(&self, title: &str) -> Result<String>;

    /// Announce the start of one run
    fn format_run_start(&self, scheme: &str, profile: Option<&str>, index: usize, total: usize) -> Result<String>;

    /// The `[METRICS]` block of one run
    fn format_metrics(&self, record: &MetricsRecord) -> Result<String>;

    /// Everything known about a finished run
    fn format_run_report(&self, report: &RunReport) -> Result<String>;

    /// One row per run, successful or not
    fn format_summary(&self, rows: &[SummaryRow]) -> Result<String>;

    fn format_error(&self, error: &str) -> Result<String>;

    fn format_warning(&self, warning: &str) -> Result<String>;

    fn format_success(&self, message: &str) -> Result<String>;
}

/// Configuration options for formatting
#[derive(Debug, Clone)]
pub struct FormattingOptions {
    /// Enable colored output
    pub enable_color: bool,
    /// Show artifact paths and role assignments
    pub verbose_mode: bool,
    /// Show table borders
    pub table_borders: bool,
}

impl Default for FormattingOptions {
    fn default() -> Self {
        Self {
            enable_color: true,
            verbose_mode: false,
            table_borders: true,
        }
    }
}

/// Text alignment options
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Alignment {
    Left,
    Right,
}

/// Column definition for table formatting
#[derive(Debug, Clone)]
pub struct Column {
    pub header: &'static str,
    pub alignment: Alignment,
}

/// Row data for table formatting
pub type RowData = Vec<String>;

/// Columns of the run summary table
pub(crate) const SUMMARY_COLUMNS: &[Column] = &[
    Column { header: "Profile", alignment: Alignment::Left },
    Column { header: "Scheme", alignment: Alignment::Left },
    Column { header: "Outcome", alignment: Alignment::Left },
    Column { header: "RTT (ms)", alignment: Alignment::Right },
    Column { header: "Loss", alignment: Alignment::Right },
    Column { header: "Throughput (Mbps)", alignment: Alignment::Right },
    Column { header: "Elapsed", alignment: Alignment::Right },
];

/// Cell values of one summary row, before any coloring
pub(crate) fn summary_cells(row: &SummaryRow) -> RowData {
    let (rtt, loss, throughput) = match row.metrics {
        Some(ref m) => (
            format_measure(m.avg_rtt_ms, |v| format!("{:.2}", v)),
            format_measure(m.loss_rate, |v| format!("{:.2}%", v * 100.0)),
            format_measure(m.throughput_bps, |v| format!("{:.2}", v / 1e6)),
        ),
        None => ("-".to_string(), "-".to_string(), "-".to_string()),
    };

    vec![
        row.profile.clone().unwrap_or_else(|| "-".to_string()),
        row.scheme.clone(),
        row.status.clone(),
        rtt,
        loss,
        throughput,
        row.elapsed
            .map(|d| format_elapsed(d.as_secs_f64()))
            .unwrap_or_else(|| "-".to_string()),
    ]
}

/// Sentinel values render as `n/a`
pub(crate) fn format_measure(value: f64, render: impl Fn(f64) -> String) -> String {
    if value < 0.0 {
        "n/a".to_string()
    } else {
        render(value)
    }
}

/// Format elapsed seconds in human-readable form
pub(crate) fn format_elapsed(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let minutes = (secs / 60.0) as u32;
        format!("{}m{:.0}s", minutes, secs % 60.0)
    }
}

/// Width of each column over header and rows
pub(crate) fn column_widths(columns: &[Column], rows: &[RowData]) -> Vec<usize> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            rows.iter()
                .filter_map(|row| row.get(idx))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
                .max(col.header.len())
        })
        .collect()
}

/// Pad text to width
pub(crate) fn align_text(text: &str, width: usize, alignment: Alignment) -> String {
    match alignment {
        Alignment::Left => format!("{:<width$}", text, width = width),
        Alignment::Right => format!("{:>width$}", text, width = width),
    }
}

pub(crate) fn horizontal_border(widths: &[usize]) -> String {
    let mut border = String::from("+");
    for &width in widths {
        border.push_str(&"-".repeat(width + 2));
        border.push('+');
    }
    border
}

fn fmt_err(e: std::fmt::Error) -> AppError {
    AppError::internal(format!("Failed to format output: {}", e))
}

/// Plain text formatter implementation
pub struct PlainFormatter {
    options: FormattingOptions,
}

impl PlainFormatter {
    /// Create a new plain formatter with options
    pub fn new(options: FormattingOptions) -> Self {
        Self { options }
    }

    fn create_row(&self, cells: &[String], widths: &[usize]) -> String {
        let mut row = String::new();
        if self.options.table_borders {
            row.push('|');
        }
        for ((cell, &width), col) in cells.iter().zip(widths).zip(SUMMARY_COLUMNS) {
            let padded = align_text(cell, width, col.alignment);
            if self.options.table_borders {
                row.push(' ');
                row.push_str(&padded);
                row.push_str(" |");
            } else {
                row.push_str(&padded);
                row.push_str("  ");
            }
        }
        row.trim_end().to_string()
    }
}

impl OutputFormatter for PlainFormatter {
    fn format_header(&self, title: &str) -> Result<String> {
        let mut output = String::new();
        let border = "=".repeat(title.len() + 4);

        writeln!(output, "{}", border).map_err(fmt_err)?;
        writeln!(output, "  {}", title).map_err(fmt_err)?;
        write!(output, "{}", border).map_err(fmt_err)?;

        Ok(output)
    }

    fn format_run_start(&self, scheme: &str, profile: Option<&str>, index: usize, total: usize) -> Result<String> {
        Ok(match profile {
            Some(profile) => format!("[{}/{}] Testing {} in {}", index, total, scheme, profile),
            None => format!("[{}/{}] Testing {}", index, total, scheme),
        })
    }

    fn format_metrics(&self, record: &MetricsRecord) -> Result<String> {
        let mut output = String::new();
        writeln!(output, "[METRICS] Scheme: {}", record.scheme).map_err(fmt_err)?;
        writeln!(output, "[METRICS] RTT: {:.2} ms", record.avg_rtt_ms).map_err(fmt_err)?;
        writeln!(output, "[METRICS] Loss Rate: {:.4}", record.loss_rate).map_err(fmt_err)?;
        write!(output, "[METRICS] Throughput: {:.2} bps", record.throughput_bps).map_err(fmt_err)?;
        Ok(output)
    }

    fn format_run_report(&self, report: &RunReport) -> Result<String> {
        let mut output = self.format_metrics(&report.metrics)?;

        if self.options.verbose_mode {
            writeln!(output).map_err(fmt_err)?;
            if let Some(roles) = report.roles {
                writeln!(output, "  Roles: {} first, {} second", roles.first, roles.second)
                    .map_err(fmt_err)?;
            }
            writeln!(output, "  Metrics log: {}", report.metrics_path.display()).map_err(fmt_err)?;
            write!(
                output,
                "  Time series: {} ({} rows)",
                report.csv_path.display(),
                report.series_rows
            )
            .map_err(fmt_err)?;
        }

        if report.synthetic_rows > 0 {
            write!(
                output,
                "\n  Note: {} of {} rows contain simulated values",
                report.synthetic_rows, report.series_rows
            )
            .map_err(fmt_err)?;
        }

        Ok(output)
    }

    fn format_summary(&self, rows: &[SummaryRow]) -> Result<String> {
        if rows.is_empty() {
            return Ok("No runs.".to_string());
        }

        let data: Vec<RowData> = rows.iter().map(summary_cells).collect();
        let widths = column_widths(SUMMARY_COLUMNS, &data);
        let headers: Vec<String> = SUMMARY_COLUMNS.iter().map(|c| c.header.to_string()).collect();

        let mut output = String::new();
        if self.options.table_borders {
            writeln!(output, "{}", horizontal_border(&widths)).map_err(fmt_err)?;
        }
        writeln!(output, "{}", self.create_row(&headers, &widths)).map_err(fmt_err)?;
        if self.options.table_borders {
            writeln!(output, "{}", horizontal_border(&widths)).map_err(fmt_err)?;
        }
        for cells in &data {
            writeln!(output, "{}", self.create_row(cells, &widths)).map_err(fmt_err)?;
        }
        if self.options.table_borders {
            writeln!(output, "{}", horizontal_border(&widths)).map_err(fmt_err)?;
        }

        let failed = rows.iter().filter(|r| !r.succeeded).count();
        write!(
            output,
            "{} run(s), {} succeeded, {} failed",
            rows.len(),
            rows.len() - failed,
            failed
        )
        .map_err(fmt_err)?;

        Ok(output)
    }

    fn format_error(&self, error: &str) -> Result<String> {
        Ok(format!("ERROR: {}", error))
    }

    fn format_warning(&self, warning: &str) -> Result<String> {
        Ok(format!("WARNING: {}", warning))
    }

    fn format_success(&self, message: &str) -> Result<String> {
        Ok(format!("OK: {}", message))
    }
}
