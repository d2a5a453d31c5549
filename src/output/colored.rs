//! Colored terminal output

use super::formatter::{
    align_text, column_widths, horizontal_border, summary_cells, FormattingOptions, OutputFormatter,
    PlainFormatter, RowData, SUMMARY_COLUMNS,
};
use super::SummaryRow;
use crate::error::{AppError, Result};
use crate::models::MetricsRecord;
use crate::orchestrator::RunReport;
use colored::{Color, ColoredString, Colorize};
use std::fmt::Write;

/// Color scheme for terminal output
#[derive(Debug, Clone)]
pub struct ColorScheme {
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub info: Color,
    pub header: Color,
    pub muted: Color,
    pub border: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            success: Color::Green,
            warning: Color::Yellow,
            error: Color::Red,
            info: Color::Cyan,
            header: Color::BrightWhite,
            muted: Color::BrightBlack,
            border: Color::BrightBlack,
        }
    }
}

/// Colored formatter implementation. Layout is shared with
/// [`PlainFormatter`]; only the decoration differs.
pub struct ColoredFormatter {
    plain_formatter: PlainFormatter,
    options: FormattingOptions,
    color_scheme: ColorScheme,
}

impl ColoredFormatter {
    /// Create a new colored formatter with options
    pub fn new(options: FormattingOptions) -> Self {
        Self::with_color_scheme(options, ColorScheme::default())
    }

    /// Create a colored formatter with custom color scheme
    pub fn with_color_scheme(options: FormattingOptions, color_scheme: ColorScheme) -> Self {
        Self {
            plain_formatter: PlainFormatter::new(options.clone()),
            options,
            color_scheme,
        }
    }

    /// Apply color to text if colors are enabled
    fn colorize(&self, text: &str, color: Color) -> ColoredString {
        if self.options.enable_color {
            text.color(color)
        } else {
            text.normal()
        }
    }

    fn bold(&self, text: &str) -> ColoredString {
        if self.options.enable_color {
            text.bold()
        } else {
            text.normal()
        }
    }

    fn status_color(&self, row: &SummaryRow) -> Color {
        if row.succeeded {
            self.color_scheme.success
        } else {
            self.color_scheme.error
        }
    }

    /// A metric cell is yellow when it holds the unavailable sentinel
    fn metric_cell(&self, text: &str) -> ColoredString {
        if text == "n/a" {
            self.colorize(text, self.color_scheme.warning)
        } else {
            text.normal()
        }
    }

    fn colored_row(&self, row: &SummaryRow, cells: &RowData, widths: &[usize]) -> String {
        let border = self.colorize("|", self.color_scheme.border);
        let mut line = border.to_string();
        for (idx, ((cell, &width), col)) in cells.iter().zip(widths).zip(SUMMARY_COLUMNS).enumerate() {
            // pad before coloring so escape codes do not count towards the width
            let padded = align_text(cell, width, col.alignment);
            let styled = match idx {
                1 => self.bold(&padded),
                2 => self.colorize(&padded, self.status_color(row)),
                3..=5 => self.metric_cell(&padded),
                _ => padded.normal(),
            };
            write!(line, " {} {}", styled, border).ok();
        }
        line
    }
}

fn fmt_err(e: std::fmt::Error) -> AppError {
    AppError::internal(format!("Failed to format output: {}", e))
}

impl OutputFormatter for ColoredFormatter {
    fn format_header(&self, title: &str) -> Result<String> {
        let mut output = String::new();
        let border = "═".repeat(title.chars().count() + 4);

        writeln!(output, "{}", self.colorize(&border, self.color_scheme.border)).map_err(fmt_err)?;
        writeln!(output, "  {}", self.bold(title).color(self.color_scheme.header)).map_err(fmt_err)?;
        write!(output, "{}", self.colorize(&border, self.color_scheme.border)).map_err(fmt_err)?;

        Ok(output)
    }

    fn format_run_start(&self, scheme: &str, profile: Option<&str>, index: usize, total: usize) -> Result<String> {
        let counter = self.colorize(&format!("[{}/{}]", index, total), self.color_scheme.muted);
        let scheme = self.bold(scheme).color(self.color_scheme.info);
        Ok(match profile {
            Some(profile) => format!("{} Testing {} in {}", counter, scheme, profile),
            None => format!("{} Testing {}", counter, scheme),
        })
    }

    fn format_metrics(&self, record: &MetricsRecord) -> Result<String> {
        let plain = self.plain_formatter.format_metrics(record)?;
        let tag = self.colorize("[METRICS]", self.color_scheme.info);
        Ok(plain
            .lines()
            .map(|line| line.replacen("[METRICS]", &tag.to_string(), 1))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn format_run_report(&self, report: &RunReport) -> Result<String> {
        let mut output = self.format_metrics(&report.metrics)?;

        if self.options.verbose_mode {
            if let Some(roles) = report.roles {
                write!(
                    output,
                    "\n  {} {} first, {} second",
                    self.colorize("Roles:", self.color_scheme.muted),
                    roles.first,
                    roles.second
                )
                .map_err(fmt_err)?;
            }
            write!(
                output,
                "\n  {} {}\n  {} {} ({} rows)",
                self.colorize("Metrics log:", self.color_scheme.muted),
                report.metrics_path.display(),
                self.colorize("Time series:", self.color_scheme.muted),
                report.csv_path.display(),
                report.series_rows
            )
            .map_err(fmt_err)?;
        }

        if report.synthetic_rows > 0 {
            let note = format!(
                "Note: {} of {} rows contain simulated values",
                report.synthetic_rows, report.series_rows
            );
            write!(output, "\n  {}", self.colorize(&note, self.color_scheme.warning)).map_err(fmt_err)?;
        }

        Ok(output)
    }

    fn format_summary(&self, rows: &[SummaryRow]) -> Result<String> {
        if rows.is_empty() {
            return Ok(self.colorize("No runs.", self.color_scheme.muted).to_string());
        }

        let data: Vec<RowData> = rows.iter().map(summary_cells).collect();
        let widths = column_widths(SUMMARY_COLUMNS, &data);
        let border = self.colorize(&horizontal_border(&widths), self.color_scheme.border);
        let bar = self.colorize("|", self.color_scheme.border);

        let mut output = String::new();
        writeln!(output, "{}", border).map_err(fmt_err)?;
        let mut header = bar.to_string();
        for (col, &width) in SUMMARY_COLUMNS.iter().zip(&widths) {
            let padded = align_text(col.header, width, col.alignment);
            write!(header, " {} {}", self.bold(&padded), bar).map_err(fmt_err)?;
        }
        writeln!(output, "{}", header).map_err(fmt_err)?;
        writeln!(output, "{}", border).map_err(fmt_err)?;
        for (row, cells) in rows.iter().zip(&data) {
            writeln!(output, "{}", self.colored_row(row, cells, &widths)).map_err(fmt_err)?;
        }
        writeln!(output, "{}", border).map_err(fmt_err)?;

        let failed = rows.iter().filter(|r| !r.succeeded).count();
        let succeeded = self.colorize(&format!("{} succeeded", rows.len() - failed), self.color_scheme.success);
        let failed_text = if failed > 0 {
            self.colorize(&format!("{} failed", failed), self.color_scheme.error)
        } else {
            self.colorize("0 failed", self.color_scheme.muted)
        };
        write!(output, "{} run(s), {}, {}", rows.len(), succeeded, failed_text).map_err(fmt_err)?;

        Ok(output)
    }

    fn format_error(&self, error: &str) -> Result<String> {
        Ok(format!("{} {}", self.colorize("✗", self.color_scheme.error), error))
    }

    fn format_warning(&self, warning: &str) -> Result<String> {
        Ok(format!("{} {}", self.colorize("!", self.color_scheme.warning), warning))
    }

    fn format_success(&self, message: &str) -> Result<String> {
        Ok(format!("{} {}", self.colorize("✓", self.color_scheme.success), message))
    }
}
