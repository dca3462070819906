//! Output formatters for run reports and test listings
//!
//! Provides table, JSON, CSV and summary output formats.

use anyhow::{Context, Result};
use std::io::Write;

use crate::models::{ExecutionStatus, TestDescriptor};
use crate::results::{RunReport, RunStatus, TestResultEntry};

const RULE_WIDTH: usize = 64;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::JsonPretty => "json-pretty",
            OutputFormat::Csv => "csv",
            OutputFormat::Summary => "summary",
        }
    }
}

/// Report formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Format a full run report
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Table => self.format_report_table(report),
            OutputFormat::Json => serde_json::to_string(report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Csv => self.format_report_csv(report).unwrap_or_default(),
            OutputFormat::Summary => self.format_report_brief(report),
        }
    }

    /// Format the tests a selection resolved to
    pub fn format_tests(&self, tests: &[TestDescriptor]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(tests).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(tests).unwrap_or_default(),
            OutputFormat::Csv => self.format_tests_csv(tests).unwrap_or_default(),
            OutputFormat::Summary => format!("{} tests matched", tests.len()),
            OutputFormat::Table => self.format_tests_table(tests),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if self.colorize {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn status_label(&self, status: ExecutionStatus) -> String {
        let label = format!("{} {}", status.symbol(), status);
        match status {
            ExecutionStatus::Passed => self.paint(&label, "32"),
            ExecutionStatus::Timeout => self.paint(&label, "33"),
            ExecutionStatus::Failed | ExecutionStatus::Error => self.paint(&label, "31"),
            ExecutionStatus::Pending | ExecutionStatus::Running => label,
        }
    }

    fn format_entry(&self, entry: &TestResultEntry) -> String {
        let mut line = format!(
            "{:24} {:10} [{:>7}ms]",
            entry.id,
            self.status_label(entry.status),
            entry.duration
        );
        if let Some(error) = &entry.error {
            line.push_str(&format!(" - {error}"));
        }
        line
    }

    fn format_report_table(&self, report: &RunReport) -> String {
        let mut output = String::new();
        let rule = "═".repeat(RULE_WIDTH);

        output.push_str(&format!("\n╔{rule}╗\n"));
        output.push_str(&format!("║  {:<w$}║\n", "Test Run Report", w = RULE_WIDTH - 2));
        output.push_str(&format!("╠{rule}╣\n"));

        if let Some(error) = &report.error {
            output.push_str(&format!("║  {}\n", self.paint(&format!("Error: {error}"), "31")));
        }

        for entry in &report.test_results {
            output.push_str(&format!("║  {}\n", self.format_entry(entry)));
            for suite in &entry.suites {
                output.push_str(&format!(
                    "║      {}: {} passed, {} failed, {} skipped\n",
                    suite.name, suite.passed, suite.failed, suite.skipped
                ));
                for case in suite.tests.iter().filter(|c| c.error.is_some()) {
                    output.push_str(&format!(
                        "║        {} {} - {}\n",
                        case.status.symbol(),
                        case.name,
                        case.error.as_deref().unwrap_or_default()
                    ));
                }
            }
        }

        output.push_str(&format!("╠{rule}╣\n"));
        let status = match report.status {
            RunStatus::Passed => self.paint("PASSED", "32"),
            RunStatus::Failed => self.paint("FAILED", "31"),
        };
        output.push_str(&format!(
            "║  Total: {:3} | Completed: {:3} | Pass: {:3} | Fail: {:3} | {}\n",
            report.tests_total,
            report.tests_completed,
            report.tests_passed,
            report.tests_failed,
            status
        ));
        output.push_str(&format!(
            "║  Pass Rate: {:5.1}%\n",
            report.pass_rate() * 100.0
        ));
        for warning in &report.warnings {
            output.push_str(&format!("║  {}\n", self.paint(&format!("warning: {warning}"), "33")));
        }
        output.push_str(&format!("╚{rule}╝\n"));

        output
    }

    fn format_report_csv(&self, report: &RunReport) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record([
            "id", "name", "group", "status", "duration_ms", "suites", "cases_failed", "error",
        ])?;

        for entry in &report.test_results {
            let cases_failed: u32 = entry.suites.iter().map(|s| s.failed).sum();
            writer.write_record([
                entry.id.as_str(),
                entry.name.as_str(),
                entry.group.as_str(),
                entry.status.to_string().as_str(),
                entry.duration.to_string().as_str(),
                entry.suites.len().to_string().as_str(),
                cases_failed.to_string().as_str(),
                entry.error.as_deref().unwrap_or_default(),
            ])?;
        }

        let bytes = writer.into_inner().context("Failed to flush CSV output")?;
        String::from_utf8(bytes).context("CSV output is not UTF-8")
    }

    fn format_report_brief(&self, report: &RunReport) -> String {
        if let Some(error) = &report.error {
            return format!("Run failed: {error}");
        }
        format!(
            "{}/{} passed ({:.1}%), {} failed - {}",
            report.tests_passed,
            report.tests_total,
            report.pass_rate() * 100.0,
            report.tests_failed,
            report.status
        )
    }

    fn format_tests_table(&self, tests: &[TestDescriptor]) -> String {
        let mut output = String::new();
        output.push_str(&format!(
            "{:24} {:28} {:12} {}\n",
            "ID", "NAME", "GROUP", "TAGS"
        ));
        output.push_str(&format!("{}\n", "─".repeat(RULE_WIDTH + 8)));
        for test in tests {
            output.push_str(&format!(
                "{:24} {:28} {:12} {}\n",
                test.id,
                test.name(),
                test.group,
                test.tags.join(",")
            ));
        }
        output.push_str(&format!("\n{} tests\n", tests.len()));
        output
    }

    fn format_tests_csv(&self, tests: &[TestDescriptor]) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["id", "name", "group", "namespace", "tags", "comment"])?;
        for test in tests {
            writer.write_record([
                test.id.as_str(),
                test.name(),
                test.group.as_str(),
                test.namespace.as_deref().unwrap_or_default(),
                test.tags.join(";").as_str(),
                test.comment.as_deref().unwrap_or_default(),
            ])?;
        }
        let bytes = writer.into_inner().context("Failed to flush CSV output")?;
        String::from_utf8(bytes).context("CSV output is not UTF-8")
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Write a formatted report to a file
pub fn write_report_to_file(path: &str, report: &RunReport, format: OutputFormat) -> Result<()> {
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_report(report);

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create output file {path}"))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
