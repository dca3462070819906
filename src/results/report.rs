//! Run report assembly
//!
//! Turns settled execution handles plus whatever the listener collected into
//! the aggregate report returned by a batch run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{info, warn};

use crate::coordinator::ListenerReport;
use crate::models::{ExecutionHandle, ExecutionStatus, SuiteSnapshot, TestDescriptor};

/// Overall run status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Passed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Passed => write!(f, "passed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One test's entry in the report
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResultEntry {
    pub id: String,
    pub name: String,
    pub group: String,
    pub status: ExecutionStatus,

    /// Milliseconds until readiness, timeout or start failure
    pub duration: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub suites: Vec<SuiteSnapshot>,
}

/// Aggregate run report
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// The run executed; false only when it aborted before dispatch
    pub success: bool,
    pub tests_total: usize,
    pub tests_completed: usize,
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub status: RunStatus,

    /// Sorted by ascending duration
    pub test_results: Vec<TestResultEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    /// Report for a run that aborted before dispatching anything
    pub fn failure(error: &impl fmt::Display) -> Self {
        Self {
            success: false,
            tests_total: 0,
            tests_completed: 0,
            tests_passed: 0,
            tests_failed: 0,
            status: RunStatus::Failed,
            test_results: Vec::new(),
            warnings: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.tests_completed == 0 {
            0.0
        } else {
            self.tests_passed as f64 / self.tests_completed as f64
        }
    }

    pub fn summary(&self) -> String {
        match &self.error {
            Some(error) => format!("Run failed: {error}"),
            None => format!(
                "{} tests: {} passed, {} failed ({})",
                self.tests_total, self.tests_passed, self.tests_failed, self.status
            ),
        }
    }

    /// Write the report as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create report file {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .context("Failed to write report")?;
        info!("Saved report to {}", path.display());
        Ok(())
    }
}

/// Build the run report.
///
/// `tests` and `handles` are in dispatch order. Suite detail the dispatcher
/// did not receive is taken from the listener's finalized books.
pub fn assemble(
    tests: &[TestDescriptor],
    handles: Vec<ExecutionHandle>,
    listener: Option<ListenerReport>,
    mut warnings: Vec<String>,
) -> RunReport {
    let mut listener = listener.unwrap_or_default();
    let names: HashMap<&str, &TestDescriptor> = tests.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut entries = Vec::with_capacity(handles.len());
    let mut tests_completed = 0;
    let mut tests_passed = 0;
    let mut tests_failed = 0;

    for mut handle in handles {
        let status = handle.status();
        if status.is_terminal() {
            tests_completed += 1;
        }
        if status == ExecutionStatus::Passed {
            tests_passed += 1;
        }
        if status.is_failure() {
            tests_failed += 1;
        }
        if handle.status_assumed {
            warnings.push(format!(
                "{} reported no status; assumed passed",
                handle.test_id
            ));
        }

        if handle.suites.is_empty() {
            if let Some(suites) = listener.finalized.remove(&handle.correlation_id) {
                handle.suites = suites;
            }
        }

        let descriptor = names.get(handle.test_id.as_str());
        entries.push(TestResultEntry {
            name: descriptor
                .map(|t| t.name().to_string())
                .unwrap_or_else(|| handle.test_id.clone()),
            group: descriptor.map(|t| t.group.clone()).unwrap_or_default(),
            status,
            duration: handle.duration_ms(),
            error: handle.error,
            suites: handle.suites,
            id: handle.test_id,
        });
    }

    // Uncorrelated suite detail is only credited when the run had one test.
    if !listener.orphan_suites.is_empty() {
        match entries.as_mut_slice() {
            [entry] if entry.suites.is_empty() => {
                entry.suites = std::mem::take(&mut listener.orphan_suites);
            }
            _ => warnings.push(format!(
                "{} suites from uncorrelated events could not be assigned to a test",
                listener.orphan_suites.len()
            )),
        }
    }

    let unmatched = listener.unmatched_count();
    if unmatched > 0 {
        let keys: Vec<&str> = listener.unmatched.keys().map(String::as_str).collect();
        warnings.push(format!(
            "{} events could not be attributed to a running test ({})",
            unmatched,
            keys.join(", ")
        ));
    }

    for warning in &warnings {
        warn!("{}", warning);
    }

    entries.sort_by_key(|e| e.duration);

    RunReport {
        success: true,
        tests_total: tests.len(),
        tests_completed,
        tests_passed,
        tests_failed,
        status: if tests_failed > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        },
        test_results: entries,
        warnings,
        error: None,
    }
}
