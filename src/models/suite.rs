//! Suite and case state reported by a test's own framework

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of a single case
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failed,
    Skipped,
}

impl CaseStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            CaseStatus::Passed => "✓",
            CaseStatus::Failed => "✗",
            CaseStatus::Skipped => "○",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseStatus::Passed => write!(f, "passed"),
            CaseStatus::Failed => write!(f, "failed"),
            CaseStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Live state of one case inside a suite
#[derive(Clone, Debug, PartialEq)]
pub struct TestCaseState {
    pub name: String,
    pub status: CaseStatus,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Set once the case has contributed to its suite counters
    counted: bool,
}

impl TestCaseState {
    fn new(name: &str, status: CaseStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            error: None,
            duration_ms: 0,
            counted: false,
        }
    }

    pub fn is_counted(&self) -> bool {
        self.counted
    }
}

/// Live state of one suite, built incrementally from case events
///
/// `total == passed + failed + skipped` holds after every mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct SuiteState {
    pub name: String,
    passed: u32,
    failed: u32,
    skipped: u32,
    total: u32,
    pub duration_ms: Option<u64>,
    tests: BTreeMap<String, TestCaseState>,
}

impl SuiteState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: 0,
            failed: 0,
            skipped: 0,
            total: 0,
            duration_ms: None,
            tests: BTreeMap::new(),
        }
    }

    pub fn passed(&self) -> u32 {
        self.passed
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }

    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn case(&self, name: &str) -> Option<&TestCaseState> {
        self.tests.get(name)
    }

    pub fn is_consistent(&self) -> bool {
        self.total == self.passed + self.failed + self.skipped
    }

    fn counter(&mut self, status: CaseStatus) -> &mut u32 {
        match status {
            CaseStatus::Passed => &mut self.passed,
            CaseStatus::Failed => &mut self.failed,
            CaseStatus::Skipped => &mut self.skipped,
        }
    }

    /// Upsert a case outcome. Returns true when the case was counted for the first time.
    ///
    /// Redelivery of the same outcome changes nothing; a changed outcome moves
    /// the case between counters without touching `total`.
    pub fn record_case(
        &mut self,
        name: &str,
        status: CaseStatus,
        duration_ms: Option<u64>,
        error: Option<&str>,
    ) -> bool {
        let case = self
            .tests
            .entry(name.to_string())
            .or_insert_with(|| TestCaseState::new(name, status));

        let previous = case.status;
        let first = !case.counted;
        case.status = status;
        case.counted = true;
        if let Some(duration) = duration_ms {
            case.duration_ms = duration;
        }
        if let Some(error) = error {
            case.error = Some(error.to_string());
        }

        if first {
            *self.counter(status) += 1;
            self.total += 1;
        } else if previous != status {
            *self.counter(previous) -= 1;
            *self.counter(status) += 1;
        }
        debug_assert!(self.is_consistent());
        first
    }

    /// Adopt counts from a suite-level summary when no case was reported individually
    pub fn adopt_counts(&mut self, passed: u32, failed: u32, skipped: u32) -> bool {
        if self.tests.values().any(TestCaseState::is_counted) {
            return false;
        }
        self.passed = passed;
        self.failed = failed;
        self.skipped = skipped;
        self.total = passed + failed + skipped;
        true
    }

    /// Reportable copy with internal bookkeeping stripped
    pub fn snapshot(&self) -> SuiteSnapshot {
        SuiteSnapshot {
            name: self.name.clone(),
            passed: self.passed,
            failed: self.failed,
            skipped: self.skipped,
            total: self.total,
            duration: self.duration_ms,
            tests: self
                .tests
                .values()
                .map(|case| CaseSnapshot {
                    name: case.name.clone(),
                    status: case.status,
                    duration: case.duration_ms,
                    error: case.error.clone(),
                })
                .collect(),
        }
    }
}

/// Reported suite detail
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteSnapshot {
    pub name: String,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub total: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub tests: Vec<CaseSnapshot>,
}

/// Reported case detail
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSnapshot {
    pub name: String,
    pub status: CaseStatus,
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
