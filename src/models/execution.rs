//! Per-test execution state
//!
//! The dispatcher is the only writer of status, timing and result fields.
//! Suite detail is produced by the event listener and handed over by message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use super::suite::SuiteSnapshot;

/// Execution status of a dispatched test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Error,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }

    /// Counts toward `tests_failed`
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Failed | ExecutionStatus::Error | ExecutionStatus::Timeout
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "·",
            ExecutionStatus::Running => "…",
            ExecutionStatus::Passed => "✓",
            ExecutionStatus::Failed => "✗",
            ExecutionStatus::Error => "!",
            ExecutionStatus::Timeout => "⧗",
        }
    }

    /// Map a status string reported by a test or its result to a terminal status
    pub fn from_reported(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "passed" | "pass" | "success" | "succeeded" | "ok" => Some(ExecutionStatus::Passed),
            "failed" | "fail" | "failure" => Some(ExecutionStatus::Failed),
            "error" | "errored" => Some(ExecutionStatus::Error),
            "timeout" | "timed_out" => Some(ExecutionStatus::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "PENDING"),
            ExecutionStatus::Running => write!(f, "RUNNING"),
            ExecutionStatus::Passed => write!(f, "PASS"),
            ExecutionStatus::Failed => write!(f, "FAIL"),
            ExecutionStatus::Error => write!(f, "ERROR"),
            ExecutionStatus::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// State of one dispatched test
#[derive(Clone, Debug)]
pub struct ExecutionHandle {
    pub test_id: String,
    pub correlation_id: String,
    pub start_time: Option<DateTime<Utc>>,
    status: ExecutionStatus,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub raw_result: Option<Value>,
    pub error: Option<String>,
    pub suites: Vec<SuiteSnapshot>,
    /// Status defaulted to passed because nothing reported one
    pub status_assumed: bool,
}

impl ExecutionHandle {
    pub fn new(test_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            correlation_id: correlation_id.into(),
            start_time: None,
            status: ExecutionStatus::Pending,
            end_time: None,
            duration: Duration::ZERO,
            raw_result: None,
            error: None,
            suites: Vec::new(),
            status_assumed: false,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn mark_running(&mut self) {
        if self.status == ExecutionStatus::Pending {
            self.status = ExecutionStatus::Running;
            self.start_time = Some(Utc::now());
        }
    }

    /// Move to a terminal status. Only the first call has any effect.
    pub fn settle(&mut self, status: ExecutionStatus, duration: Duration) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.duration = duration;
        self.end_time = Some(Utc::now());
        true
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.test_id,
            self.duration_ms()
        )?;
        if let Some(error) = &self.error {
            write!(f, " - {error}")?;
        }
        Ok(())
    }
}
