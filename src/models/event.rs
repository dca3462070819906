//! Lifecycle events emitted by running tests
//!
//! Events arrive on the run topic in any order and carry only a loose
//! reference back to the invocation that produced them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::suite::CaseStatus;

/// Kind of lifecycle event
///
/// Inbound events may use either the bare name (`case_pass`) or the
/// namespaced wire name (`test:case_pass`); output always uses the latter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleKind {
    #[serde(rename = "test:plan", alias = "plan")]
    Plan,
    #[serde(rename = "test:suite_start", alias = "suite_start")]
    SuiteStart,
    #[serde(rename = "test:case_start", alias = "case_start")]
    CaseStart,
    #[serde(rename = "test:case_pass", alias = "case_pass")]
    CasePass,
    #[serde(rename = "test:case_fail", alias = "case_fail")]
    CaseFail,
    #[serde(rename = "test:case_skip", alias = "case_skip")]
    CaseSkip,
    #[serde(rename = "test:suite_result", alias = "suite_result")]
    SuiteResult,
    #[serde(rename = "test:complete", alias = "complete")]
    Complete,
    #[serde(rename = "test:error", alias = "error")]
    Error,
}

impl LifecycleKind {
    /// Namespaced wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleKind::Plan => "test:plan",
            LifecycleKind::SuiteStart => "test:suite_start",
            LifecycleKind::CaseStart => "test:case_start",
            LifecycleKind::CasePass => "test:case_pass",
            LifecycleKind::CaseFail => "test:case_fail",
            LifecycleKind::CaseSkip => "test:case_skip",
            LifecycleKind::SuiteResult => "test:suite_result",
            LifecycleKind::Complete => "test:complete",
            LifecycleKind::Error => "test:error",
        }
    }

    /// Outcome carried by a case result event
    pub fn case_status(&self) -> Option<CaseStatus> {
        match self {
            LifecycleKind::CasePass => Some(CaseStatus::Passed),
            LifecycleKind::CaseFail => Some(CaseStatus::Failed),
            LifecycleKind::CaseSkip => Some(CaseStatus::Skipped),
            _ => None,
        }
    }

    /// Events that feed the suite aggregator rather than completion
    pub fn is_suite_event(&self) -> bool {
        !self.is_terminal()
    }

    /// Events that settle an invocation
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleKind::Complete | LifecycleKind::Error)
    }
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single lifecycle event as published on the run topic
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    #[serde(rename = "type")]
    pub kind: LifecycleKind,

    /// Reference to the originating invocation; may be derived or partial
    #[serde(rename = "ref", alias = "correlation_ref", default)]
    pub correlation_ref: String,

    #[serde(default)]
    pub payload: Value,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleKind, correlation_ref: impl Into<String>) -> Self {
        Self {
            kind,
            correlation_ref: correlation_ref.into(),
            payload: Value::Object(Map::new()),
        }
    }

    #[cfg(test)]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set a single payload field, promoting the payload to an object
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !self.payload.is_object() {
            self.payload = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.payload {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// Case result event for `case` in `suite`
    pub fn case(
        kind: LifecycleKind,
        correlation_ref: impl Into<String>,
        suite: &str,
        case: &str,
    ) -> Self {
        Self::new(kind, correlation_ref)
            .with_field("suite", suite)
            .with_field("case", case)
    }

    /// Completion event with a reported status
    pub fn complete(correlation_ref: impl Into<String>, status: &str) -> Self {
        Self::new(LifecycleKind::Complete, correlation_ref).with_field("status", status)
    }

    fn str_field(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|key| self.payload.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn suite_name(&self) -> Option<&str> {
        self.str_field(&["suite", "suite_name"])
    }

    pub fn case_name(&self) -> Option<&str> {
        self.str_field(&["case", "test", "case_name"])
    }

    /// Status string reported by a completion event
    pub fn reported_status(&self) -> Option<&str> {
        self.str_field(&["status", "result"])
    }

    pub fn error_message(&self) -> Option<&str> {
        self.str_field(&["error", "message"])
    }

    /// Duration in milliseconds from `duration_ms` or `duration`
    pub fn duration_ms(&self) -> Option<u64> {
        ["duration_ms", "duration"].iter().find_map(|key| {
            let value = self.payload.get(*key)?;
            value
                .as_u64()
                .or_else(|| value.as_f64().filter(|d| *d >= 0.0).map(|d| d.round() as u64))
        })
    }

    fn count_field(&self, key: &str) -> Option<u32> {
        self.payload
            .get(key)
            .and_then(Value::as_u64)
            .map(|n| n.min(u64::from(u32::MAX)) as u32)
    }

    /// Aggregate counts reported by a suite result: (passed, failed, skipped)
    pub fn reported_counts(&self) -> Option<(u32, u32, u32)> {
        let passed = self.count_field("passed");
        let failed = self.count_field("failed");
        let skipped = self.count_field("skipped");
        if passed.is_none() && failed.is_none() && skipped.is_none() {
            return None;
        }
        Some((
            passed.unwrap_or(0),
            failed.unwrap_or(0),
            skipped.unwrap_or(0),
        ))
    }

    /// Suite names announced by a plan event
    pub fn planned_suites(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(Value::Array(items)) = self.payload.get("suites") {
            for item in items {
                let name = match item {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(obj) => obj.get("name").and_then(Value::as_str),
                    _ => None,
                };
                if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
                    names.push(name.to_string());
                }
            }
        }
        if let Some(name) = self.suite_name() {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }
}
