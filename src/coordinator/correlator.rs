//! Event-to-execution correlation
//!
//! References on inbound events are unreliable: some carry the exact
//! correlation id, some a derived form (`<corr>/worker-1`, `suite#2`), some
//! only a dotted test path. [`extract_test_id`] derives a candidate test id
//! and [`Correlator::resolve`] maps the event onto a registered execution.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, trace};

use crate::models::LifecycleEvent;

/// `#<digits>` attempt suffix, e.g. `login#2`
static ATTEMPT_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\d+$").expect("attempt suffix pattern"));

/// Characters allowed in a derived test id
static TEST_ID_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").expect("test id pattern"));

/// Derive a candidate test id from an event reference and payload.
///
/// Precedence: an explicit `test_id`/`id` payload field, then the trailing
/// segment after the last `:` or `/` (attempt suffix stripped), then the
/// last `.` segment of a separator-free reference.
pub fn extract_test_id(reference: &str, payload: &Value) -> Option<String> {
    for key in ["test_id", "id"] {
        if let Some(id) = payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return Some(id.to_string());
        }
    }

    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }

    let candidate = match reference.rfind([':', '/']) {
        Some(pos) => ATTEMPT_SUFFIX.replace(&reference[pos + 1..], "").into_owned(),
        None => {
            let stripped = ATTEMPT_SUFFIX.replace(reference, "");
            stripped.rsplit('.').next().unwrap_or_default().to_string()
        }
    };

    let candidate = candidate.trim();
    if TEST_ID_TOKEN.is_match(candidate) {
        Some(candidate.to_string())
    } else {
        None
    }
}

/// Outcome of resolving an event reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Belongs to an execution that is still outstanding
    Pending(String),
    /// Belongs to an execution that has already been settled
    Settled(String),
    /// No execution claimed it; carries the candidate test id if any
    Unmatched(Option<String>),
}

/// Registry of dispatched executions, owned by the event listener
#[derive(Debug, Default)]
pub struct Correlator {
    /// correlation id -> test id
    pending: HashMap<String, String>,
    settled: HashMap<String, String>,
    /// test id -> most recent correlation id
    by_test: HashMap<String, String>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, test_id: &str, correlation_id: &str) {
        self.pending
            .insert(correlation_id.to_string(), test_id.to_string());
        self.by_test
            .insert(test_id.to_string(), correlation_id.to_string());
    }

    /// Mark an execution settled. Returns false if it was not outstanding.
    pub fn settle(&mut self, correlation_id: &str) -> bool {
        match self.pending.remove(correlation_id) {
            Some(test_id) => {
                self.settled.insert(correlation_id.to_string(), test_id);
                true
            }
            None => false,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn test_id(&self, correlation_id: &str) -> Option<&str> {
        self.pending
            .get(correlation_id)
            .or_else(|| self.settled.get(correlation_id))
            .map(String::as_str)
    }

    fn classify(&self, correlation_id: &str) -> Resolution {
        if self.pending.contains_key(correlation_id) {
            Resolution::Pending(correlation_id.to_string())
        } else {
            Resolution::Settled(correlation_id.to_string())
        }
    }

    pub fn resolve(&self, event: &LifecycleEvent) -> Resolution {
        let reference = event.correlation_ref.trim();

        if let Some(corr) = self.match_correlation_id(reference) {
            trace!("{} matched correlation id {}", reference, corr);
            return self.classify(corr);
        }

        let candidate = extract_test_id(reference, &event.payload);
        if let Some(corr) = candidate.as_deref().and_then(|id| self.by_test.get(id)) {
            debug!("{} matched by test id {:?}", reference, candidate);
            return self.classify(corr);
        }

        if let Some(corr) = self.scan_pending(reference, candidate.as_deref()) {
            debug!("{} matched by containment scan as {}", reference, corr);
            return Resolution::Pending(corr.to_string());
        }

        if self.pending.len() == 1 {
            if let Some(corr) = self.pending.keys().next() {
                debug!("{} attributed to sole outstanding execution {}", reference, corr);
                return Resolution::Pending(corr.clone());
            }
        }

        Resolution::Unmatched(candidate)
    }

    /// Exact correlation id, or the longest known one the reference embeds
    fn match_correlation_id(&self, reference: &str) -> Option<&str> {
        if reference.is_empty() {
            return None;
        }
        if let Some((corr, _)) = self
            .pending
            .get_key_value(reference)
            .or_else(|| self.settled.get_key_value(reference))
        {
            return Some(corr.as_str());
        }
        self.pending
            .keys()
            .chain(self.settled.keys())
            .filter(|corr| reference.contains(corr.as_str()))
            .max_by_key(|corr| corr.len())
            .map(String::as_str)
    }

    /// Pending execution whose test id the reference or candidate contains; longest id wins
    fn scan_pending(&self, reference: &str, candidate: Option<&str>) -> Option<&str> {
        self.pending
            .iter()
            .filter(|(_, test_id)| {
                !test_id.is_empty()
                    && (reference.contains(test_id.as_str())
                        || candidate.is_some_and(|c| c.contains(test_id.as_str())))
            })
            .max_by_key(|(_, test_id)| test_id.len())
            .map(|(corr, _)| corr.as_str())
    }
}
