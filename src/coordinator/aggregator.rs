//! Suite/case aggregation for a single execution

use tracing::trace;

use crate::models::{LifecycleEvent, LifecycleKind, SuiteSnapshot, SuiteState};

/// Suite used when a case event names none
pub const DEFAULT_SUITE: &str = "default";

/// Suites reported by one execution, in first-reference order
#[derive(Clone, Debug, Default)]
pub struct SuiteBook {
    suites: Vec<SuiteState>,
}

impl SuiteBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    #[cfg(test)]
    pub fn suite(&self, name: &str) -> Option<&SuiteState> {
        self.suites.iter().find(|s| s.name == name)
    }

    fn ensure(&mut self, name: &str) -> &mut SuiteState {
        let index = match self.suites.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.suites.push(SuiteState::new(name));
                self.suites.len() - 1
            }
        };
        &mut self.suites[index]
    }

    /// Fold one event into the book. Returns true if any state changed.
    pub fn apply(&mut self, event: &LifecycleEvent) -> bool {
        let suite_name = event.suite_name().unwrap_or(DEFAULT_SUITE);

        match event.kind {
            LifecycleKind::Plan => {
                let before = self.suites.len();
                for name in event.planned_suites() {
                    self.ensure(&name);
                }
                self.suites.len() != before
            }
            LifecycleKind::SuiteStart | LifecycleKind::CaseStart => {
                let before = self.suites.len();
                self.ensure(suite_name);
                self.suites.len() != before
            }
            LifecycleKind::CasePass | LifecycleKind::CaseFail | LifecycleKind::CaseSkip => {
                let (Some(status), Some(case)) = (event.kind.case_status(), event.case_name())
                else {
                    trace!("{} without a case name ignored", event.kind);
                    return false;
                };
                let suite = self.ensure(suite_name);
                let before = suite.case(case).map(|c| c.status);
                suite.record_case(case, status, event.duration_ms(), event.error_message());
                before != Some(status)
            }
            LifecycleKind::SuiteResult => {
                let suite = self.ensure(suite_name);
                let mut changed = false;
                if let Some(duration) = event.duration_ms() {
                    changed |= suite.duration_ms != Some(duration);
                    suite.duration_ms = Some(duration);
                }
                if let Some((passed, failed, skipped)) = event.reported_counts() {
                    changed |= suite.adopt_counts(passed, failed, skipped);
                }
                changed
            }
            LifecycleKind::Complete | LifecycleKind::Error => false,
        }
    }

    pub fn snapshot(&self) -> Vec<SuiteSnapshot> {
        self.suites.iter().map(SuiteState::snapshot).collect()
    }

    /// Snapshot and clear
    pub fn take(&mut self) -> Vec<SuiteSnapshot> {
        let snapshot = self.snapshot();
        self.suites.clear();
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CaseStatus;
    use serde_json::json;

    fn case(kind: LifecycleKind, suite: &str, name: &str) -> LifecycleEvent {
        LifecycleEvent::case(kind, "r", suite, name)
    }

    #[test]
    fn test_duplicate_case_counted_once() {
        let mut book = SuiteBook::new();
        let event = case(LifecycleKind::CasePass, "S", "a");
        assert!(book.apply(&event));
        assert!(!book.apply(&event));
        assert!(!book.apply(&event));

        let suite = book.suite("S").unwrap();
        assert_eq!(suite.passed(), 1);
        assert_eq!(suite.total(), 1);
        assert!(suite.is_consistent());
    }

    #[test]
    fn test_changed_status_moves_count() {
        let mut book = SuiteBook::new();
        book.apply(&case(LifecycleKind::CaseFail, "S", "a").with_field("error", "boom"));
        book.apply(&case(LifecycleKind::CasePass, "S", "a"));

        let suite = book.suite("S").unwrap();
        assert_eq!((suite.passed(), suite.failed(), suite.total()), (1, 0, 1));
        assert_eq!(suite.case("a").unwrap().status, CaseStatus::Passed);
    }

    #[test]
    fn test_total_stays_consistent_across_mixed_events() {
        let mut book = SuiteBook::new();
        let events = [
            case(LifecycleKind::CasePass, "S", "a"),
            case(LifecycleKind::CaseFail, "S", "b"),
            case(LifecycleKind::CaseSkip, "S", "c"),
            case(LifecycleKind::CaseFail, "S", "a"),
            case(LifecycleKind::CaseFail, "S", "b"),
            case(LifecycleKind::CasePass, "T", "a"),
        ];
        for event in &events {
            book.apply(event);
            for suite in book.snapshot() {
                assert_eq!(suite.total, suite.passed + suite.failed + suite.skipped);
            }
        }
        let s = book.suite("S").unwrap();
        assert_eq!((s.passed(), s.failed(), s.skipped(), s.total()), (0, 2, 1, 3));
    }

    #[test]
    fn test_plan_preregisters_empty_suites() {
        let mut book = SuiteBook::new();
        let plan = LifecycleEvent::new(LifecycleKind::Plan, "r")
            .with_payload(json!({"suites": ["A", "B"]}));
        assert!(book.apply(&plan));
        assert!(!book.apply(&plan));

        let snapshot = book.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "A");
        assert_eq!(snapshot[1].total, 0);
    }

    #[test]
    fn test_case_without_suite_uses_default() {
        let mut book = SuiteBook::new();
        let event = LifecycleEvent::new(LifecycleKind::CaseSkip, "r").with_field("case", "x");
        book.apply(&event);
        assert_eq!(book.suite(DEFAULT_SUITE).unwrap().skipped(), 1);

        let nameless = LifecycleEvent::new(LifecycleKind::CasePass, "r").with_field("suite", "S");
        assert!(!book.apply(&nameless));
        assert!(book.suite("S").is_none());
    }

    #[test]
    fn test_suite_result_counts_only_without_cases() {
        let mut book = SuiteBook::new();
        let summary = LifecycleEvent::new(LifecycleKind::SuiteResult, "r").with_payload(
            json!({"suite": "S", "passed": 4, "failed": 1, "duration_ms": 120}),
        );
        assert!(book.apply(&summary));
        let s = book.suite("S").unwrap();
        assert_eq!((s.passed(), s.failed(), s.total()), (4, 1, 5));
        assert_eq!(s.duration_ms, Some(120));

        let mut counted = SuiteBook::new();
        counted.apply(&case(LifecycleKind::CasePass, "S", "a"));
        counted.apply(&summary);
        let s = counted.suite("S").unwrap();
        assert_eq!((s.passed(), s.total()), (1, 1));
        assert_eq!(s.duration_ms, Some(120));
    }

    #[test]
    fn test_take_clears() {
        let mut book = SuiteBook::new();
        book.apply(&case(LifecycleKind::CasePass, "S", "a"));
        let taken = book.take();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].tests[0].name, "a");
        assert!(book.is_empty());
    }
}
