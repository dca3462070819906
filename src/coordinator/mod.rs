//! Test execution coordination
//!
//! A run resolves tests from the catalog, dispatches them one at a time and,
//! concurrently, drains the run topic on a background listener that
//! correlates lifecycle events back to their executions. Once every test is
//! settled the listener is stopped and the report assembled.

mod aggregator;
mod correlator;
mod dispatcher;
mod error;
mod listener;
mod resolver;
mod waiter;

#[cfg(test)]
pub(crate) mod testing;

pub use error::CoordinatorError;
pub use listener::{ListenerReport, TappedEvent};

use dispatcher::Dispatcher;
use listener::{EventListener, ListenerHandle};

use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bus::Topic;
use crate::catalog::Catalog;
use crate::invoker::Invoker;
use crate::models::{ExecutionHandle, SelectionCriteria, TestDescriptor};
use crate::output::stream::{self, StreamFrame};
use crate::results::{self, RunReport};
use crate::utils::timer::{Phase, Stopwatch};

pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_COMPLETION_WAIT: Duration = Duration::from_secs(2);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_TOPIC: &str = "testcoord.events";

/// Run timing configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Upper bound on a single test reaching readiness
    #[serde(with = "humantime_serde")]
    pub test_timeout: Duration,

    /// How long to wait for a trailing completion event after readiness
    #[serde(with = "humantime_serde")]
    pub completion_wait: Duration,

    /// How long the listener may take to drain once dispatch is over
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,

    /// Name of the run topic
    pub topic: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            test_timeout: DEFAULT_TEST_TIMEOUT,
            completion_wait: DEFAULT_COMPLETION_WAIT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            topic: DEFAULT_TOPIC.to_string(),
        }
    }
}

/// Drives one run over an injected catalog, invoker and topic
pub struct Coordinator {
    catalog: Arc<dyn Catalog>,
    invoker: Arc<dyn Invoker>,
    topic: Topic,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        invoker: Arc<dyn Invoker>,
        topic: Topic,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            catalog,
            invoker,
            topic,
            config,
        }
    }

    /// Resolve matching tests without dispatching them
    pub async fn discover(
        &self,
        criteria: &SelectionCriteria,
    ) -> Result<Vec<TestDescriptor>, CoordinatorError> {
        resolver::resolve(self.catalog.as_ref(), criteria).await
    }

    /// Run every matching test and assemble the report
    pub async fn try_run(self, criteria: &SelectionCriteria) -> Result<RunReport, CoordinatorError> {
        self.execute(criteria, None).await
    }

    /// Like [`Coordinator::try_run`], but run-level failures become a failed report
    pub async fn run(self, criteria: &SelectionCriteria) -> RunReport {
        match self.try_run(criteria).await {
            Ok(report) => report,
            Err(e) if e.is_selection_error() => {
                warn!("Nothing to run: {}", e);
                RunReport::failure(&e)
            }
            Err(e) => {
                error!("Run aborted: {}", e);
                RunReport::failure(&e)
            }
        }
    }

    /// Run while writing every lifecycle event to `writer` as it arrives,
    /// one JSON object per line, followed by a summary line.
    pub async fn run_streaming<W>(
        self,
        criteria: &SelectionCriteria,
        writer: W,
    ) -> Result<RunReport, CoordinatorError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tap_tx, tap_rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(stream::forward_events(tap_rx, writer));

        let outcome = self.execute(criteria, Some(tap_tx)).await;

        let mut writer = forwarder.await.map_err(io::Error::other)??;
        let summary = match &outcome {
            Ok(report) => StreamFrame::summary(report),
            Err(e) => StreamFrame::summary(&RunReport::failure(e)),
        };
        stream::write_frame(&mut writer, &summary).await?;
        outcome
    }

    async fn execute(
        mut self,
        criteria: &SelectionCriteria,
        tap: Option<mpsc::UnboundedSender<TappedEvent>>,
    ) -> Result<RunReport, CoordinatorError> {
        let mut stopwatch = Stopwatch::new();

        let tests = resolver::resolve(self.catalog.as_ref(), criteria).await?;
        stopwatch.finish(Phase::Resolve);

        let inbox = self
            .topic
            .subscribe()
            .ok_or_else(|| CoordinatorError::TopicInUse(self.topic.name().to_string()))?;
        let listener = EventListener::spawn(inbox, tap);

        let dispatcher = Dispatcher::new(
            self.invoker.clone(),
            self.topic.publisher(),
            &self.config,
        );
        info!("Starting run {} on topic {}", dispatcher.run_id(), self.topic.name());
        let handles = dispatcher.dispatch_all(&tests, &listener).await;
        stopwatch.finish(Phase::Dispatch);

        let report = conclude(&tests, handles, listener, self.config.drain_timeout).await;
        stopwatch.finish(Phase::Drain);

        debug!("Run {} phases: {}", dispatcher.run_id(), stopwatch);
        info!("{}", report.summary());
        Ok(report)
    }
}

/// Stop the listener and assemble the report. Every handle is reported even
/// when the listener does not drain in time.
async fn conclude(
    tests: &[TestDescriptor],
    handles: Vec<ExecutionHandle>,
    listener: ListenerHandle,
    drain_timeout: Duration,
) -> RunReport {
    let mut warnings = Vec::new();
    let listener_report = match listener.shutdown(drain_timeout).await {
        Ok(report) => Some(report),
        Err(e) => {
            warn!("{}", e);
            warnings.push(e.to_string());
            None
        }
    };
    results::assemble(tests, handles, listener_report, warnings)
}

#[cfg(test)]
mod tests {
    use super::testing::{Script, ScriptedInvoker, CORR};
    use super::*;
    use crate::catalog::LocalCatalog;
    use crate::invoker::InvocationError;
    use crate::models::{ExecutionStatus, LifecycleEvent, LifecycleKind};
    use crate::results::RunStatus;
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            test_timeout: Duration::from_secs(1),
            completion_wait: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(2),
            topic: "coordinator-test".to_string(),
        }
    }

    fn smoke(ids: &[&str]) -> Arc<LocalCatalog> {
        Arc::new(LocalCatalog::from_descriptors(
            ids.iter().map(|id| TestDescriptor::new(*id).with_group("smoke")),
        ))
    }

    fn coordinator(ids: &[&str], invoker: &ScriptedInvoker) -> Coordinator {
        Coordinator::new(
            smoke(ids),
            Arc::new(invoker.clone()),
            Topic::new("coordinator-test"),
            config(),
        )
    }

    fn criteria() -> SelectionCriteria {
        SelectionCriteria::new().group("smoke")
    }

    #[tokio::test]
    async fn test_all_pass_without_events() {
        let invoker = ScriptedInvoker::new();
        let report = coordinator(&["a", "b", "c"], &invoker)
            .try_run(&criteria())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.tests_total, 3);
        assert_eq!(report.tests_completed, 3);
        assert_eq!(report.tests_passed, 3);
        assert_eq!(report.tests_failed, 0);
        assert_eq!(report.status, RunStatus::Passed);
        assert_eq!(report.test_results.len(), 3);
        // no status was reported anywhere, so each pass is flagged
        assert_eq!(report.warnings.len(), 3);
        assert_eq!(invoker.started().len(), 3);
    }

    #[tokio::test]
    async fn test_case_failure_detail() {
        let invoker = ScriptedInvoker::new().script(
            "login",
            Script::passing()
                .event(LifecycleEvent::case(LifecycleKind::CaseFail, CORR, "S", "x"))
                .trailing(LifecycleEvent::complete(CORR, "failed")),
        );
        let report = coordinator(&["login"], &invoker)
            .try_run(&criteria())
            .await
            .unwrap();

        let result = &report.test_results[0];
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.suites.len(), 1);
        let suite = &result.suites[0];
        assert_eq!(suite.name, "S");
        assert_eq!((suite.failed, suite.total), (1, 1));
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.tests_failed, 1);
    }

    #[tokio::test]
    async fn test_no_match_dispatches_nothing() {
        let invoker = ScriptedInvoker::new();
        let report = coordinator(&["a"], &invoker)
            .run(&SelectionCriteria::new().group("nightly"))
            .await;

        assert!(!report.success);
        assert!(report.error.as_deref().unwrap().contains("no tests found"));
        assert_eq!(report.tests_total, 0);
        assert!(invoker.started().is_empty());
    }

    #[tokio::test]
    async fn test_empty_selection_is_rejected() {
        let invoker = ScriptedInvoker::new();
        let err = coordinator(&["a"], &invoker)
            .try_run(&SelectionCriteria::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidSelection));
        assert!(invoker.started().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_cancels_and_run_continues() {
        let invoker = ScriptedInvoker::new()
            .script(
                "hang",
                Script::hanging()
                    .after_cancel(LifecycleEvent::case(LifecycleKind::CasePass, CORR, "S", "late")),
            )
            .script("ok", Script::passing().result(Ok(json!({"status": "passed"}))));
        let report = coordinator(&["hang", "ok"], &invoker)
            .try_run(&criteria())
            .await
            .unwrap();

        assert_eq!(report.tests_completed, 2);
        assert_eq!(report.tests_failed, 1);
        assert_eq!(report.tests_passed, 1);
        let hung = report.test_results.iter().find(|r| r.id == "hang").unwrap();
        assert_eq!(hung.status, ExecutionStatus::Timeout);
        assert!(hung.error.as_deref().unwrap().contains("timed out after 1s"));
        // the event published on cancellation is not credited to the timed-out test
        assert!(hung.suites.is_empty());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("could not be attributed") && w.contains("hang")));

        let cancelled = invoker.cancelled();
        assert_eq!(cancelled.len(), 1);
        assert!(cancelled[0].ends_with(":0:hang"));
    }

    #[tokio::test]
    async fn test_start_that_never_returns_times_out() {
        let invoker = ScriptedInvoker::new()
            .script("stuck", Script::never_starts())
            .script("ok", Script::passing().result(Ok(json!({"status": "passed"}))));
        let report = coordinator(&["stuck", "ok"], &invoker)
            .try_run(&criteria())
            .await
            .unwrap();

        assert_eq!(report.tests_completed, 2);
        let stuck = report.test_results.iter().find(|r| r.id == "stuck").unwrap();
        assert_eq!(stuck.status, ExecutionStatus::Timeout);
        assert_eq!(stuck.error.as_deref(), Some("timed out after 1s"));
        assert!(stuck.duration >= 1000);
        let ok = report.test_results.iter().find(|r| r.id == "ok").unwrap();
        assert_eq!(ok.status, ExecutionStatus::Passed);
        assert_eq!(invoker.started().len(), 2);
        assert!(invoker.cancelled().is_empty());
    }

    #[tokio::test]
    async fn test_drain_timeout_keeps_every_result() {
        let tests: Vec<_> = ["a", "b"].iter().map(|id| TestDescriptor::new(*id)).collect();
        let handles = tests
            .iter()
            .enumerate()
            .map(|(ordinal, test)| {
                let mut handle = ExecutionHandle::new(&test.id, format!("run-1:{ordinal}:{}", test.id));
                handle.mark_running();
                handle.settle(ExecutionStatus::Passed, Duration::from_millis(5));
                handle
            })
            .collect();
        let (listener, dropped) = ListenerHandle::stalled();

        let report = conclude(&tests, handles, listener, Duration::from_millis(50)).await;
        assert!(report.success);
        assert_eq!(report.tests_completed, 2);
        assert_eq!(report.test_results.len(), 2);
        assert_eq!(report.warnings, vec!["event listener did not drain within 50ms"]);
        assert!(tokio::time::timeout(Duration::from_secs(2), dropped).await.is_ok());
    }

    #[tokio::test]
    async fn test_start_failure_is_error() {
        let invoker = ScriptedInvoker::new()
            .script("broken", Script::start_failure("no such binary"));
        let report = coordinator(&["broken", "fine"], &invoker)
            .try_run(&criteria())
            .await
            .unwrap();

        let broken = report.test_results.iter().find(|r| r.id == "broken").unwrap();
        assert_eq!(broken.status, ExecutionStatus::Error);
        assert!(broken.error.as_deref().unwrap().contains("no such binary"));
        assert_eq!(report.tests_completed, 2);
        assert_eq!(report.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_result_error_and_explicit_status() {
        let invoker = ScriptedInvoker::new()
            .script(
                "errs",
                Script::passing().result(Err(InvocationError::Failed("segfault".into()))),
            )
            .script(
                "fails",
                Script::passing()
                    .result(Ok(json!({"status": "failed"})))
                    .trailing(LifecycleEvent::complete(CORR, "passed")),
            );
        let report = coordinator(&["errs", "fails"], &invoker)
            .try_run(&criteria())
            .await
            .unwrap();

        for result in &report.test_results {
            assert_eq!(result.status, ExecutionStatus::Failed, "{}", result.id);
        }
        let errs = report.test_results.iter().find(|r| r.id == "errs").unwrap();
        assert_eq!(errs.error.as_deref(), Some("segfault"));
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_events_counted_once() {
        let pass = LifecycleEvent::case(LifecycleKind::CasePass, CORR, "S", "a");
        let invoker = ScriptedInvoker::new().script(
            "dup",
            Script::passing()
                .event(pass.clone())
                .event(pass.clone())
                .event(LifecycleEvent::case(LifecycleKind::CaseSkip, CORR, "S", "b"))
                .trailing(pass)
                .trailing(LifecycleEvent::complete(CORR, "passed")),
        );
        let report = coordinator(&["dup"], &invoker)
            .try_run(&criteria())
            .await
            .unwrap();

        let suite = &report.test_results[0].suites[0];
        assert_eq!((suite.passed, suite.skipped, suite.total), (1, 1, 2));
        assert_eq!(report.status, RunStatus::Passed);
    }

    #[tokio::test]
    async fn test_events_after_completion_become_warnings() {
        let invoker = ScriptedInvoker::new().script(
            "noisy",
            Script::passing()
                .trailing(LifecycleEvent::complete(CORR, "passed"))
                .trailing(LifecycleEvent::case(LifecycleKind::CasePass, CORR, "S", "late")),
        );
        let report = coordinator(&["noisy"], &invoker)
            .try_run(&criteria())
            .await
            .unwrap();

        assert_eq!(report.test_results[0].status, ExecutionStatus::Passed);
        assert!(report.test_results[0].suites.is_empty());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("could not be attributed")));
    }

    #[tokio::test]
    async fn test_results_sorted_by_duration() {
        let invoker = ScriptedInvoker::new()
            .script("slow", Script::passing().delay(Duration::from_millis(150)))
            .script("fast", Script::passing().delay(Duration::from_millis(5)))
            .script("mid", Script::passing().delay(Duration::from_millis(60)));
        let report = coordinator(&["slow", "fast", "mid"], &invoker)
            .try_run(&criteria())
            .await
            .unwrap();

        let ids: Vec<_> = report.test_results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["fast", "mid", "slow"]);
        assert!(report
            .test_results
            .windows(2)
            .all(|w| w[0].duration <= w[1].duration));
    }

    #[tokio::test]
    async fn test_streaming_writes_events_then_summary() {
        let invoker = ScriptedInvoker::new().script(
            "login",
            Script::passing()
                .event(LifecycleEvent::case(LifecycleKind::CasePass, CORR, "S", "a"))
                .trailing(LifecycleEvent::complete(CORR, "passed")),
        );
        let (writer, mut reader) = tokio::io::duplex(64 * 1024);
        let report = coordinator(&["login"], &invoker)
            .run_streaming(&criteria(), writer)
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Passed);

        let mut output = String::new();
        reader.read_to_string(&mut output).await.unwrap();
        let frames: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0]["type"], "test:case_pass");
        assert_eq!(frames[0]["data"]["test_id"], "login");
        assert_eq!(frames[1]["type"], "test:complete");
        assert_eq!(frames[2]["type"], "test:summary");
        assert_eq!(frames[2]["data"]["status"], "passed");
        assert_eq!(frames[2]["data"]["total"], 1);
    }

    #[tokio::test]
    async fn test_streaming_failure_still_summarizes() {
        let invoker = ScriptedInvoker::new();
        let (writer, mut reader) = tokio::io::duplex(4096);
        let err = coordinator(&["a"], &invoker)
            .run_streaming(&SelectionCriteria::new().tag("none"), writer)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NoMatch(_)));

        let mut output = String::new();
        reader.read_to_string(&mut output).await.unwrap();
        let summary: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(summary["type"], "test:summary");
        assert_eq!(summary["data"]["status"], "failed");
        assert!(summary["data"]["error"]
            .as_str()
            .unwrap()
            .contains("no tests found"));
    }

    #[test]
    fn test_config_human_durations() {
        let config: CoordinatorConfig =
            serde_yaml::from_str("test_timeout: 90s\ncompletion_wait: 500ms\n").unwrap();
        assert_eq!(config.test_timeout, Duration::from_secs(90));
        assert_eq!(config.completion_wait, Duration::from_millis(500));
        assert_eq!(config.drain_timeout, DEFAULT_DRAIN_TIMEOUT);
        assert_eq!(config.topic, DEFAULT_TOPIC);
    }
}
