//! Sequential execution dispatcher
//!
//! Starts one test at a time, races its start and readiness against the
//! per-test timeout, then reconciles the invocation result with the completion the
//! listener may have correlated. The dispatcher is the only writer of
//! execution status and timing.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::listener::{Completion, ListenerHandle};
use super::waiter::await_completion;
use super::CoordinatorConfig;
use crate::bus::Publisher;
use crate::invoker::{InvocationError, InvokeOptions, Invoker};
use crate::models::{ExecutionHandle, ExecutionStatus, TestDescriptor};
use crate::utils::timer::Timer;

/// Fresh run identifier, `run-<8 hex digits>`
pub fn new_run_id() -> String {
    format!("run-{:08x}", rand::random::<u32>())
}

enum Readiness {
    Ready,
    TimedOut,
}

/// Final status decided for one execution
#[derive(Clone, Debug, PartialEq)]
struct Verdict {
    status: ExecutionStatus,
    error: Option<String>,
    assumed: bool,
}

/// Decide the terminal status from the invocation result and completion.
///
/// An explicit `status` in the result wins, then the completion's status,
/// then passed by default.
fn reconcile(result: &Result<Value, InvocationError>, completion: Option<&Completion>) -> Verdict {
    let completion_error = completion.and_then(|c| c.error.clone());

    let value = match result {
        Ok(value) => value,
        Err(e) => {
            return Verdict {
                status: ExecutionStatus::Failed,
                error: Some(e.to_string()),
                assumed: false,
            }
        }
    };

    let result_error = value
        .get("error")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);
    let explicit = value
        .get("status")
        .and_then(Value::as_str)
        .and_then(ExecutionStatus::from_reported);

    if let Some(status) = explicit {
        return Verdict {
            status,
            error: result_error.or(completion_error).filter(|_| status.is_failure()),
            assumed: false,
        };
    }

    if let Some(status) = completion.and_then(|c| c.status) {
        return Verdict {
            status,
            error: completion_error.or(result_error).filter(|_| status.is_failure()),
            assumed: false,
        };
    }

    Verdict {
        status: ExecutionStatus::Passed,
        error: None,
        assumed: true,
    }
}

/// Dispatches tests one after another
pub struct Dispatcher {
    invoker: Arc<dyn Invoker>,
    publisher: Publisher,
    run_id: String,
    test_timeout: Duration,
    completion_wait: Duration,
    drain_timeout: Duration,
}

impl Dispatcher {
    pub fn new(invoker: Arc<dyn Invoker>, publisher: Publisher, config: &CoordinatorConfig) -> Self {
        Self {
            invoker,
            publisher,
            run_id: new_run_id(),
            test_timeout: config.test_timeout,
            completion_wait: config.completion_wait,
            drain_timeout: config.drain_timeout,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Correlation id announced for the `ordinal`-th dispatch
    pub fn correlation_id(&self, ordinal: usize, test_id: &str) -> String {
        format!("{}:{}:{}", self.run_id, ordinal, test_id)
    }

    /// Dispatch every test in order; one handle per test, all terminal
    pub async fn dispatch_all(
        &self,
        tests: &[TestDescriptor],
        listener: &ListenerHandle,
    ) -> Vec<ExecutionHandle> {
        info!("Dispatching {} tests ({})", tests.len(), self.run_id);

        let mut handles = Vec::with_capacity(tests.len());
        for (ordinal, test) in tests.iter().enumerate() {
            let handle = self.dispatch_one(ordinal, test, listener).await;
            info!("{}", handle);
            debug!(
                started = ?handle.start_time,
                finished = ?handle.end_time,
                result = ?handle.raw_result,
                "{}",
                handle.correlation_id
            );
            handles.push(handle);
        }
        handles
    }

    pub async fn dispatch_one(
        &self,
        ordinal: usize,
        test: &TestDescriptor,
        listener: &ListenerHandle,
    ) -> ExecutionHandle {
        let correlation_id = self.correlation_id(ordinal, &test.id);
        let mut handle = ExecutionHandle::new(&test.id, &correlation_id);
        let completion = listener.register(&test.id, &correlation_id);

        let timer = Timer::start(format!("{} ({})", test.id, correlation_id));
        let deadline = timer.deadline(self.test_timeout);
        handle.mark_running();
        info!("Running {}", test);

        let options = InvokeOptions {
            correlation_id: correlation_id.clone(),
            topic: self.publisher.clone(),
            timeout: self.test_timeout,
        };
        let started = time::timeout_at(deadline, self.invoker.start_async(test, options)).await;
        let mut invocation = match started {
            Ok(Ok(invocation)) => invocation,
            Ok(Err(e)) => {
                error!("Failed to start {}: {}", test.id, e);
                handle.error = Some(e.to_string());
                handle.settle(ExecutionStatus::Error, timer.stop());
                listener.finish(&correlation_id);
                return handle;
            }
            Err(_) => {
                warn!("{} did not start within {}", test.id, self.limit());
                self.time_out(&mut handle, timer.stop());
                listener.finish(&correlation_id);
                return handle;
            }
        };

        let readiness = tokio::select! {
            () = invocation.ready() => Readiness::Ready,
            () = time::sleep_until(deadline) => Readiness::TimedOut,
        };
        let elapsed = timer.stop();

        match readiness {
            Readiness::TimedOut => {
                warn!("{} timed out after {}, cancelling", test.id, self.limit());
                // Settle the correlation first; whatever the cancellation
                // provokes is stray.
                drop(completion);
                self.abandon(listener, &correlation_id).await;
                invocation.cancel();
                self.time_out(&mut handle, elapsed);
            }
            Readiness::Ready => {
                let result = invocation.result().await;
                let completion = await_completion(completion, self.completion_wait).await;
                let verdict = reconcile(&result, completion.as_ref());

                if verdict.assumed {
                    warn!(
                        "{} reported no status; assuming passed",
                        test.id
                    );
                }
                handle.status_assumed = verdict.assumed;
                handle.error = verdict.error;
                handle.raw_result = result.ok();
                if let Some(completion) = completion {
                    handle.suites = completion.suites;
                }
                handle.settle(verdict.status, elapsed);
            }
        }

        listener.finish(&correlation_id);
        handle
    }

    fn limit(&self) -> humantime::FormattedDuration {
        humantime::format_duration(self.test_timeout)
    }

    fn time_out(&self, handle: &mut ExecutionHandle, elapsed: Duration) {
        handle.error = Some(format!("timed out after {}", self.limit()));
        handle.settle(ExecutionStatus::Timeout, elapsed);
    }

    /// Wait until the listener has flushed and settled `correlation_id`
    async fn abandon(&self, listener: &ListenerHandle, correlation_id: &str) {
        let settled = listener.abandon(correlation_id);
        if time::timeout(self.drain_timeout, settled).await.is_err() {
            warn!(
                "Event listener did not settle {} within {}",
                correlation_id,
                humantime::format_duration(self.drain_timeout)
            );
        }
    }
}
