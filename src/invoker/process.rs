//! Subprocess invoker
//!
//! Runs a descriptor's command. Every stdout line that parses as a lifecycle
//! event is published on the run topic; other output is ignored. Events
//! without a reference are stamped with the invocation's correlation id.
//! A child still running when the invocation timeout elapses is killed.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::{InvocationError, InvocationHandle, InvokeOptions, Invoker};
use crate::bus::Publisher;
use crate::models::{LifecycleEvent, TestDescriptor};

const ENV_TEST_ID: &str = "TESTCOORD_TEST_ID";
const ENV_CORRELATION_ID: &str = "TESTCOORD_CORRELATION_ID";
const ENV_TOPIC: &str = "TESTCOORD_TOPIC";

/// Bound on waiting for the output pipes to close after the child exits
const OUTPUT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Trailing stderr bytes kept in the result
const STDERR_TAIL_BYTES: usize = 4096;

const STDERR_CHUNK_BYTES: usize = 1024;

type Outcome = Result<Value, InvocationError>;

/// Invoker that runs each test as a child process
#[derive(Clone, Debug, Default)]
pub struct ProcessInvoker {
    working_dir: Option<PathBuf>,
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn start_async(
        &self,
        test: &TestDescriptor,
        options: InvokeOptions,
    ) -> Result<Box<dyn InvocationHandle>, InvocationError> {
        let program = test
            .command
            .as_deref()
            .ok_or_else(|| InvocationError::MissingCommand(test.id.clone()))?;

        let mut command = Command::new(program);
        command
            .args(&test.args)
            .envs(&test.env)
            .env(ENV_TEST_ID, &test.id)
            .env(ENV_CORRELATION_ID, &options.correlation_id)
            .env(ENV_TOPIC, options.topic.topic())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| InvocationError::Start {
            test_id: test.id.clone(),
            message: e.to_string(),
        })?;
        debug!(
            "Started {} (pid {:?}) as {}",
            test.id,
            child.id(),
            options.correlation_id
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        tokio::spawn(supervise(
            child, stdout, stderr, options, cancel_rx, outcome_tx,
        ));

        Ok(Box::new(ProcessHandle {
            outcome_rx: Some(outcome_rx),
            outcome: None,
            cancel_tx: Some(cancel_tx),
        }))
    }
}

enum Exit {
    Exited(io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

async fn supervise(
    mut child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    options: InvokeOptions,
    mut cancel_rx: oneshot::Receiver<()>,
    outcome_tx: oneshot::Sender<Outcome>,
) {
    let forwarder = stdout.map(|out| {
        tokio::spawn(forward_events(
            out,
            options.topic.clone(),
            options.correlation_id.clone(),
        ))
    });
    let collector = stderr.map(|err| tokio::spawn(collect_tail(err)));

    // A dropped handle counts as a cancellation request.
    let exit = tokio::select! {
        status = child.wait() => Exit::Exited(status),
        _ = &mut cancel_rx => Exit::Cancelled,
        () = tokio::time::sleep(options.timeout) => Exit::TimedOut,
    };

    if matches!(exit, Exit::Cancelled | Exit::TimedOut) {
        debug!("Killing {}", options.correlation_id);
        if let Err(e) = child.kill().await {
            warn!("Failed to kill {}: {}", options.correlation_id, e);
        }
    }

    let published = match forwarder {
        Some(task) => tokio::time::timeout(OUTPUT_FLUSH_TIMEOUT, task)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or(0),
        None => 0,
    };
    let stderr_tail = match collector {
        Some(task) => tokio::time::timeout(OUTPUT_FLUSH_TIMEOUT, task)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default(),
        None => String::new(),
    };

    let outcome = match exit {
        Exit::Exited(Ok(status)) => {
            let mut result = json!({
                "exit_code": status.code(),
                "events": published,
            });
            if !stderr_tail.is_empty() {
                result["stderr"] = Value::String(stderr_tail);
            }
            if !status.success() {
                result["status"] = json!("failed");
                result["error"] = json!(format!("process exited with {status}"));
            }
            Ok(result)
        }
        Exit::Exited(Err(e)) => Err(InvocationError::Failed(e.to_string())),
        Exit::Cancelled => Err(InvocationError::Cancelled),
        Exit::TimedOut => Err(InvocationError::Failed(format!(
            "process timed out after {}",
            humantime::format_duration(options.timeout)
        ))),
    };

    // The handle may already be gone.
    let _ = outcome_tx.send(outcome);
}

async fn forward_events(stdout: ChildStdout, publisher: Publisher, correlation_id: String) -> usize {
    let mut lines = BufReader::new(stdout).lines();
    let mut published = 0;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if !line.starts_with('{') {
                    continue;
                }
                match serde_json::from_str::<LifecycleEvent>(line) {
                    Ok(mut event) => {
                        if event.correlation_ref.is_empty() {
                            event.correlation_ref = correlation_id.clone();
                        }
                        if publisher.publish(event) {
                            published += 1;
                        } else {
                            trace!("Topic closed, dropping event from {}", correlation_id);
                        }
                    }
                    Err(e) => trace!("Ignoring non-event output from {}: {}", correlation_id, e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Reading output of {} failed: {}", correlation_id, e);
                break;
            }
        }
    }

    published
}

/// Last [`STDERR_TAIL_BYTES`] of stderr, read in chunks
async fn collect_tail(mut stderr: ChildStderr) -> String {
    let mut tail = Vec::with_capacity(2 * STDERR_TAIL_BYTES);
    let mut chunk = [0u8; STDERR_CHUNK_BYTES];

    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > 2 * STDERR_TAIL_BYTES {
                    tail.drain(..tail.len() - STDERR_TAIL_BYTES);
                }
            }
            Err(e) => {
                trace!("Reading stderr failed: {}", e);
                break;
            }
        }
    }

    let start = tail.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&tail[start..]).trim().to_string()
}

struct ProcessHandle {
    outcome_rx: Option<oneshot::Receiver<Outcome>>,
    outcome: Option<Outcome>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

#[async_trait]
impl InvocationHandle for ProcessHandle {
    async fn ready(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        let Some(rx) = self.outcome_rx.as_mut() else {
            return;
        };
        let outcome = rx.await.unwrap_or_else(|_| {
            Err(InvocationError::Failed(
                "process supervisor exited without a result".to_string(),
            ))
        });
        self.outcome = Some(outcome);
        self.outcome_rx = None;
    }

    async fn result(&mut self) -> Result<Value, InvocationError> {
        self.ready().await;
        self.outcome
            .clone()
            .unwrap_or_else(|| Err(InvocationError::Failed("no result available".to_string())))
    }

    fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}
