//! Background event listener
//!
//! A single task drains the run topic for the whole run. It owns the
//! correlator and every suite book, and talks to the dispatcher only through
//! channels. Registrations and finish notices come in on the control
//! channel; completions and abandon acknowledgements go back on oneshots.
//! The final report is returned through the task's join handle.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::aggregator::SuiteBook;
use super::correlator::{Correlator, Resolution};
use crate::bus::Inbox;
use crate::models::{ExecutionStatus, LifecycleEvent, LifecycleKind, SuiteSnapshot};

/// Upper bound on events processed in one drain pass
const MAX_DRAIN_EVENTS: usize = 10_000;

/// Bucket key for unmatched events without a candidate id
pub const UNKNOWN_KEY: &str = "<unknown>";

/// Completion signal for one execution
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    /// Status reported by the completion event, if recognizable
    pub status: Option<ExecutionStatus>,
    pub error: Option<String>,
    pub suites: Vec<SuiteSnapshot>,
}

/// An event as seen by the listener, with the test it was attributed to
#[derive(Clone, Debug)]
pub struct TappedEvent {
    pub event: LifecycleEvent,
    pub test_id: Option<String>,
}

/// What the listener hands back when it stops
#[derive(Debug, Default)]
pub struct ListenerReport {
    /// Suite detail finalized without a completion reaching the dispatcher
    pub finalized: HashMap<String, Vec<SuiteSnapshot>>,
    /// Events no execution could claim, keyed by candidate test id
    pub unmatched: BTreeMap<String, Vec<LifecycleEvent>>,
    /// Suites built from unmatched events
    pub orphan_suites: Vec<SuiteSnapshot>,
    pub events_seen: usize,
}

impl ListenerReport {
    pub fn unmatched_count(&self) -> usize {
        self.unmatched.values().map(Vec::len).sum()
    }
}

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("event listener did not drain within {}", humantime::format_duration(*.0))]
    DrainTimeout(Duration),

    #[error("event listener task failed: {0}")]
    Crashed(String),
}

enum Control {
    Register {
        test_id: String,
        correlation_id: String,
        completion: oneshot::Sender<Completion>,
    },
    Finish {
        correlation_id: String,
        /// Acknowledged once the execution is settled
        ack: Option<oneshot::Sender<()>>,
    },
}

/// A finish notice taken off the control channel
type FinishNotice = (String, Option<oneshot::Sender<()>>);

/// Dispatcher-side handle to the running listener
pub struct ListenerHandle {
    control: mpsc::UnboundedSender<Control>,
    done: oneshot::Sender<()>,
    task: JoinHandle<ListenerReport>,
}

impl ListenerHandle {
    /// Announce an execution before it starts. The receiver resolves when its
    /// completion event is correlated.
    pub fn register(&self, test_id: &str, correlation_id: &str) -> oneshot::Receiver<Completion> {
        let (tx, rx) = oneshot::channel();
        let control = Control::Register {
            test_id: test_id.to_string(),
            correlation_id: correlation_id.to_string(),
            completion: tx,
        };
        if self.control.send(control).is_err() {
            warn!("Event listener is gone; {} will not be correlated", correlation_id);
        }
        rx
    }

    /// The dispatcher is done with this execution
    pub fn finish(&self, correlation_id: &str) {
        let control = Control::Finish {
            correlation_id: correlation_id.to_string(),
            ack: None,
        };
        if self.control.send(control).is_err() {
            debug!("Event listener is gone; finish for {} dropped", correlation_id);
        }
    }

    /// Settle an execution that is about to be cancelled. Events already on
    /// the topic are still attributed to it; anything published after the
    /// receiver resolves is treated as stray.
    pub fn abandon(&self, correlation_id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let control = Control::Finish {
            correlation_id: correlation_id.to_string(),
            ack: Some(tx),
        };
        if self.control.send(control).is_err() {
            debug!("Event listener is gone; abandon for {} dropped", correlation_id);
        }
        rx
    }

    /// Signal the listener to stop and wait for it to drain
    pub async fn shutdown(self, drain_timeout: Duration) -> Result<ListenerReport, ListenerError> {
        let _ = self.done.send(());
        let mut task = self.task;

        match tokio::time::timeout(drain_timeout, &mut task).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(ListenerError::Crashed(e.to_string())),
            Err(_) => {
                task.abort();
                Err(ListenerError::DrainTimeout(drain_timeout))
            }
        }
    }
}

#[cfg(test)]
impl ListenerHandle {
    /// A handle whose task never finishes. The receiver resolves once the
    /// task has been dropped.
    pub(crate) fn stalled() -> (Self, oneshot::Receiver<()>) {
        let (control, _) = mpsc::unbounded_channel();
        let (done, _) = oneshot::channel();
        let (dropped_tx, dropped_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _dropped = dropped_tx;
            std::future::pending::<ListenerReport>().await
        });
        (Self { control, done, task }, dropped_rx)
    }
}

/// The listener task state
pub struct EventListener {
    inbox: Inbox,
    inbox_closed: bool,
    control: mpsc::UnboundedReceiver<Control>,
    correlator: Correlator,
    books: HashMap<String, SuiteBook>,
    orphans: SuiteBook,
    waiters: HashMap<String, oneshot::Sender<Completion>>,
    tap: Option<mpsc::UnboundedSender<TappedEvent>>,
    report: ListenerReport,
}

impl EventListener {
    /// Start draining `inbox` on a new task. Every event is also forwarded to
    /// `tap` when one is given.
    pub fn spawn(inbox: Inbox, tap: Option<mpsc::UnboundedSender<TappedEvent>>) -> ListenerHandle {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        let listener = Self {
            inbox,
            inbox_closed: false,
            control: control_rx,
            correlator: Correlator::new(),
            books: HashMap::new(),
            orphans: SuiteBook::new(),
            waiters: HashMap::new(),
            tap,
            report: ListenerReport::default(),
        };
        let task = tokio::spawn(listener.run(done_rx));

        ListenerHandle {
            control: control_tx,
            done: done_tx,
            task,
        }
    }

    async fn run(mut self, mut done: oneshot::Receiver<()>) -> ListenerReport {
        debug!("Listening on topic {}", self.inbox.topic());

        loop {
            tokio::select! {
                biased;

                control = self.control.recv() => match control {
                    Some(control) => self.on_control(control),
                    None => break,
                },
                _ = &mut done => break,
                event = self.inbox.recv(), if !self.inbox_closed => match event {
                    Some(event) => self.on_event(event),
                    None => self.inbox_closed = true,
                },
            }
        }

        self.shutdown()
    }

    fn on_control(&mut self, control: Control) {
        match control {
            Control::Register {
                test_id,
                correlation_id,
                completion,
            } => self.register(&test_id, correlation_id, completion),
            Control::Finish { correlation_id, ack } => {
                // Events published before the finish notice may still be
                // buffered; they belong to the execution being finished.
                let finishes = self.take_queued_controls(vec![(correlation_id, ack)]);
                self.drain_buffered();
                self.finalize_all(finishes);
            }
        }
    }

    fn finalize_all(&mut self, finishes: Vec<FinishNotice>) {
        for (correlation_id, ack) in finishes {
            self.finalize(&correlation_id);
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
        }
    }

    fn register(
        &mut self,
        test_id: &str,
        correlation_id: String,
        completion: oneshot::Sender<Completion>,
    ) {
        trace!("Registered {} as {}", test_id, correlation_id);
        self.correlator.register(test_id, &correlation_id);
        self.books.entry(correlation_id.clone()).or_default();
        self.waiters.insert(correlation_id, completion);
    }

    /// Apply queued registrations now and collect queued finish notices
    fn take_queued_controls(&mut self, mut finishes: Vec<FinishNotice>) -> Vec<FinishNotice> {
        while let Ok(control) = self.control.try_recv() {
            match control {
                Control::Register {
                    test_id,
                    correlation_id,
                    completion,
                } => self.register(&test_id, correlation_id, completion),
                Control::Finish { correlation_id, ack } => finishes.push((correlation_id, ack)),
            }
        }
        finishes
    }

    fn drain_buffered(&mut self) {
        for _ in 0..MAX_DRAIN_EVENTS {
            match self.inbox.try_recv() {
                Some(event) => self.on_event(event),
                None => return,
            }
        }
        warn!("Stopped draining after {} buffered events", MAX_DRAIN_EVENTS);
    }

    fn on_event(&mut self, event: LifecycleEvent) {
        self.report.events_seen += 1;
        let resolution = self.correlator.resolve(&event);

        if let Some(tap) = &self.tap {
            let test_id = match &resolution {
                Resolution::Pending(corr) | Resolution::Settled(corr) => {
                    self.correlator.test_id(corr).map(str::to_string)
                }
                Resolution::Unmatched(candidate) => candidate.clone(),
            };
            let _ = tap.send(TappedEvent {
                event: event.clone(),
                test_id,
            });
        }

        match resolution {
            Resolution::Pending(corr) if event.kind.is_terminal() => self.complete(&corr, &event),
            Resolution::Pending(corr) => {
                self.books.entry(corr).or_default().apply(&event);
            }
            Resolution::Settled(corr) if event.kind == LifecycleKind::Complete => {
                debug!("Ignoring repeated completion for {}", corr);
            }
            Resolution::Settled(corr) => {
                debug!("Stray {} for settled {}", event.kind, corr);
                let key = self
                    .correlator
                    .test_id(&corr)
                    .map(str::to_string)
                    .unwrap_or(corr);
                self.file_unmatched(key, event);
            }
            Resolution::Unmatched(candidate) => {
                warn!(
                    "Could not correlate {} with reference {:?}",
                    event.kind, event.correlation_ref
                );
                if event.kind.is_suite_event() {
                    self.orphans.apply(&event);
                }
                let key = candidate.unwrap_or_else(|| UNKNOWN_KEY.to_string());
                self.file_unmatched(key, event);
            }
        }
    }

    fn file_unmatched(&mut self, key: String, event: LifecycleEvent) {
        self.report.unmatched.entry(key).or_default().push(event);
    }

    fn complete(&mut self, correlation_id: &str, event: &LifecycleEvent) {
        let status = match event.kind {
            LifecycleKind::Error => Some(ExecutionStatus::Error),
            _ => event
                .reported_status()
                .and_then(ExecutionStatus::from_reported),
        };
        let completion = Completion {
            status,
            error: event.error_message().map(str::to_string),
            suites: self
                .books
                .remove(correlation_id)
                .map(|book| book.snapshot())
                .unwrap_or_default(),
        };
        debug!(
            "Completion for {}: {:?} with {} suites",
            correlation_id,
            completion.status,
            completion.suites.len()
        );

        self.correlator.settle(correlation_id);
        let Some(waiter) = self.waiters.remove(correlation_id) else {
            return;
        };
        if let Err(completion) = waiter.send(completion) {
            // The dispatcher stopped waiting; keep the detail for assembly.
            self.report
                .finalized
                .insert(correlation_id.to_string(), completion.suites);
        }
    }

    fn finalize(&mut self, correlation_id: &str) {
        self.waiters.remove(correlation_id);
        if !self.correlator.settle(correlation_id) {
            return;
        }
        if let Some(book) = self.books.remove(correlation_id) {
            if !book.is_empty() {
                trace!("Finalized {} without a completion", correlation_id);
                self.report
                    .finalized
                    .insert(correlation_id.to_string(), book.snapshot());
            }
        }
    }

    fn shutdown(mut self) -> ListenerReport {
        self.inbox.close();
        let finishes = self.take_queued_controls(Vec::new());
        self.drain_buffered();
        self.finalize_all(finishes);

        for (correlation_id, book) in self.books.drain() {
            if !book.is_empty() {
                self.report
                    .finalized
                    .entry(correlation_id)
                    .or_insert_with(|| book.snapshot());
            }
        }
        self.report.orphan_suites = self.orphans.take();

        let outstanding = self.correlator.outstanding();
        if outstanding > 0 {
            warn!("{} executions were never finished", outstanding);
        }
        info!(
            "Event listener stopped after {} events ({} unmatched)",
            self.report.events_seen,
            self.report.unmatched_count()
        );
        self.report
    }
}
