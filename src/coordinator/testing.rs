//! Scripted invoker for coordinator tests
//!
//! Each test id maps to a [`Script`]. Event references may contain the
//! `{corr}` placeholder, replaced with the correlation id at publish time.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::bus::Publisher;
use crate::invoker::{InvocationError, InvocationHandle, InvokeOptions, Invoker};
use crate::models::{LifecycleEvent, TestDescriptor};

pub const CORR: &str = "{corr}";

#[derive(Clone, Debug)]
pub struct Script {
    pub start_error: Option<String>,
    /// `start_async` never returns
    pub start_hang: bool,
    /// Published before the invocation becomes ready
    pub events: Vec<LifecycleEvent>,
    pub delay: Duration,
    /// Never becomes ready
    pub hang: bool,
    pub result: Result<Value, InvocationError>,
    /// Published right after readiness
    pub trailing: Vec<LifecycleEvent>,
    /// Published when cancelled
    pub after_cancel: Vec<LifecycleEvent>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            start_error: None,
            start_hang: false,
            events: Vec::new(),
            delay: Duration::ZERO,
            hang: false,
            result: Ok(json!({})),
            trailing: Vec::new(),
            after_cancel: Vec::new(),
        }
    }
}

impl Script {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn never_starts() -> Self {
        Self {
            start_hang: true,
            ..Self::default()
        }
    }

    pub fn start_failure(message: &str) -> Self {
        Self {
            start_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn result(mut self, result: Result<Value, InvocationError>) -> Self {
        self.result = result;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn event(mut self, event: LifecycleEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn trailing(mut self, event: LifecycleEvent) -> Self {
        self.trailing.push(event);
        self
    }

    pub fn after_cancel(mut self, event: LifecycleEvent) -> Self {
        self.after_cancel.push(event);
        self
    }
}

fn stamp(mut event: LifecycleEvent, correlation_id: &str) -> LifecycleEvent {
    event.correlation_ref = event.correlation_ref.replace(CORR, correlation_id);
    event
}

#[derive(Clone, Default)]
pub struct ScriptedInvoker {
    scripts: HashMap<String, Script>,
    started: Arc<Mutex<Vec<String>>>,
    cancelled: Arc<Mutex<Vec<String>>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, test_id: &str, script: Script) -> Self {
        self.scripts.insert(test_id.to_string(), script);
        self
    }

    /// Correlation ids in start order
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn start_async(
        &self,
        test: &TestDescriptor,
        options: InvokeOptions,
    ) -> Result<Box<dyn InvocationHandle>, InvocationError> {
        let script = self.scripts.get(&test.id).cloned().unwrap_or_default();
        let correlation_id = options.correlation_id.clone();
        self.started.lock().unwrap().push(correlation_id.clone());

        if script.start_hang {
            std::future::pending::<()>().await;
        }
        if let Some(message) = script.start_error {
            return Err(InvocationError::Start {
                test_id: test.id.clone(),
                message,
            });
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let publisher = options.topic.clone();
        let corr = correlation_id.clone();
        let Script {
            events,
            delay,
            hang,
            result,
            trailing,
            after_cancel,
            ..
        } = script;

        tokio::spawn(async move {
            for event in events {
                publisher.publish(stamp(event, &corr));
            }
            if hang {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(delay).await;
            let _ = ready_tx.send(result);
            for event in trailing {
                publisher.publish(stamp(event, &corr));
            }
        });

        Ok(Box::new(ScriptedHandle {
            correlation_id,
            ready_rx: Some(ready_rx),
            outcome: None,
            publisher: options.topic,
            after_cancel,
            cancelled: self.cancelled.clone(),
        }))
    }
}

struct ScriptedHandle {
    correlation_id: String,
    ready_rx: Option<oneshot::Receiver<Result<Value, InvocationError>>>,
    outcome: Option<Result<Value, InvocationError>>,
    publisher: Publisher,
    after_cancel: Vec<LifecycleEvent>,
    cancelled: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl InvocationHandle for ScriptedHandle {
    async fn ready(&mut self) {
        if let Some(rx) = self.ready_rx.as_mut() {
            let outcome = rx
                .await
                .unwrap_or_else(|_| Err(InvocationError::Failed("script dropped".into())));
            self.outcome = Some(outcome);
            self.ready_rx = None;
        }
    }

    async fn result(&mut self) -> Result<Value, InvocationError> {
        self.ready().await;
        self.outcome.clone().unwrap_or(Err(InvocationError::Cancelled))
    }

    fn cancel(&mut self) {
        self.cancelled
            .lock()
            .unwrap()
            .push(self.correlation_id.clone());
        for event in self.after_cancel.drain(..) {
            self.publisher.publish(stamp(event, &self.correlation_id));
        }
    }
}
