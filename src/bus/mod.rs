//! Run-scoped message topic
//!
//! A topic is an explicit channel object created for a run and handed to the
//! coordinator. Any number of publishers may feed it; exactly one inbox
//! drains it. Closing the inbox ends the topic: later publishes are dropped.

use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::trace;

use crate::models::LifecycleEvent;

/// A named many-producer, single-consumer event channel
#[derive(Debug)]
pub struct Topic {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<LifecycleEvent>,
    rx: Option<mpsc::UnboundedReceiver<LifecycleEvent>>,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name: Arc::from(name.into()),
            tx,
            rx: Some(rx),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A cloneable producer side of this topic
    pub fn publisher(&self) -> Publisher {
        Publisher {
            topic: self.name.clone(),
            tx: self.tx.clone(),
        }
    }

    /// Take the consumer side. Only the first call succeeds.
    pub fn subscribe(&mut self) -> Option<Inbox> {
        self.rx.take().map(|rx| Inbox {
            topic: self.name.clone(),
            rx,
        })
    }
}

/// Producer side of a topic
#[derive(Clone, Debug)]
pub struct Publisher {
    topic: Arc<str>,
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl Publisher {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish an event. Returns false once the topic has been closed.
    pub fn publish(&self, event: LifecycleEvent) -> bool {
        trace!(topic = %self.topic, kind = %event.kind, reference = %event.correlation_ref, "publish");
        self.tx.send(event).is_ok()
    }
}

/// Consumer side of a topic
#[derive(Debug)]
pub struct Inbox {
    topic: Arc<str>,
    rx: mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl Inbox {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next event; `None` once closed and empty
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        self.rx.recv().await
    }

    /// Next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<LifecycleEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Stop accepting new events; buffered events stay readable
    pub fn close(&mut self) {
        self.rx.close();
    }
}
