//! Asynchronous test invocation
//!
//! An [`Invoker`] starts a test and hands back an [`InvocationHandle`] that
//! exposes readiness, the final result and best-effort cancellation. Progress
//! is reported separately as lifecycle events on the run topic.

mod process;

pub use process::ProcessInvoker;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::bus::Publisher;
use crate::models::TestDescriptor;

/// Invocation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("failed to start {test_id}: {message}")]
    Start { test_id: String, message: String },

    #[error("test {0} has no command configured")]
    MissingCommand(String),

    #[error("{0}")]
    Failed(String),

    #[error("invocation was cancelled")]
    Cancelled,
}

/// Per-invocation options
#[derive(Clone, Debug)]
pub struct InvokeOptions {
    pub correlation_id: String,
    /// Where the invocation publishes its lifecycle events
    pub topic: Publisher,
    pub timeout: Duration,
}

/// Reference to a started invocation
#[async_trait]
pub trait InvocationHandle: Send {
    /// Resolves once a result is available
    async fn ready(&mut self);

    /// Final result; call after [`InvocationHandle::ready`]
    async fn result(&mut self) -> Result<Value, InvocationError>;

    /// Request cancellation. Best effort; stray events may still follow.
    fn cancel(&mut self);
}

/// Starts tests asynchronously
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn start_async(
        &self,
        test: &TestDescriptor,
        options: InvokeOptions,
    ) -> Result<Box<dyn InvocationHandle>, InvocationError>;
}
