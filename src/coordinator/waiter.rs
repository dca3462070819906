//! Bounded wait for a trailing completion signal

use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

use super::listener::Completion;

/// Wait up to `wait` for the listener to deliver a completion.
///
/// `None` when the wait expires or the listener dropped the signal; the
/// caller finalizes with whatever detail it has.
pub async fn await_completion(
    completion: oneshot::Receiver<Completion>,
    wait: Duration,
) -> Option<Completion> {
    match tokio::time::timeout(wait, completion).await {
        Ok(Ok(completion)) => Some(completion),
        Ok(Err(_)) => {
            debug!("Completion signal dropped by listener");
            None
        }
        Err(_) => {
            debug!(
                "No completion within {}",
                humantime::format_duration(wait)
            );
            None
        }
    }
}
