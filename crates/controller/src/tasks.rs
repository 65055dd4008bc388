//! Joining background tasks during shutdown.

use std::time::Duration;

use tokio::task::JoinHandle;

/// How a background task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
    Finished,
    Failed,
    TimedOut,
}

/// Wait up to `timeout` for `handle`, logging a panic or a timeout.
///
/// A task that times out is aborted.
pub async fn join_with_timeout(
    name: &str,
    handle: JoinHandle<()>,
    timeout: Duration,
) -> TaskExit {
    let abort = handle.abort_handle();
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(())) => {
            tracing::info!(task = name, "Background task stopped");
            TaskExit::Finished
        }
        Ok(Err(e)) => {
            tracing::warn!(task = name, error = %e, "Background task failed");
            TaskExit::Failed
        }
        Err(_) => {
            tracing::warn!(
                task = name,
                timeout_secs = timeout.as_secs(),
                "Timed out waiting for background task",
            );
            abort.abort();
            TaskExit::TimedOut
        }
    }
}
