//! Bounded polling.
//!
//! [`poll_until`] repeatedly fetches a value and classifies it until it is
//! ready, terminally failed, or the time limit runs out. It uses
//! `tokio::time`, so tests can drive it with a paused clock.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Classification of one fetched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollVerdict {
    /// Stop and return the value.
    Ready,
    /// Stop and report the value as a terminal failure.
    Failed,
    /// Keep polling.
    Pending,
}

/// Why polling stopped without a ready value.
#[derive(Debug, thiserror::Error)]
pub enum PollError<T, E> {
    /// The value never became ready in time.
    #[error("gave up after {attempts} attempts over {elapsed:?}")]
    Timeout { attempts: u32, elapsed: Duration },

    /// The value reached a state it can never recover from.
    #[error("reached a terminal state")]
    Terminal(T),

    /// A fetch failed outright.
    #[error("fetch failed: {0}")]
    Fetch(E),
}

/// Poll `fetch` every `interval` until `classify` says ready or failed.
///
/// The first fetch happens immediately. After a pending value, polling
/// stops with [`PollError::Timeout`] once `timeout` has elapsed since the
/// start; otherwise it sleeps `interval` and fetches again. Fetch errors
/// end polling at once.
pub async fn poll_until<T, E, F, Fut, C>(
    interval: Duration,
    timeout: Duration,
    mut fetch: F,
    mut classify: C,
) -> Result<T, PollError<T, E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&T) -> PollVerdict,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let value = fetch().await.map_err(PollError::Fetch)?;

        match classify(&value) {
            PollVerdict::Ready => return Ok(value),
            PollVerdict::Failed => return Err(PollError::Terminal(value)),
            PollVerdict::Pending => {}
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(PollError::Timeout { attempts, elapsed });
        }

        tokio::time::sleep(interval).await;
    }
}
