//! Fixed-interval polling helpers.
//!
//! Both pod readiness and chain height are checked by repeatedly asking a
//! question until the answer is yes. The delay between attempts is fixed -
//! no backoff, no jitter - and is injected by the caller, so tests can poll
//! at millisecond intervals.
//!
//! Pod readiness polls forever (an external process-level timeout is the
//! backstop); chain height polls against a wall-clock deadline computed when
//! polling starts.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::{Error, Result};

/// Result of one poll attempt.
///
/// - `Ok(Some(value))` - condition met, stop polling
/// - `Ok(None)` - not there yet, poll again after the interval
/// - `Err(e)` - fatal, stop polling and surface the error
pub type PollResult<T> = Result<Option<T>>;

/// Poll `check_fn` every `interval` until it yields a value or fails.
///
/// Unbounded: only an `Err` from the check or external process termination
/// ends the loop.
pub async fn wait_until<T, F, Fut>(
    interval: Duration,
    description: &str,
    mut check_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollResult<T>>,
{
    loop {
        match check_fn().await? {
            Some(value) => return Ok(value),
            None => {
                debug!("waiting for {}...", description);
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Poll `check_fn` every `interval` until it yields a value, fails, or the
/// deadline (computed once, at entry) passes.
pub async fn wait_with_timeout<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    description: &str,
    mut check_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollResult<T>>,
{
    let deadline = Instant::now() + timeout;

    loop {
        match check_fn().await? {
            Some(value) => return Ok(value),
            None => {
                if Instant::now() >= deadline {
                    return Err(Error::Timeout(description.to_string()));
                }
                debug!("waiting for {}...", description);
                tokio::time::sleep(interval).await;
            }
        }
    }
}
