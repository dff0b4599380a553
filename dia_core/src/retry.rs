//! Bounded retry with an overall deadline, for driver remote commands.

use dia_common::error::{CoreError, CoreResult};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Run `op` until it succeeds, `attempts` runs out, or `overall` elapses.
///
/// `op` receives the 1-based attempt number. Between attempts the caller
/// sleeps for `backoff`, cut short by the deadline.
///
/// # Errors
/// Returns `CoreError::OperationTimeout` when the budget is exhausted.
pub fn retry_with_deadline<T, F>(
    operation: &str,
    attempts: u32,
    overall: Duration,
    backoff: Duration,
    mut op: F,
) -> CoreResult<T>
where
    F: FnMut(u32) -> CoreResult<T>,
{
    let deadline = Instant::now() + overall;
    let mut made = 0;
    while made < attempts {
        made += 1;
        match op(made) {
            Ok(value) => return Ok(value),
            Err(e) => debug!("{} attempt {}/{} failed: {}", operation, made, attempts, e),
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        if made < attempts {
            thread::sleep(backoff.min(remaining));
        }
    }
    Err(CoreError::OperationTimeout {
        operation: operation.to_string(),
        attempts: made,
    })
}
