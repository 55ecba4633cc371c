//! Bounded retry with increasing backoff for transient store errors.
//!
//! Store calls flagged as transient availability issues are retried up
//! to a fixed attempt cap; exhaustion surfaces the last error to the
//! caller instead of a partial commit. Non-transient errors are never
//! retried.

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// Attempt cap applied to retryable store operations.
pub const DEFAULT_ATTEMPTS: u32 = 10;

/// Base delay multiplied by the attempt number between retries.
const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Run `op`, retrying transient failures with linearly increasing
/// backoff. Returns the first success, the first non-transient error, or
/// the last transient error once `attempts` is exhausted.
pub fn with_backoff<T>(what: &str, attempts: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                attempt += 1;
                warn!(operation = what, attempt, error = %err, "transient store error, backing off");
                thread::sleep(BACKOFF_STEP * attempt);
            }
            Err(err) => return Err(err),
        }
    }
}
