//! Exponential backoff helpers for failed queue entries.

use std::time::Duration;

use rand::random;

/// Backoff delay for a retry after `attempt` attempts have been made.
///
/// Attempt 1 waits `base_ms`, attempt n waits `base_ms * 2^(n-1)`, capped at
/// `max_ms`.
pub fn backoff_delay(base_ms: u64, attempt: u32, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let delay_ms = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
    Duration::from_millis(delay_ms)
}

/// Backoff delay with up to 25% additive jitter, still capped at `max_ms`.
pub fn backoff_delay_with_jitter(base_ms: u64, attempt: u32, max_ms: u64) -> Duration {
    let delay_ms = backoff_delay(base_ms, attempt, max_ms).as_millis() as u64;
    let jitter_ms = random::<u64>() % (delay_ms / 4 + 1);
    Duration::from_millis(delay_ms.saturating_add(jitter_ms).min(max_ms))
}
