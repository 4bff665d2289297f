//! Retry policy shared by the provider adapters.

use std::time::Duration;

/// Base delay for exponential backoff.
const BASE_DELAY: Duration = Duration::from_millis(500);

/// Cap on the backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(8);

/// Whether an HTTP status is worth retrying.
pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Exponential backoff delay for the given attempt (0-based).
pub(crate) fn retry_backoff_delay(attempt: u32) -> Duration {
    let delay = BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt));
    delay.min(MAX_DELAY)
}
