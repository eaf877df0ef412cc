//! Reconnect delay policies
//!
//! Media renegotiation uses a linear ramp, the event channel an exponential
//! one with a capped exponent. Both clamp to an absolute ceiling.

use std::time::Duration;

/// `min(base * attempt, max)`
pub fn linear_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    base.checked_mul(attempt).unwrap_or(max).min(max)
}

/// `min(initial * 2^min(retry - 1, max_exponent), max)`
///
/// `retry` is 1-based; a retry count of zero is treated as the first retry.
pub fn exponential_delay(
    initial: Duration,
    retry: u32,
    max_exponent: u32,
    max: Duration,
) -> Duration {
    let exponent = retry.saturating_sub(1).min(max_exponent).min(31);
    initial.checked_mul(1u32 << exponent).unwrap_or(max).min(max)
}
