//! Saturating duration arithmetic used by backoff schedules.

use std::time::Duration;

/// Returns the smaller of `value` and `cap`.
pub(crate) fn capped(value: Duration, cap: Duration) -> Duration {
    if value > cap { cap } else { value }
}

/// Returns `step × attempt`, saturating at [`Duration::MAX`].
pub(crate) const fn linear(step: Duration, attempt: u32) -> Duration {
    step.saturating_mul(attempt)
}

/// Returns `initial × 2^(attempt - 1)`, saturating at [`Duration::MAX`].
///
/// Attempt numbers are one-based; attempt zero yields `initial`.
pub(crate) const fn doubling(initial: Duration, attempt: u32) -> Duration {
    let factor = match 1_u32.checked_shl(attempt.saturating_sub(1)) {
        Some(factor) => factor,
        None => u32::MAX,
    };
    initial.saturating_mul(factor)
}

/// Adds two durations, saturating at [`Duration::MAX`].
pub(crate) const fn sum(lhs: Duration, rhs: Duration) -> Duration {
    lhs.saturating_add(rhs)
}
