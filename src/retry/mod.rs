//! Bounded retry policies shared by the readiness and command phases.
//!
//! Every waiting loop in the crate is driven by a [`RetryPolicy`] value
//! constructed once and handed to the phase that uses it. Policies never share
//! counters: each loop keeps its own attempt number and asks the policy for the
//! delay that follows it. Tests substitute compressed policies (microsecond
//! delays) through the `with_*` overrides.

mod numeric;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Shape of the delay between consecutive attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backoff {
    /// Sleep the same duration after every attempt.
    Fixed(Duration),
    /// Sleep `step × attempt`, never more than `cap`.
    Linear {
        /// Increment added per attempt.
        step: Duration,
        /// Upper bound on any single delay.
        cap: Duration,
    },
    /// Sleep `initial × 2^(attempt - 1)`, never more than `cap`.
    Exponential {
        /// Delay after the first attempt.
        initial: Duration,
        /// Upper bound on any single delay.
        cap: Duration,
    },
}

impl Backoff {
    /// Returns the delay that follows the given one-based attempt.
    #[must_use]
    pub fn delay_after(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => delay,
            Self::Linear { step, cap } => numeric::capped(numeric::linear(step, attempt), cap),
            Self::Exponential { initial, cap } => {
                numeric::capped(numeric::doubling(initial, attempt), cap)
            }
        }
    }
}

/// Attempt ceiling, per-attempt timeout, and backoff for one waiting loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Upper bound on a single attempt, when the loop enforces one.
    pub attempt_timeout: Option<Duration>,
    /// One unconditional pause before the first attempt.
    pub initial_delay: Duration,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Instance status polling: 60 polls, five seconds apart.
    #[must_use]
    pub const fn status_polling() -> Self {
        Self {
            max_attempts: 60,
            attempt_timeout: None,
            initial_delay: Duration::ZERO,
            backoff: Backoff::Fixed(Duration::from_secs(5)),
        }
    }

    /// Command-channel readiness probing: a 30 second settling delay, then six
    /// probes ten seconds apart. Each probe gets 30 seconds of wall clock,
    /// well above the client's own ten second connect timeout, so a slow
    /// tunnel handshake is not cut off before the command runs.
    #[must_use]
    pub const fn readiness_probe() -> Self {
        Self {
            max_attempts: 6,
            attempt_timeout: Some(Duration::from_secs(30)),
            initial_delay: Duration::from_secs(30),
            backoff: Backoff::Fixed(Duration::from_secs(10)),
        }
    }

    /// Remote command execution over a proxied channel: three attempts with a
    /// linear two second step capped at ten seconds.
    #[must_use]
    pub const fn command_execution() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: None,
            initial_delay: Duration::ZERO,
            backoff: Backoff::Linear {
                step: Duration::from_secs(2),
                cap: Duration::from_secs(10),
            },
        }
    }

    /// A policy that makes exactly one attempt and never sleeps.
    #[must_use]
    pub const fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            attempt_timeout: None,
            initial_delay: Duration::ZERO,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    /// Overrides the attempt ceiling. Zero is raised to one.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = if max_attempts == 0 { 1 } else { max_attempts };
        self
    }

    /// Overrides the per-attempt timeout.
    #[must_use]
    pub const fn with_attempt_timeout(mut self, attempt_timeout: Option<Duration>) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Overrides the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Overrides the backoff shape.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the delay that follows the given one-based attempt.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay_after(attempt)
    }

    /// Returns whether another attempt is permitted after `attempt`.
    #[must_use]
    pub const fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Deterministic wall-clock bound of a loop driven by this policy.
    ///
    /// The bound is the initial delay, the attempt timeout (when set) for
    /// every attempt, and the delays between attempts. No delay follows the
    /// last attempt. Time spent inside attempts without a timeout is not
    /// counted.
    #[must_use]
    pub fn worst_case(&self) -> Duration {
        let per_attempt = self.attempt_timeout.unwrap_or(Duration::ZERO);
        (1..=self.max_attempts).fold(self.initial_delay, |total, attempt| {
            let delay = if self.allows_retry_after(attempt) {
                self.delay_after(attempt)
            } else {
                Duration::ZERO
            };
            numeric::sum(total, numeric::sum(per_attempt, delay))
        })
    }
}

/// Marker returned when a pause is interrupted by cancellation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Interrupted;

/// Sleeps for `delay` unless `cancel` fires first.
///
/// # Errors
///
/// Returns [`Interrupted`] when the token is cancelled before or during the
/// sleep.
pub async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<(), Interrupted> {
    if cancel.is_cancelled() {
        return Err(Interrupted);
    }
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        () = cancel.cancelled() => Err(Interrupted),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(5, 10)]
    #[case(9, 10)]
    fn command_backoff_grows_linearly_to_cap(#[case] attempt: u32, #[case] expected_secs: u64) {
        let policy = RetryPolicy::command_execution();
        assert_eq!(policy.delay_after(attempt), Duration::from_secs(expected_secs));
    }

    #[test]
    fn exponential_backoff_is_monotonic_and_capped() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(8),
        };
        let delays: Vec<_> = (1..=6).map(|attempt| backoff.delay_after(attempt)).collect();
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(delays.last().copied(), Some(Duration::from_secs(8)));
    }

    #[test]
    fn status_worst_case_counts_only_delays_between_polls() {
        // 59 × 5
        assert_eq!(
            RetryPolicy::status_polling().worst_case(),
            Duration::from_secs(295)
        );
    }

    #[test]
    fn probe_worst_case_includes_initial_delay_and_timeouts() {
        // 30 + 6 × 30 + 5 × 10
        assert_eq!(
            RetryPolicy::readiness_probe().worst_case(),
            Duration::from_secs(260)
        );
    }

    #[rstest]
    #[case(RetryPolicy::single_attempt().with_backoff(Backoff::Fixed(Duration::from_secs(60))), 0)]
    #[case(RetryPolicy::command_execution(), 6)]
    fn no_delay_follows_the_last_attempt(#[case] policy: RetryPolicy, #[case] expected_secs: u64) {
        assert_eq!(policy.worst_case(), Duration::from_secs(expected_secs));
    }

    #[test]
    fn zero_ceiling_is_raised_to_one() {
        let policy = RetryPolicy::status_polling().with_max_attempts(0);
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.allows_retry_after(1));
    }

    #[tokio::test]
    async fn pause_returns_interrupted_when_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(pause(Duration::from_secs(60), &cancel).await, Err(Interrupted));
    }

    #[tokio::test]
    async fn pause_wakes_on_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let handle = tokio::spawn(async move { pause(Duration::from_secs(3600), &cancel).await });
        trigger.cancel();
        let result = handle.await.expect("pause task should join");
        assert_eq!(result, Err(Interrupted));
    }
}
