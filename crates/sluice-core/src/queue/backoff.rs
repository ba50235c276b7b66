//! Backoff: exponential delays with optional jitter.
//!
//! Used for the worker's empty-poll sleep, for retrying a store outage and
//! for the supervisor's restart delay.

use std::time::Duration;

use rand::Rng;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    /// Relative spread applied to each delay, `0.0..=1.0`.
    jitter: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            jitter: 0.0,
            current: initial,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait now. Advances the schedule: the next call returns about
    /// twice as much, capped at `max`.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = next_backoff(self.current, self.max);
        apply_jitter(base, self.jitter).min(self.max)
    }

    /// Back to the initial delay (after useful work, or a long healthy run).
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    if current.is_zero() {
        return max.min(Duration::from_millis(1));
    }
    current.saturating_mul(2).min(max)
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
    delay.mul_f64(factor)
}

/// Sleep unless cancelled first. Returns `false` when cancelled.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if delay.is_zero() {
        yield_now().await;
        return true;
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

/// Uniform random delay in `[0, max]`, for startup staggering.
pub fn random_delay(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    max.mul_f64(rand::thread_rng().gen_range(0.0..=1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff =
            Backoff::new(Duration::from_millis(1000), Duration::from_secs(60)).with_jitter(0.25);
        for _ in 0..50 {
            backoff.reset();
            let d = backoff.next_delay();
            assert!(d >= Duration::from_millis(750), "{d:?}");
            assert!(d <= Duration::from_millis(1250), "{d:?}");
        }
    }

    #[test]
    fn jitter_never_exceeds_max() {
        let mut backoff =
            Backoff::new(Duration::from_millis(1000), Duration::from_millis(1000)).with_jitter(0.5);
        for _ in 0..50 {
            assert!(backoff.next_delay() <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn random_delay_is_bounded() {
        assert_eq!(random_delay(Duration::ZERO), Duration::ZERO);
        for _ in 0..50 {
            assert!(random_delay(Duration::from_millis(20)) <= Duration::from_millis(20));
        }
    }

    #[tokio::test]
    async fn sleep_or_cancel_stops_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!sleep_or_cancel(Duration::from_secs(60), &cancel).await);

        let live = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_millis(1), &live).await);
    }
}
