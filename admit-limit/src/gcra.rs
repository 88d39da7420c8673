use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use quanta::Clock;
use quanta::Instant;

use crate::ConfigError;
use crate::Reason;
use crate::Strategy;
use crate::checked_span;

/// Generic Cell Rate Algorithm
///
/// Behaves like a token bucket holding `capacity` tokens with one token restored
/// every `refill_interval`. Unlike [`crate::LeakyBucket`], fractional intervals are
/// carried forward, so the steady rate is exact.
#[derive(Debug)]
pub struct Gcra {
    /// Theoretical Arrival Time (TAT) in nanoseconds.
    tat: AtomicU64,
    emission_interval_ns: u64,
    delay_tolerance_ns: u64,
    clock: Clock,
    /// A fixed point in time (TSC tick) to calculate deltas from.
    anchor: Instant,
}

impl Gcra {
    /// Creates a new `Gcra` allowing a burst of `capacity` and one further request
    /// per `refill_interval`.
    ///
    /// # Errors
    ///
    /// Fails if `refill_interval` is zero or `capacity * refill_interval` overflows
    /// 64-bit nanoseconds.
    pub fn new(capacity: NonZeroUsize, refill_interval: Duration) -> Result<Self, ConfigError> {
        Self::with_clock(capacity, refill_interval, Clock::new())
    }

    /// Creates a new `Gcra` reading the supplied clock.
    pub fn with_clock(
        capacity: NonZeroUsize,
        refill_interval: Duration,
        clock: Clock,
    ) -> Result<Self, ConfigError> {
        let (capacity, interval_ns) = checked_span(capacity, refill_interval)?;
        let anchor = clock.now();

        Ok(Self {
            tat: AtomicU64::new(0),
            emission_interval_ns: interval_ns,
            delay_tolerance_ns: capacity * interval_ns,
            clock,
            anchor,
        })
    }

    #[cfg(test)]
    pub(crate) fn remaining_capacity(&self) -> usize {
        let now = self.clock.now().duration_since(self.anchor).as_nanos() as u64;
        let tat = self.tat.load(Ordering::Acquire);
        let total_capacity = self.delay_tolerance_ns / self.emission_interval_ns;

        if tat <= now {
            return total_capacity as usize;
        }

        // Even a partial interval counts as a used slot.
        let used_slots = (tat - now).div_ceil(self.emission_interval_ns);

        total_capacity.saturating_sub(used_slots) as usize
    }
}

impl Strategy for Gcra {
    #[inline]
    fn process(&self) -> ControlFlow<Reason> {
        let now = self.clock.now().duration_since(self.anchor).as_nanos() as u64;

        loop {
            let tat = self.tat.load(Ordering::Acquire);

            let arrival = if now > tat { now } else { tat };
            let next_tat = arrival + self.emission_interval_ns;

            if next_tat > now + self.delay_tolerance_ns {
                let wait_ns = next_tat - (now + self.delay_tolerance_ns);
                return ControlFlow::Break(Reason::Overloaded {
                    retry_after: Duration::from_nanos(wait_ns),
                });
            }

            if self
                .tat
                .compare_exchange_weak(tat, next_tat, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return ControlFlow::Continue(());
            }
        }
    }

    fn name(&self) -> &'static str {
        "gcra"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_allows_a_burst_of_capacity() {
        let rl = Gcra::new(NonZeroUsize::new(5).unwrap(), Duration::from_millis(100)).unwrap();

        assert_eq!(rl.remaining_capacity(), 5);
        for _ in 0..5 {
            assert!(rl.try_admit());
        }
        assert_eq!(rl.remaining_capacity(), 0);
        assert!(matches!(rl.process(), ControlFlow::Break(..)));
    }

    #[tokio::test]
    async fn test_gcra_deterministic_with_mock_clock() {
        let (clock, mock) = Clock::mock();

        // Burst of 5, one token every 500ms (2 requests per second)
        let rl =
            Gcra::with_clock(NonZeroUsize::new(5).unwrap(), Duration::from_millis(500), clock)
                .unwrap();

        for _ in 0..5 {
            assert!(rl.try_admit());
        }
        assert_eq!(rl.remaining_capacity(), 0);
        assert_eq!(
            rl.process(),
            ControlFlow::Break(Reason::Overloaded {
                retry_after: Duration::from_millis(500)
            })
        );

        // Fractional time carries over: 2 x 250ms restores one token
        mock.increment(Duration::from_millis(250));
        assert!(!rl.try_admit());
        mock.increment(Duration::from_millis(250));
        assert_eq!(rl.remaining_capacity(), 1);
        assert!(rl.try_admit());
        assert_eq!(rl.remaining_capacity(), 0);
    }

    #[test]
    fn it_rejects_a_zero_interval() {
        let result = Gcra::new(NonZeroUsize::new(5).unwrap(), Duration::ZERO);
        assert!(matches!(result, Err(ConfigError::ZeroInterval)));
    }
}
