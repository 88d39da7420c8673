use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use quanta::Clock;
use quanta::Instant;

use crate::ConfigError;
use crate::Reason;
use crate::Strategy;
use crate::checked_span;

/// A leaky bucket admission controller.
///
/// Every admitted request adds one unit to the bucket and one unit drains away per
/// `refill_interval`. A request is admitted only while the bucket holds fewer than
/// `capacity` units. Leakage is counted in whole intervals since the previous
/// decision, so a partially elapsed interval is dropped whenever a decision is made.
///
/// The level and the time of the last decision are folded into a single drain
/// deadline, `last_update + level * refill_interval`, the instant at which the
/// bucket would be empty. `ceil((deadline - now) / refill_interval)` is exactly the
/// level after whole-interval leakage, and the deadline fits in one `AtomicU64`, so
/// each decision is a single CAS over the complete state.
#[derive(Debug)]
pub struct LeakyBucket {
    capacity: u64,
    interval_ns: u64,
    /// Drain deadline in nanoseconds since `anchor`.
    deadline: AtomicU64,
    clock: Clock,
    anchor: Instant,
}

impl LeakyBucket {
    /// Creates a new `LeakyBucket` reading the system monotonic clock.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The maximum number of admitted requests that have not yet leaked.
    /// * `refill_interval` - The time it takes for one unit of capacity to leak.
    ///
    /// # Errors
    ///
    /// Fails if `refill_interval` is zero or a full bucket would overflow the clock.
    pub fn new(capacity: NonZeroUsize, refill_interval: Duration) -> Result<Self, ConfigError> {
        Self::with_clock(capacity, refill_interval, Clock::new())
    }

    /// Creates a new `LeakyBucket` reading the supplied clock.
    pub fn with_clock(
        capacity: NonZeroUsize,
        refill_interval: Duration,
        clock: Clock,
    ) -> Result<Self, ConfigError> {
        let (capacity, interval_ns) = checked_span(capacity, refill_interval)?;
        let anchor = clock.now();

        Ok(Self {
            capacity,
            interval_ns,
            deadline: AtomicU64::new(0),
            clock,
            anchor,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_nanos(self.interval_ns)
    }

    /// The occupied capacity as the next decision would see it.
    ///
    /// This does not modify the bucket.
    pub fn level(&self) -> usize {
        let deadline = self.deadline.load(Ordering::Acquire);
        self.level_at(deadline, self.now()) as usize
    }

    #[inline]
    fn now(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_nanos() as u64
    }

    /// Level after whole-interval leakage, clamped to capacity.
    ///
    /// A caller whose `now` predates the writer of `deadline` could otherwise
    /// observe more than a full bucket.
    #[inline]
    fn level_at(&self, deadline: u64, now: u64) -> u64 {
        deadline
            .saturating_sub(now)
            .div_ceil(self.interval_ns)
            .min(self.capacity)
    }
}

impl Strategy for LeakyBucket {
    #[inline]
    fn process(&self) -> ControlFlow<Reason> {
        let now = self.now();
        let mut deadline = self.deadline.load(Ordering::Acquire);

        loop {
            let level = self.level_at(deadline, now);

            if level < self.capacity {
                // level < capacity means deadline <= now + level * interval, so this
                // never moves the deadline backwards.
                let next = now + (level + 1) * self.interval_ns;
                match self.deadline.compare_exchange_weak(
                    deadline,
                    next,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return ControlFlow::Continue(()),
                    Err(actual) => deadline = actual,
                }
            } else {
                // Record the leaked state even on rejection. Rounding up to whole
                // intervals here is where a partial interval is lost.
                let next = deadline.max(now + level * self.interval_ns);
                if next != deadline
                    && let Err(actual) = self.deadline.compare_exchange_weak(
                        deadline,
                        next,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                {
                    deadline = actual;
                    continue;
                }

                let free_at = next - (self.capacity - 1) * self.interval_ns;
                return ControlFlow::Break(Reason::Overloaded {
                    retry_after: Duration::from_nanos(free_at.saturating_sub(now)),
                });
            }
        }
    }

    fn name(&self) -> &'static str {
        "leaky_bucket"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Barrier;
    use std::thread;

    use more_asserts::assert_le;

    use super::*;

    fn mocked(capacity: usize, interval: Duration) -> (LeakyBucket, Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        let rl = LeakyBucket::with_clock(NonZeroUsize::new(capacity).unwrap(), interval, clock)
            .unwrap();
        (rl, mock)
    }

    #[test]
    fn it_admits_ten_then_rejects_then_leaks_one() {
        let interval = Duration::from_millis(200);
        let (rl, mock) = mocked(10, interval);
        assert_eq!(rl.capacity(), 10);
        assert_eq!(rl.refill_interval(), interval);

        let decisions: Vec<bool> = (0..10).map(|_| rl.try_admit()).collect();
        assert_eq!(decisions, vec![true; 10]);
        assert!(!rl.try_admit());

        mock.increment(interval);

        assert!(rl.try_admit());
        assert!(!rl.try_admit());
    }

    #[test]
    fn it_enforces_limits_with_the_system_clock() {
        let rl = LeakyBucket::new(NonZeroUsize::new(2).unwrap(), Duration::from_millis(100))
            .unwrap();

        assert_eq!(rl.process(), ControlFlow::Continue(()));
        assert_eq!(rl.process(), ControlFlow::Continue(()));
        assert!(matches!(rl.process(), ControlFlow::Break(..)));

        std::thread::sleep(Duration::from_millis(110));

        assert_eq!(rl.process(), ControlFlow::Continue(()));
        assert!(matches!(rl.process(), ControlFlow::Break(..)));
    }

    #[test]
    fn it_leaks_whole_intervals_only() {
        let interval = Duration::from_millis(100);
        let (rl, mock) = mocked(5, interval);

        for _ in 0..4 {
            assert!(rl.try_admit());
        }
        assert_eq!(rl.level(), 4);

        // Less than one interval leaks nothing
        mock.increment(Duration::from_millis(99));
        assert_eq!(rl.level(), 4);

        // Two whole intervals since the last decision
        mock.increment(Duration::from_millis(101));
        assert_eq!(rl.level(), 2);

        assert!(rl.try_admit());
        assert_eq!(rl.level(), 3);
    }

    #[test]
    fn it_drops_partial_intervals_on_each_decision() {
        let interval = Duration::from_millis(100);
        let (rl, mock) = mocked(5, interval);

        assert!(rl.try_admit());
        assert!(rl.try_admit());

        // 150ms leaks one unit and the remaining 50ms is forgotten
        mock.increment(Duration::from_millis(150));
        assert!(rl.try_admit());
        assert_eq!(rl.level(), 2);

        // A further 50ms would complete the interval in a continuous model
        mock.increment(Duration::from_millis(50));
        assert_eq!(rl.level(), 2);

        mock.increment(Duration::from_millis(50));
        assert_eq!(rl.level(), 1);
    }

    #[test]
    fn it_records_leakage_on_rejection() {
        let interval = Duration::from_millis(100);
        let (rl, mock) = mocked(2, interval);

        assert!(rl.try_admit());
        assert!(rl.try_admit());

        // Half an interval, still full
        mock.increment(Duration::from_millis(50));
        assert!(!rl.try_admit());

        // Each rejection moves the last update forward, so a full interval must
        // elapse from the latest one.
        mock.increment(Duration::from_millis(60));
        assert!(!rl.try_admit());
        mock.increment(Duration::from_millis(100));
        assert!(rl.try_admit());
    }

    #[test]
    fn it_reports_when_capacity_frees_up() {
        let interval = Duration::from_millis(200);
        let (rl, _mock) = mocked(3, interval);

        for _ in 0..3 {
            assert!(rl.try_admit());
        }
        assert_eq!(
            rl.process(),
            ControlFlow::Break(Reason::Overloaded {
                retry_after: interval
            })
        );
    }

    #[test]
    fn it_drains_to_zero_after_a_long_idle() {
        let interval = Duration::from_millis(10);
        let (rl, mock) = mocked(8, interval);

        for _ in 0..8 {
            assert!(rl.try_admit());
        }
        assert_eq!(rl.level(), 8);

        mock.increment(Duration::from_secs(60 * 60 * 24 * 365));
        assert_eq!(rl.level(), 0);

        // No burst credit beyond capacity accrued while idle
        for _ in 0..8 {
            assert!(rl.try_admit());
        }
        assert!(!rl.try_admit());
    }

    #[test]
    fn level_stays_within_bounds() {
        let interval = Duration::from_millis(7);
        let (rl, mock) = mocked(4, interval);

        for step in 0..500u64 {
            let _ = rl.try_admit();
            assert_le!(rl.level(), rl.capacity());
            mock.increment(Duration::from_millis(step % 5));
        }
    }

    #[test]
    fn it_does_not_overshoot_across_threads() {
        let capacity = 64;
        let threads = 16;
        let attempts = 32;
        let rl = LeakyBucket::new(
            NonZeroUsize::new(capacity).unwrap(),
            Duration::from_secs(3600),
        )
        .unwrap();
        let barrier = Barrier::new(threads);

        let admitted: usize = thread::scope(|s| {
            let mut handles = Vec::with_capacity(threads);
            for _ in 0..threads {
                handles.push(s.spawn(|| {
                    barrier.wait();
                    (0..attempts).filter(|_| rl.try_admit()).count()
                }));
            }
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, capacity);
        assert_eq!(rl.level(), capacity);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_actual_concurrency() {
        let capacity = 100;
        // Wrap in Arc to share across tasks
        let rl = Arc::new(
            LeakyBucket::new(NonZeroUsize::new(capacity).unwrap(), Duration::from_secs(60))
                .unwrap(),
        );

        let mut handles = vec![];

        for _ in 0..capacity + 10 {
            let rl_clone = Arc::clone(&rl);
            handles.push(tokio::spawn(async move { rl_clone.try_admit() }));
        }

        let results = futures::future::join_all(handles).await;
        let success_count = results.into_iter().filter(|r| matches!(r, Ok(true))).count();

        assert_eq!(success_count, capacity);
    }

    #[test]
    fn it_rejects_a_zero_interval() {
        let result = LeakyBucket::new(NonZeroUsize::new(1).unwrap(), Duration::ZERO);
        assert!(matches!(result, Err(ConfigError::ZeroInterval)));
    }
}
