//! # admit-limit
//!
//! `admit-limit` decides, for every inbound request, whether it may proceed to an
//! expensive backend call or must be rejected on the spot.
//!
//! ## Core Philosophy
//!
//! The limiter sits on the hot path of every request, shared by every request handler.
//! Each strategy keeps its whole state in a single `AtomicU64` and applies the
//! read-leak-decide-write sequence as one Compare-And-Swap (CAS) transaction. No field
//! is ever updated on its own, so concurrent callers can never both observe spare
//! capacity that only one of them may take.
//!
//! ## Key Concepts
//!
//! * **Lock-Free**: No `Mutex` or `RwLock` in the hot path.
//! * **Lazy Evaluation**: Leakage is recalculated at the moment of the request,
//!   eliminating the need for background worker threads or timers.
//! * **Strategy Trait**: A unified interface for different admission algorithms.
//! * **Injected Clock**: Every strategy reads a monotonic [`quanta::Clock`], which tests
//!   replace with `Clock::mock()`.
//!
//! ## Example
//!
//! ```rust
//! use admit_limit::LeakyBucket;
//! use admit_limit::Strategy;
//! use std::time::Duration;
//! use std::num::NonZeroUsize;
//!
//! let capacity = NonZeroUsize::new(10).unwrap();
//! let bucket = LeakyBucket::new(capacity, Duration::from_millis(200)).unwrap();
//!
//! if bucket.try_admit() {
//!     // Request admitted, call the backend
//! }
//! ```

use std::fmt::Debug;
use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::time::Duration;

mod config;
mod error;
mod gcra;
mod leaky_bucket;

pub use config::Algorithm;
pub use config::LimiterConfig;
pub use error::ConfigError;
pub use gcra::Gcra;
pub use leaky_bucket::LeakyBucket;

/// Reasons why a request might be rejected by a strategy.
#[derive(Debug, PartialEq)]
pub enum Reason {
    Overloaded { retry_after: Duration },
}

/// The core trait for all admission algorithms.
///
/// Strategies must be `Send` and `Sync` to allow sharing across thread boundaries
/// via `Arc`.
pub trait Strategy: Debug {
    /// Attempts to admit a single request.
    ///
    /// This method is non-blocking and uses atomic operations to update
    /// internal state. A `Continue` grants the caller one unit of capacity.
    ///
    /// # Errors
    ///
    /// Returns `Reason` if the rate limit has been reached. No capacity is
    /// consumed in that case.
    fn process(&self) -> ControlFlow<Reason>;

    /// Boolean form of [`Strategy::process`].
    ///
    /// Call it once per request. A rejected request must not call it again.
    fn try_admit(&self) -> bool {
        self.process().is_continue()
    }

    /// Short label used in logs and metrics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Convert construction parameters into nanosecond units, rejecting values the
/// 64-bit clock cannot hold for a full bucket.
pub(crate) fn checked_span(
    capacity: NonZeroUsize,
    interval: Duration,
) -> Result<(u64, u64), ConfigError> {
    if interval.is_zero() {
        return Err(ConfigError::ZeroInterval);
    }
    let too_large = || ConfigError::IntervalTooLarge {
        capacity: capacity.get(),
        interval,
    };
    let interval_ns = u64::try_from(interval.as_nanos()).map_err(|_| too_large())?;
    let capacity = capacity.get() as u64;
    // Leave room for one extra interval on top of a full bucket.
    capacity
        .checked_add(1)
        .and_then(|slots| slots.checked_mul(interval_ns))
        .ok_or_else(too_large)?;
    Ok((capacity, interval_ns))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_rejects_a_zero_interval() {
        let capacity = NonZeroUsize::new(1).unwrap();
        assert!(matches!(
            checked_span(capacity, Duration::ZERO),
            Err(ConfigError::ZeroInterval)
        ));
    }

    #[test]
    fn it_rejects_spans_beyond_the_clock() {
        let capacity = NonZeroUsize::new(usize::MAX).unwrap();
        assert!(matches!(
            checked_span(capacity, Duration::from_secs(1)),
            Err(ConfigError::IntervalTooLarge { .. })
        ));
        assert!(matches!(
            checked_span(NonZeroUsize::MIN, Duration::MAX),
            Err(ConfigError::IntervalTooLarge { .. })
        ));
    }

    #[test]
    fn it_converts_to_nanos() {
        let capacity = NonZeroUsize::new(10).unwrap();
        let (cap, interval) = checked_span(capacity, Duration::from_millis(200)).unwrap();
        assert_eq!(cap, 10);
        assert_eq!(interval, 200_000_000);
    }
}
