use std::time::Duration;

/// Errors produced while building a limiter.
///
/// A built limiter never fails; every decision is a plain admit or reject.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A bucket that holds nothing would reject every request.
    #[error("capacity must be greater than zero")]
    ZeroCapacity,

    #[error("refill interval must be greater than zero")]
    ZeroInterval,

    /// A full bucket would not fit in the limiter's 64-bit nanosecond clock.
    #[error("capacity {capacity} with refill interval {interval:?} overflows the limiter clock")]
    IntervalTooLarge { capacity: usize, interval: Duration },

    #[error("failed to read limiter configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid limiter configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}
