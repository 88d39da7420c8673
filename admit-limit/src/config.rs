//! Limiter configuration.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use crate::ConfigError;
use crate::Gcra;
use crate::LeakyBucket;
use crate::Strategy;

/// Which admission algorithm to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Whole-interval leakage, see [`LeakyBucket`].
    #[default]
    LeakyBucket,
    /// Token bucket semantics with exact fractional refill, see [`Gcra`].
    Gcra,
}

/// Parameters fixed for the lifetime of a limiter.
///
/// ```yaml
/// algorithm: leaky_bucket
/// capacity: 10
/// refill_interval: 200ms
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Maximum number of admitted requests that have not yet drained
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Time for one unit of capacity to drain, as a humantime string
    #[serde(default = "default_refill_interval", with = "humantime_duration")]
    pub refill_interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            capacity: default_capacity(),
            refill_interval: default_refill_interval(),
        }
    }
}

fn default_capacity() -> usize {
    10
}

fn default_refill_interval() -> Duration {
    Duration::from_millis(200)
}

impl LimiterConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Validate the parameters and construct a shareable limiter.
    pub fn build(&self) -> Result<Arc<dyn Strategy + Send + Sync>, ConfigError> {
        let capacity = NonZeroUsize::new(self.capacity).ok_or(ConfigError::ZeroCapacity)?;

        let strategy: Arc<dyn Strategy + Send + Sync> = match self.algorithm {
            Algorithm::LeakyBucket => Arc::new(LeakyBucket::new(capacity, self.refill_interval)?),
            Algorithm::Gcra => Arc::new(Gcra::new(capacity, self.refill_interval)?),
        };

        info!(
            algorithm = strategy.name(),
            capacity = self.capacity,
            refill_interval = ?self.refill_interval,
            "admission limiter ready"
        );
        Ok(strategy)
    }
}

mod humantime_duration {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
