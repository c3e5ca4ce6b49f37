use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows between consecutive waits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay every time
    #[default]
    Fixed,
    /// Delay multiplied after every wait, capped at the maximum
    Exponential,
}

/// Poll interval used while the slave is caught up
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub strategy: BackoffStrategy,
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            interval_ms: 10_000, // 10 seconds between idle polls
            max_interval_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

/// Reconnect policy for transport failures
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive failed attempts tolerated before the session aborts
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Stateful delay generator
#[derive(Debug, Clone)]
pub struct Backoff {
    strategy: BackoffStrategy,
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl Backoff {
    pub fn fixed(interval: Duration) -> Self {
        Self::new(BackoffStrategy::Fixed, interval, interval, 1.0)
    }

    pub fn exponential(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self::new(BackoffStrategy::Exponential, initial, max, multiplier)
    }

    fn new(strategy: BackoffStrategy, initial: Duration, max: Duration, multiplier: f64) -> Self {
        let max = max.max(initial);
        Self {
            strategy,
            initial,
            max,
            multiplier: if multiplier.is_nan() || multiplier < 1.0 {
                1.0
            } else {
                multiplier
            },
            current: initial,
        }
    }

    /// Delay to wait now; advances the exponential sequence
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        if self.strategy == BackoffStrategy::Exponential {
            // Out of range products saturate at the cap
            self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
                .map_or(self.max, |next| next.min(self.max));
        }
        delay
    }

    /// Back to the initial delay (after progress was made)
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl From<&PollConfig> for Backoff {
    fn from(config: &PollConfig) -> Self {
        Backoff::new(
            config.strategy,
            Duration::from_millis(config.interval_ms),
            Duration::from_millis(config.max_interval_ms),
            config.multiplier,
        )
    }
}

impl From<&RetryPolicy> for Backoff {
    fn from(policy: &RetryPolicy) -> Self {
        Backoff::exponential(
            Duration::from_millis(policy.initial_delay_ms),
            Duration::from_millis(policy.max_delay_ms),
            policy.multiplier,
        )
    }
}
