#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

const DEFAULT_RECONNECT_LIMIT: u32 = 7;
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(128);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);

/// Configuration for automatic reconnection behavior.
///
/// With the defaults, attempt `n` (counting from zero) waits `2^n` seconds and
/// the socket gives up after 7 consecutive failed attempts.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive reconnection attempts before giving up.
    pub max_attempts: u32,
    /// Backoff before the first reconnection attempt
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Jitter applied to each interval, `0.0` for exact powers of the multiplier
    pub randomization_factor: f64,
}

impl ReconnectConfig {
    /// Returns a copy of this config with a different attempt limit.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Returns a copy of this config with a different initial backoff.
    #[must_use]
    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_LIMIT,
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            randomization_factor: 0.0,
        }
    }
}

impl From<&ReconnectConfig> for ExponentialBackoff {
    fn from(config: &ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_randomization_factor(config.randomization_factor)
            .with_max_elapsed_time(None) // We handle max attempts separately
            .build()
    }
}

/// Ping/pong liveness settings for the tungstenite transport.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Interval for sending PING frames to keep the connection alive
    pub interval: Duration,
    /// Maximum time to wait for a PONG before considering the connection dead
    pub timeout: Duration,
}

impl HeartbeatConfig {
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            timeout: DEFAULT_HEARTBEAT_TIMEOUT_DURATION,
        }
    }
}

#[cfg(test)]
mod tests {
    use backoff::backoff::Backoff as _;

    use super::*;

    #[test]
    fn backoff_sequence_doubles_from_one_second() {
        let mut backoff: ExponentialBackoff = (&ReconnectConfig::default()).into();

        for exponent in 0..7 {
            let next = backoff.next_backoff().expect("no elapsed-time cap");
            let expected = Duration::from_secs(1_u64 << exponent);
            // Without jitter the interval may only be off by a rounding nanosecond
            assert!(
                next >= expected && next <= expected + Duration::from_micros(1),
                "attempt {exponent}: {next:?} != {expected:?}"
            );
        }
    }

    #[test]
    fn backoff_respects_max() {
        let config = ReconnectConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 3.0,
            ..ReconnectConfig::default()
        };
        let mut backoff: ExponentialBackoff = (&config).into();

        // Exhaust several iterations
        for _ in 0..10 {
            let _next = backoff.next_backoff();
        }

        // Should still return values capped at max
        let duration = backoff.next_backoff().expect("no elapsed-time cap");
        assert!(duration <= Duration::from_secs(3), "{duration:?}");
    }

    #[test]
    fn default_reconnect_limit_is_seven() {
        assert_eq!(ReconnectConfig::default().max_attempts, 7);
    }
}
