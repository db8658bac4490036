//! Exponential backoff with jitter for connection retries

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

pub struct ExponentialBackoff {
    config: BackoffConfig,
    next_ms: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let next_ms = config.initial_delay.as_millis() as f64;
        Self {
            config,
            next_ms,
            attempt: 0,
        }
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let max_ms = self.config.max_delay.as_millis() as f64;
        let base = self.next_ms.min(max_ms);
        self.next_ms = (base * self.config.multiplier).min(max_ms);

        let spread = base * self.config.jitter_factor.clamp(0.0, 1.0);
        let delay = if spread > 0.0 {
            base + rand::rng().random_range(-spread..spread)
        } else {
            base
        };

        Duration::from_millis(delay.max(1.0) as u64)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.next_ms = self.config.initial_delay.as_millis() as f64;
        self.attempt = 0;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_and_caps_without_jitter() {
        let mut backoff = ExponentialBackoff::with_config(BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter_factor: 0.0,
        });

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.attempt(), 5);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut backoff = ExponentialBackoff::with_config(BackoffConfig {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter_factor: 0.1,
        });

        for _ in 0..50 {
            let delay = backoff.next_delay().as_millis();
            assert!((900..=1100).contains(&delay), "delay {} out of range", delay);
        }
    }
}
