// src/recovery/backoff.rs

use std::time::Duration;

use rand::Rng;

/// Exponential backoff for the transient tier: `base * multiplier^n`,
/// jittered by `±jitter` and capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            multiplier: 2.0,
            max: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay before retry `n` (0-based).
    pub fn nominal(&self, n: u32) -> Duration {
        let exp = i32::try_from(n).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exp);
        cap(secs, self.max)
    }

    /// Delay before retry `n` (0-based), with jitter applied.
    pub fn delay(&self, n: u32) -> Duration {
        let nominal = self.nominal(n).as_secs_f64();
        if self.jitter <= 0.0 {
            return cap(nominal, self.max);
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        cap(nominal * (1.0 + spread), self.max)
    }
}

fn cap(secs: f64, max: Duration) -> Duration {
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        return max;
    }
    Duration::from_secs_f64(secs.max(0.0))
}
