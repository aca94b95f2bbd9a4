//! Delay schedules for retries

use rand::Rng;
use std::time::Duration;

/// Geometric delay schedule.
///
/// Yields `initial`, `initial * factor`, `initial * factor^2`, ... forever,
/// each value clamped to the optional cap and optionally jittered by +/-20%.
/// A factor of `1.0` gives a fixed delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    factor: f64,
    cap: Option<Duration>,
    jitter: bool,
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64) -> Self {
        Self {
            current: initial,
            factor,
            cap: None,
            jitter: false,
        }
    }

    pub fn with_cap(mut self, cap: Option<Duration>) -> Self {
        self.cap = cap;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    fn clamp(&self, delay: Duration) -> Duration {
        match self.cap {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.clamp(self.current);
        self.current = self.clamp(scale(self.current, self.factor));
        Some(if self.jitter { jittered(delay) } else { delay })
    }
}

/// `delay * factor`, saturating instead of overflowing
fn scale(delay: Duration, factor: f64) -> Duration {
    let secs = delay.as_secs_f64() * factor.max(0.0);
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

fn jittered(delay: Duration) -> Duration {
    let factor = rand::rng().random_range(0.8..1.2);
    scale(delay, factor)
}
