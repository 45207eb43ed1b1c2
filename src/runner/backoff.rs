//! Exponential backoff with seeded jitter for retry delays.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Exponential backoff with configurable initial/max and jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max: Duration,
    current: Duration,
    /// Fraction of the current interval added at random, in [0, 1)
    jitter: f64,
    rng: StdRng,
}

impl ExponentialBackoff {
    /// Creates a new backoff starting at `initial`, capping at `max`.
    pub fn new(initial: Duration, max: Duration, jitter: f64, seed: u64) -> Self {
        Self {
            max,
            current: initial.min(max),
            jitter: jitter.clamp(0.0, 0.999),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns the current base interval, without jitter.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Current interval plus jitter, capped at max.
    ///
    /// The jitter is strictly below the gap to the next doubled interval, so
    /// successive delays keep increasing until they reach the cap.
    pub fn delay(&mut self) -> Duration {
        let base = self.current;
        let extra = if self.jitter > 0.0 {
            base.mul_f64(self.rng.gen_range(0.0..self.jitter))
        } else {
            Duration::ZERO
        };
        (base + extra).min(self.max)
    }

    /// Advances to the next backoff interval (doubles, capped at max).
    pub fn next(&mut self) {
        self.current = (self.current * 2).min(self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(300), 0.0, 7);
        assert_eq!(backoff.delay(), Duration::from_millis(100));
        backoff.next();
        assert_eq!(backoff.delay(), Duration::from_millis(200));
        backoff.next();
        assert_eq!(backoff.delay(), Duration::from_millis(300));
        backoff.next();
        assert_eq!(backoff.current(), Duration::from_millis(300));
    }

    #[test]
    fn jittered_delays_increase_until_cap() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(50), Duration::from_secs(10), 0.9, 42);
        let mut previous = Duration::ZERO;
        for _ in 0..7 {
            let delay = backoff.delay();
            assert!(delay > previous, "{:?} <= {:?}", delay, previous);
            assert!(delay >= backoff.current());
            previous = delay;
            backoff.next();
        }
        for _ in 0..3 {
            let delay = backoff.delay();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(10));
            previous = delay;
            backoff.next();
        }
    }

    #[test]
    fn same_seed_same_delays() {
        let delays = |seed| {
            let mut backoff =
                ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(1), 0.5, seed);
            (0..4)
                .map(|_| {
                    let d = backoff.delay();
                    backoff.next();
                    d
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(delays(1), delays(1));
    }
}
