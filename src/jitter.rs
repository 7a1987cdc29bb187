//! Randomization of retry delays so many clients don't redeliver in lockstep.
//!
//! - `None`: exact delay; deterministic tests.
//! - `Full`: uniform in `[0, delay]`.
//! - `Proportional(r)`: uniform in `[delay * (1 - r), delay * (1 + r)]`. The dispatcher default is
//!   `r = 0.2`, i.e. ±20%.
//!
//! Uses `rand`'s thread-local RNG; tests inject a seeded one through `apply_with_rng`.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter applied on top of a `Backoff` delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    None,
    Full,
    Proportional(f64),
}

impl Default for Jitter {
    fn default() -> Self {
        Jitter::Proportional(0.2)
    }
}

impl Jitter {
    /// `±ratio` around the delay. Errors unless `0 <= ratio < 1` and finite.
    pub fn proportional(ratio: f64) -> Result<Self, &'static str> {
        if !ratio.is_finite() || !(0.0..1.0).contains(&ratio) {
            return Err("proportional jitter: ratio must be in [0, 1)");
        }
        Ok(Jitter::Proportional(ratio))
    }

    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Duration::ZERO;
        }
        match *self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Proportional(ratio) => {
                let spread = (millis as f64 * ratio) as u64;
                let low = millis.saturating_sub(spread);
                let high = millis.saturating_add(spread);
                Duration::from_millis(rng.random_range(low..=high))
            }
        }
    }
}
