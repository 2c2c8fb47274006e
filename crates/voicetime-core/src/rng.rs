//! Random number generator abstraction for determinism.
//!
//! In production, this wraps a real RNG. In tests, a seeded or scripted
//! implementation is injected.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Abstraction over random number generation.
pub trait DeterministicRng: Send + Sync {
    /// Generate a random `u64` in the range `[min, max]` inclusive.
    fn next_u64_range(&mut self, min: u64, max: u64) -> u64;
}

/// Production RNG seeded from the operating system.
#[derive(Debug)]
pub struct OsSeededRng(StdRng);

impl OsSeededRng {
    /// Creates a new OS-seeded RNG.
    #[must_use]
    pub fn new() -> Self {
        Self(StdRng::from_os_rng())
    }
}

impl Default for OsSeededRng {
    fn default() -> Self {
        Self::new()
    }
}

impl DeterministicRng for OsSeededRng {
    fn next_u64_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        self.0.random_range(min..=max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_seeded_rng_stays_within_inclusive_range() {
        let mut rng = OsSeededRng::new();

        for _ in 0..200 {
            let value = rng.next_u64_range(5, 15);
            assert!((5..=15).contains(&value));
        }
    }

    #[test]
    fn test_os_seeded_rng_collapsed_range_returns_min() {
        let mut rng = OsSeededRng::new();

        assert_eq!(rng.next_u64_range(7, 7), 7);
        assert_eq!(rng.next_u64_range(9, 3), 9);
    }
}
